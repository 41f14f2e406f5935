//! Demo step handlers.
//!
//! Each handler simulates real work with a random delay and a small
//! random failure rate, so queueing, caching, and partial failures are
//! all observable from the CLI without any external services.

use checktree::registry::{HandlerContext, HandlerRegistry};
use checktree::scheduler::{OutcomeStatus, StepOutcome};
use chrono::Utc;
use rand::Rng;
use std::time::Duration;
use tracing::info;

/// Chance a simulated step reports failure.
const FAILURE_RATE: f64 = 0.1;

/// Builds the registry of demo handlers.
pub fn demo_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();

    // Check workflow handlers
    registry.register_fn("dnsHandler", |ctx| simulate_work("DNS Check", ctx, 1, 5));
    registry.register_fn("githubHandler", |ctx| {
        simulate_work("GitHub Check", ctx, 1, 5)
    });
    registry.register_fn("performanceHandler", |ctx| {
        simulate_work("Performance Analysis", ctx, 2, 5)
    });
    registry.register_fn("aiHandler", |ctx| simulate_work("AI Analysis", ctx, 3, 5));

    // Report workflow handlers
    registry.register_fn("metricCollector", |ctx| {
        simulate_work("Metric Collection", ctx, 1, 4)
    });
    registry.register_fn("logAnalyzer", |ctx| simulate_work("Log Analysis", ctx, 2, 5));
    registry.register_fn("trendAnalyzer", |ctx| {
        simulate_work("Trend Analysis", ctx, 2, 4)
    });
    registry.register_fn("reportGenerator", |ctx| {
        simulate_work("Report Generation", ctx, 3, 5)
    });

    registry
}

/// Simulates a step: random delay in `min_secs..=max_secs`, then a
/// completed outcome (or failed, at [`FAILURE_RATE`]).
async fn simulate_work(
    label: &'static str,
    ctx: HandlerContext,
    min_secs: u64,
    max_secs: u64,
) -> StepOutcome {
    let start = Utc::now();
    // ThreadRng is not Send: finish with it before awaiting.
    let (delay, failed) = {
        let mut rng = rand::rng();
        (
            Duration::from_millis(rng.random_range(min_secs * 1000..=max_secs * 1000)),
            rng.random_bool(FAILURE_RATE),
        )
    };

    info!(
        service = %ctx.service_name,
        workflow = %ctx.process_type,
        step = %ctx.step_id,
        "starting {label}"
    );
    tokio::time::sleep(delay).await;

    let status = if failed {
        OutcomeStatus::Failed
    } else {
        OutcomeStatus::Completed
    };
    info!(
        service = %ctx.service_name,
        step = %ctx.step_id,
        status = ?status,
        elapsed_ms = delay.as_millis() as u64,
        "finished {label}"
    );

    StepOutcome {
        status,
        message: format!("{label} finished in {:.1}s", delay.as_secs_f64()),
        data: None,
        start_time: start,
        end_time: Utc::now(),
    }
}
