//! Integration tests for the scheduler.
//!
//! These tests verify the complete request flows:
//! - Request → Queue → Poller → Handler execution → Cache → Cached response
//! - Per-key idempotency while queued and in flight
//! - Dependency gating within a run
//! - Invalidation → re-fetch
//! - Pause/resume/step/reset control plane, both pause behaviors
//! - Queue priority and capacity limits
//!
//! Run with: `cargo test --test scheduler_integration`

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use checktree::catalog::{Catalog, HandlerConfig, QueueConfig, ServiceType};
use checktree::registry::HandlerRegistry;
use checktree::scheduler::{
    ControlCommand, InvalidationRequest, JobStatus, OutcomeStatus, PauseBehavior, ProcessManager,
    QueueError, RequestError, SchedulerConfig, ServiceRequest, ServiceResponse, StepOutcome,
    SystemStatus,
};

// ============================================================================
// Test Helpers
// ============================================================================

fn handler_config(name: &str, cache_seconds: u64, dependencies: &[&str]) -> HandlerConfig {
    HandlerConfig {
        name: name.to_string(),
        cache_seconds,
        description: String::new(),
        dependencies: dependencies.iter().map(|d| d.to_string()).collect(),
    }
}

/// Catalog with one `check` type: dnsHandler then githubHandler (which
/// depends on dnsHandler), both with a 300s TTL.
fn check_catalog() -> Catalog {
    let mut handlers = BTreeMap::new();
    handlers.insert("dnsHandler".to_string(), handler_config("dnsHandler", 300, &[]));
    handlers.insert(
        "githubHandler".to_string(),
        handler_config("githubHandler", 300, &["dnsHandler"]),
    );

    let mut service_types = BTreeMap::new();
    service_types.insert(
        "check".to_string(),
        ServiceType {
            description: String::new(),
            queues: vec!["service_checks".to_string()],
            handlers,
        },
    );

    Catalog {
        service_types,
        queues: default_queues(),
    }
}

fn default_queues() -> Vec<QueueConfig> {
    vec![
        QueueConfig {
            name: "ai_analysis".to_string(),
            max_concurrent: 1,
            queue_size: 10,
        },
        QueueConfig {
            name: "performance_analysis".to_string(),
            max_concurrent: 1,
            queue_size: 10,
        },
        QueueConfig {
            name: "service_checks".to_string(),
            max_concurrent: 3,
            queue_size: 10,
        },
    ]
}

/// Registry whose handlers complete instantly and count invocations.
fn counting_registry(counter: Arc<AtomicUsize>) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    for name in ["dnsHandler", "githubHandler"] {
        let counter = Arc::clone(&counter);
        registry.register_fn(name, move |ctx| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                StepOutcome::now(OutcomeStatus::Completed, format!("{} ok", ctx.step_id))
            }
        });
    }
    registry
}

fn fast_config() -> SchedulerConfig {
    SchedulerConfig {
        poller_count: 3,
        poll_interval: Duration::from_millis(10),
        ..SchedulerConfig::default()
    }
}

async fn wait_for_status(manager: &Arc<ProcessManager>, key: &str, status: JobStatus) {
    for _ in 0..300 {
        if manager
            .job_progress(key)
            .is_some_and(|p| p.status == status)
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("key {key} never reached {status:?}");
}

async fn wait_for_idle(manager: &Arc<ProcessManager>) {
    for _ in 0..300 {
        if manager.system_metrics().active_jobs == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("jobs still in flight");
}

// ============================================================================
// Request Lifecycle
// ============================================================================

#[tokio::test]
async fn queued_then_cached_lifecycle() {
    let counter = Arc::new(AtomicUsize::new(0));
    let manager = ProcessManager::new(
        check_catalog(),
        counting_registry(Arc::clone(&counter)),
        fast_config(),
    )
    .unwrap();
    let shutdown = CancellationToken::new();
    let tasks = manager.start(shutdown.clone());

    let req = ServiceRequest::new("payments", "check");
    let response = manager.handle_request(&req).unwrap();
    match &response {
        ServiceResponse::Queued { steps_to_run, position, .. } => {
            // Dependency order: dnsHandler strictly before githubHandler.
            assert_eq!(
                steps_to_run,
                &["dnsHandler".to_string(), "githubHandler".to_string()]
            );
            assert_eq!(*position, 1);
        }
        other => panic!("expected queued, got {}", other.status()),
    }

    wait_for_status(&manager, "payments-check", JobStatus::Completed).await;
    wait_for_idle(&manager).await;
    assert_eq!(counter.load(Ordering::SeqCst), 2);

    // Every step is now fresh: served from cache, no new invocations.
    let response = manager.handle_request(&req).unwrap();
    match response {
        ServiceResponse::Cached { steps, .. } => {
            assert_eq!(steps.len(), 2);
            assert_eq!(steps["dnsHandler"].result.message, "dnsHandler ok");
        }
        other => panic!("expected cached, got {}", other.status()),
    }
    assert_eq!(counter.load(Ordering::SeqCst), 2);

    // A different service name is a different key with its own lifecycle.
    let other = manager
        .handle_request(&ServiceRequest::new("orders", "check"))
        .unwrap();
    assert_eq!(other.status(), "queued");

    shutdown.cancel();
    for task in tasks {
        task.await.unwrap();
    }
}

#[tokio::test]
async fn duplicate_request_while_queued_is_idempotent() {
    let counter = Arc::new(AtomicUsize::new(0));
    // No pollers running: jobs stay queued.
    let manager = ProcessManager::new(
        check_catalog(),
        counting_registry(counter),
        fast_config(),
    )
    .unwrap();

    let req = ServiceRequest::new("payments", "check");
    let first = manager.handle_request(&req).unwrap();
    let second = manager.handle_request(&req).unwrap();

    assert_eq!(first.status(), "queued");
    assert_eq!(second.status(), "queued");
    let stats = manager.queue_stats();
    assert_eq!(
        stats["service_checks"].queue_length, 1,
        "second request must not enqueue a second job"
    );
    match second {
        ServiceResponse::Queued { position, .. } => assert_eq!(position, 1),
        other => panic!("expected queued, got {}", other.status()),
    }
}

#[tokio::test]
async fn in_flight_request_reports_processing() {
    let mut registry = HandlerRegistry::new();
    registry.register_fn("dnsHandler", |_ctx| async {
        tokio::time::sleep(Duration::from_millis(500)).await;
        StepOutcome::now(OutcomeStatus::Completed, "ok")
    });
    registry.register_fn("githubHandler", |_ctx| async {
        StepOutcome::now(OutcomeStatus::Completed, "ok")
    });

    let manager = ProcessManager::new(check_catalog(), registry, fast_config()).unwrap();
    let shutdown = CancellationToken::new();
    let tasks = manager.start(shutdown.clone());

    let req = ServiceRequest::new("payments", "check");
    manager.handle_request(&req).unwrap();

    // Wait until a poller picks the job up, then re-request.
    for _ in 0..100 {
        if manager.system_metrics().active_jobs > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let response = manager.handle_request(&req).unwrap();
    assert_eq!(response.status(), "processing");

    wait_for_status(&manager, "payments-check", JobStatus::Completed).await;
    shutdown.cancel();
    for task in tasks {
        task.await.unwrap();
    }
}

#[tokio::test]
async fn unknown_service_type_is_rejected() {
    let manager = ProcessManager::new(
        check_catalog(),
        counting_registry(Arc::new(AtomicUsize::new(0))),
        fast_config(),
    )
    .unwrap();

    let err = manager
        .handle_request(&ServiceRequest::new("payments", "nonsense"))
        .unwrap_err();
    assert!(matches!(err, RequestError::UnknownServiceType(t) if t == "nonsense"));
}

// ============================================================================
// Dependency Gating
// ============================================================================

#[tokio::test]
async fn dependent_step_skipped_when_dependency_fails() {
    let mut registry = HandlerRegistry::new();
    registry.register_fn("dnsHandler", |_ctx| async {
        StepOutcome::now(OutcomeStatus::Failed, "dns down")
    });
    let github_runs = Arc::new(AtomicUsize::new(0));
    let runs = Arc::clone(&github_runs);
    registry.register_fn("githubHandler", move |_ctx| {
        let runs = Arc::clone(&runs);
        async move {
            runs.fetch_add(1, Ordering::SeqCst);
            StepOutcome::now(OutcomeStatus::Completed, "ok")
        }
    });

    let manager = ProcessManager::new(check_catalog(), registry, fast_config()).unwrap();
    let shutdown = CancellationToken::new();
    let tasks = manager.start(shutdown.clone());

    manager
        .handle_request(&ServiceRequest::new("payments", "check"))
        .unwrap();
    wait_for_status(&manager, "payments-check", JobStatus::Completed).await;

    // githubHandler depends on dnsHandler, which failed: never invoked.
    assert_eq!(github_runs.load(Ordering::SeqCst), 0);
    let progress = manager.job_progress("payments-check").unwrap();
    assert!(progress.partial_failure);
    assert_eq!(progress.completed_steps, 0);

    let history = manager.history(1);
    assert_eq!(history.len(), 1);
    assert!(history[0].partial_failure);
    assert!(history[0].tree.contains("partial failure"));

    shutdown.cancel();
    for task in tasks {
        task.await.unwrap();
    }
}

// ============================================================================
// Invalidation
// ============================================================================

#[tokio::test]
async fn invalidate_forces_refetch() {
    let counter = Arc::new(AtomicUsize::new(0));
    let manager = ProcessManager::new(
        check_catalog(),
        counting_registry(Arc::clone(&counter)),
        fast_config(),
    )
    .unwrap();
    let shutdown = CancellationToken::new();
    let tasks = manager.start(shutdown.clone());

    let req = ServiceRequest::new("payments", "check");
    manager.handle_request(&req).unwrap();
    wait_for_status(&manager, "payments-check", JobStatus::Completed).await;
    wait_for_idle(&manager).await;
    assert_eq!(manager.handle_request(&req).unwrap().status(), "cached");

    let touched = manager
        .invalidate_cache(&InvalidationRequest {
            service_name: "payments".to_string(),
            process_type: "check".to_string(),
            handlers: Vec::new(),
            reset_times: false,
        })
        .unwrap();
    assert_eq!(touched, 1);

    // All step entries gone: the next request queues a full run.
    let response = manager.handle_request(&req).unwrap();
    match response {
        ServiceResponse::Queued { steps_to_run, .. } => assert_eq!(steps_to_run.len(), 2),
        other => panic!("expected queued, got {}", other.status()),
    }

    shutdown.cancel();
    for task in tasks {
        task.await.unwrap();
    }
}

#[tokio::test]
async fn wildcard_invalidation_matches_by_type() {
    let counter = Arc::new(AtomicUsize::new(0));
    let manager = ProcessManager::new(
        check_catalog(),
        counting_registry(counter),
        fast_config(),
    )
    .unwrap();
    let shutdown = CancellationToken::new();
    let tasks = manager.start(shutdown.clone());

    for name in ["payments", "orders"] {
        manager
            .handle_request(&ServiceRequest::new(name, "check"))
            .unwrap();
    }
    wait_for_status(&manager, "payments-check", JobStatus::Completed).await;
    wait_for_status(&manager, "orders-check", JobStatus::Completed).await;

    let touched = manager
        .invalidate_cache(&InvalidationRequest {
            service_name: "*".to_string(),
            process_type: "check".to_string(),
            handlers: Vec::new(),
            reset_times: false,
        })
        .unwrap();
    assert_eq!(touched, 2);

    // Wildcard matching nothing is Ok(0), not an error.
    let touched = manager
        .invalidate_cache(&InvalidationRequest {
            service_name: "*".to_string(),
            process_type: "report".to_string(),
            handlers: Vec::new(),
            reset_times: false,
        })
        .unwrap();
    assert_eq!(touched, 0);

    // An exact miss is an error.
    assert!(manager
        .invalidate_cache(&InvalidationRequest {
            service_name: "ghost".to_string(),
            process_type: "check".to_string(),
            handlers: Vec::new(),
            reset_times: false,
        })
        .is_err());

    shutdown.cancel();
    for task in tasks {
        task.await.unwrap();
    }
}

// ============================================================================
// Control Plane
// ============================================================================

#[tokio::test]
async fn pause_abandons_remaining_steps_by_default() {
    let dns_runs = Arc::new(AtomicUsize::new(0));
    let github_runs = Arc::new(AtomicUsize::new(0));

    let mut registry = HandlerRegistry::new();
    {
        let runs = Arc::clone(&dns_runs);
        registry.register_fn("dnsHandler", move |_ctx| {
            let runs = Arc::clone(&runs);
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(300)).await;
                StepOutcome::now(OutcomeStatus::Completed, "ok")
            }
        });
    }
    {
        let runs = Arc::clone(&github_runs);
        registry.register_fn("githubHandler", move |_ctx| {
            let runs = Arc::clone(&runs);
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                StepOutcome::now(OutcomeStatus::Completed, "ok")
            }
        });
    }

    let manager = ProcessManager::new(check_catalog(), registry, fast_config()).unwrap();
    let shutdown = CancellationToken::new();
    let tasks = manager.start(shutdown.clone());

    manager
        .handle_request(&ServiceRequest::new("payments", "check"))
        .unwrap();

    // Pause while dnsHandler is mid-flight; the in-progress step always
    // finishes, the next one never starts.
    for _ in 0..100 {
        if dns_runs.load(Ordering::SeqCst) > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    manager.handle_control_command(ControlCommand::Pause).unwrap();
    wait_for_idle(&manager).await;

    assert_eq!(dns_runs.load(Ordering::SeqCst), 1);
    assert_eq!(github_runs.load(Ordering::SeqCst), 0);
    assert_eq!(
        manager.queue_stats()["service_checks"].queue_length,
        0,
        "abandoned remainder must not be requeued"
    );

    manager.handle_control_command(ControlCommand::Resume).unwrap();
    assert_eq!(manager.system_state().status, SystemStatus::Running);

    shutdown.cancel();
    for task in tasks {
        task.await.unwrap();
    }
}

#[tokio::test]
async fn pause_requeues_remaining_steps_when_configured() {
    let github_runs = Arc::new(AtomicUsize::new(0));

    let mut registry = HandlerRegistry::new();
    registry.register_fn("dnsHandler", |_ctx| async {
        tokio::time::sleep(Duration::from_millis(300)).await;
        StepOutcome::now(OutcomeStatus::Completed, "ok")
    });
    {
        let runs = Arc::clone(&github_runs);
        registry.register_fn("githubHandler", move |_ctx| {
            let runs = Arc::clone(&runs);
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                StepOutcome::now(OutcomeStatus::Completed, "ok")
            }
        });
    }

    let config = SchedulerConfig {
        pause_behavior: PauseBehavior::Requeue,
        ..fast_config()
    };
    let manager = ProcessManager::new(check_catalog(), registry, config).unwrap();
    let shutdown = CancellationToken::new();
    let tasks = manager.start(shutdown.clone());

    manager
        .handle_request(&ServiceRequest::new("payments", "check"))
        .unwrap();
    for _ in 0..100 {
        if manager.system_metrics().active_jobs > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    manager.handle_control_command(ControlCommand::Pause).unwrap();
    wait_for_idle(&manager).await;

    // The remainder goes back to its queue instead of being dropped, and
    // stays there while the system is paused.
    for _ in 0..100 {
        if manager.queue_stats()["service_checks"].queue_length == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(manager.queue_stats()["service_checks"].queue_length, 1);
    assert_eq!(github_runs.load(Ordering::SeqCst), 0);

    // Resume: a poller picks the remainder up and finishes the job.
    manager.handle_control_command(ControlCommand::Resume).unwrap();
    wait_for_status(&manager, "payments-check", JobStatus::Completed).await;
    assert_eq!(github_runs.load(Ordering::SeqCst), 1);

    shutdown.cancel();
    for task in tasks {
        task.await.unwrap();
    }
}

#[tokio::test]
async fn step_mode_advances_one_step_per_command() {
    let steps_run = Arc::new(AtomicUsize::new(0));

    let mut registry = HandlerRegistry::new();
    for name in ["dnsHandler", "githubHandler"] {
        let counter = Arc::clone(&steps_run);
        registry.register_fn(name, move |_ctx| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                StepOutcome::now(OutcomeStatus::Completed, "ok")
            }
        });
    }

    let manager = ProcessManager::new(check_catalog(), registry, fast_config()).unwrap();
    let shutdown = CancellationToken::new();
    let tasks = manager.start(shutdown.clone());

    // Pause first (step requires it), then arm step mode and enqueue.
    // The run blocks on the control channel after every executed step;
    // the signal buffered by the arming command releases the wait after
    // the first step.
    manager.handle_control_command(ControlCommand::Pause).unwrap();
    let state = manager.handle_control_command(ControlCommand::Step).unwrap();
    assert_eq!(state.status, SystemStatus::Stepping);
    assert!(state.step_mode);

    manager
        .handle_request(&ServiceRequest::new("payments", "check"))
        .unwrap();

    for _ in 0..300 {
        if steps_run.load(Ordering::SeqCst) == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(steps_run.load(Ordering::SeqCst), 2);
    // Both steps ran, but the run is parked on the post-step wait: the
    // job is not complete and nothing is cached yet.
    assert_ne!(
        manager.job_progress("payments-check").unwrap().status,
        JobStatus::Completed
    );

    // Stepping again requires re-pausing first; the step command then
    // releases the final wait and the run finishes.
    manager.handle_control_command(ControlCommand::Pause).unwrap();
    manager.handle_control_command(ControlCommand::Step).unwrap();
    wait_for_status(&manager, "payments-check", JobStatus::Completed).await;

    manager.handle_control_command(ControlCommand::Reset).unwrap();
    assert_eq!(manager.system_state().status, SystemStatus::Running);

    shutdown.cancel();
    for task in tasks {
        task.await.unwrap();
    }
}

// ============================================================================
// Queue Behavior
// ============================================================================

#[tokio::test]
async fn full_queue_rejects_without_side_effects() {
    let mut catalog = check_catalog();
    for queue in &mut catalog.queues {
        queue.queue_size = 1;
    }
    let manager = ProcessManager::new(
        catalog,
        counting_registry(Arc::new(AtomicUsize::new(0))),
        fast_config(),
    )
    .unwrap();
    // No pollers: the queue stays full.

    manager
        .handle_request(&ServiceRequest::new("payments", "check"))
        .unwrap();
    let err = manager
        .handle_request(&ServiceRequest::new("orders", "check"))
        .unwrap_err();
    assert!(matches!(
        err,
        RequestError::Queue(QueueError::Full { capacity: 1, .. })
    ));
    assert_eq!(manager.queue_stats()["service_checks"].queue_length, 1);
}

// ============================================================================
// Startup Validation
// ============================================================================

#[tokio::test]
async fn unregistered_handler_fails_construction() {
    let registry = HandlerRegistry::new();
    let err = ProcessManager::new(check_catalog(), registry, fast_config()).unwrap_err();
    assert!(err.to_string().contains("unregistered handler"));
}

// ============================================================================
// Debug Output
// ============================================================================

#[tokio::test]
async fn debug_snapshot_reflects_cache_and_queues() {
    let counter = Arc::new(AtomicUsize::new(0));
    let manager = ProcessManager::new(
        check_catalog(),
        counting_registry(counter),
        fast_config(),
    )
    .unwrap();
    let shutdown = CancellationToken::new();
    let tasks = manager.start(shutdown.clone());

    manager
        .handle_request(&ServiceRequest::new("payments", "check"))
        .unwrap();
    wait_for_status(&manager, "payments-check", JobStatus::Completed).await;
    wait_for_idle(&manager).await;

    let debug = manager.system_debug_info();
    assert_eq!(debug.cache_status.total_entries, 1);
    let entry = &debug.cache_status.entries["payments-check"];
    assert_eq!(entry.service_name, "payments");
    assert_eq!(entry.step_statuses.len(), 2);
    assert!(debug.queue_status.contains_key("service_checks"));

    // Serializes cleanly for the embedding front end.
    let json = serde_json::to_value(&debug).unwrap();
    assert_eq!(
        json["cache_status"]["entries"]["payments-check"]["step_statuses"]["dnsHandler"]["status"],
        "valid"
    );

    let metrics = manager.system_metrics();
    assert_eq!(metrics.total_cache_entries, 1);
    assert_eq!(metrics.active_jobs, 0);

    shutdown.cancel();
    for task in tasks {
        task.await.unwrap();
    }
}
