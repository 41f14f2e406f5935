//! checktree CLI - demo driver for the scheduling library.
//!
//! Builds a scheduler from a catalog (a JSON file or the built-in demo
//! catalog), registers the demo handlers, submits a round of check
//! requests, and prints responses and result trees as jobs finish.

mod handlers;

use checktree::catalog::{Catalog, HandlerConfig, QueueConfig, ServiceType};
use checktree::logging::init_logging;
use checktree::scheduler::{
    JobStatus, PauseBehavior, ProcessManager, SchedulerConfig, ServiceRequest, ServiceResponse,
};
use clap::Parser;
use std::collections::BTreeMap;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "checktree")]
#[command(about = "Run service-check workflows with queueing and result caching", long_about = None)]
struct Args {
    /// Path to a catalog JSON file (uses the built-in demo catalog if omitted)
    #[arg(long)]
    config: Option<String>,

    /// Number of polling workers
    #[arg(long, default_value = "5")]
    pollers: usize,

    /// Re-enqueue the remaining steps of a job interrupted by a pause
    #[arg(long)]
    requeue_on_pause: bool,

    /// Services to check, as name:type pairs
    #[arg(long, value_delimiter = ',', default_value = "payments:check,orders:check,analytics:report")]
    services: Vec<String>,

    /// Keep running after the demo round so requests can be observed
    /// hitting the cache (exit with Ctrl-C)
    #[arg(long)]
    watch: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let _logging = match init_logging("logs", "checktree.log") {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error initializing logging: {e}");
            process::exit(1);
        }
    };

    let catalog = match &args.config {
        Some(path) => match Catalog::from_json_file(path) {
            Ok(catalog) => catalog,
            Err(e) => {
                eprintln!("Error loading catalog from {path}: {e}");
                process::exit(1);
            }
        },
        None => demo_catalog(),
    };

    let config = SchedulerConfig {
        poller_count: args.pollers,
        pause_behavior: if args.requeue_on_pause {
            PauseBehavior::Requeue
        } else {
            PauseBehavior::Abandon
        },
        ..SchedulerConfig::default()
    };

    let manager = match ProcessManager::new(catalog.clone(), handlers::demo_registry(), config) {
        Ok(manager) => manager,
        Err(e) => {
            eprintln!("Error building scheduler: {e}");
            process::exit(1);
        }
    };

    print_banner(&catalog);

    let shutdown = CancellationToken::new();
    let tasks = manager.start(shutdown.clone());

    let requests = match parse_services(&args.services) {
        Ok(requests) => requests,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    };

    run_demo_round(&manager, &requests).await;

    if args.watch {
        println!("\nWatching; submit more work by rerunning, exit with Ctrl-C.");
        let _ = tokio::signal::ctrl_c().await;
    }

    shutdown.cancel();
    for task in tasks {
        let _ = task.await;
    }
}

/// Submits every request, waits for the resulting jobs, and prints the
/// finished result trees.
async fn run_demo_round(manager: &Arc<ProcessManager>, requests: &[ServiceRequest]) {
    println!("\nSubmitting {} request(s):", requests.len());
    let mut pending = Vec::new();
    for req in requests {
        match manager.handle_request(req) {
            Ok(response) => {
                println!(
                    "  {} ({}) -> {}",
                    req.name,
                    req.process_type,
                    serde_json::to_string(&response).unwrap_or_else(|_| "<unserializable>".into())
                );
                if !matches!(response, ServiceResponse::Cached { .. }) {
                    pending.push(req.cache_key());
                }
            }
            Err(e) => eprintln!("  {} ({}) -> error: {e}", req.name, req.process_type),
        }
    }

    while !pending.is_empty() {
        tokio::time::sleep(Duration::from_millis(200)).await;
        pending.retain(|key| {
            !manager.job_progress(key).is_some_and(|p| {
                matches!(p.status, JobStatus::Completed | JobStatus::Failed)
            })
        });
    }

    println!("\nFinished jobs:");
    for result in manager.history(requests.len()) {
        println!("\n{}", result.tree);
    }

    let metrics = manager.system_metrics();
    println!(
        "Cache entries: {}, active jobs: {}",
        metrics.total_cache_entries, metrics.active_jobs
    );
}

fn parse_services(specs: &[String]) -> Result<Vec<ServiceRequest>, String> {
    specs
        .iter()
        .map(|spec| {
            spec.split_once(':')
                .map(|(name, process_type)| ServiceRequest::new(name, process_type))
                .ok_or_else(|| format!("invalid service spec '{spec}' (expected name:type)"))
        })
        .collect()
}

fn print_banner(catalog: &Catalog) {
    println!("\n=== checktree starting ===");
    println!("Available service types:");
    for (type_name, service_type) in &catalog.service_types {
        println!("- {}: {}", type_name, service_type.description);
        println!("  Steps:");
        for (step_id, handler) in &service_type.handlers {
            if handler.dependencies.is_empty() {
                println!("    - {}: cache {}s", step_id, handler.cache_seconds);
            } else {
                println!(
                    "    - {}: cache {}s (after {})",
                    step_id,
                    handler.cache_seconds,
                    handler.dependencies.join(", ")
                );
            }
        }
    }
    println!("Queues:");
    for queue in &catalog.queues {
        println!(
            "- {}: up to {} concurrent, capacity {}",
            queue.name, queue.max_concurrent, queue.queue_size
        );
    }
}

/// The built-in demo catalog: a `check` workflow with a dependency chain
/// and a `report` workflow with a diamond-shaped dependency graph.
fn demo_catalog() -> Catalog {
    fn handler(name: &str, cache_seconds: u64, dependencies: &[&str]) -> HandlerConfig {
        HandlerConfig {
            name: name.to_string(),
            cache_seconds,
            description: String::new(),
            dependencies: dependencies.iter().map(|d| d.to_string()).collect(),
        }
    }

    let mut check_handlers = BTreeMap::new();
    check_handlers.insert("dnsHandler".to_string(), handler("dnsHandler", 300, &[]));
    check_handlers.insert(
        "githubHandler".to_string(),
        handler("githubHandler", 300, &["dnsHandler"]),
    );
    check_handlers.insert(
        "performanceHandler".to_string(),
        handler("performanceHandler", 600, &[]),
    );
    check_handlers.insert("aiHandler".to_string(), handler("aiHandler", 900, &[]));

    let mut report_handlers = BTreeMap::new();
    report_handlers.insert(
        "metricCollector".to_string(),
        handler("metricCollector", 300, &[]),
    );
    report_handlers.insert(
        "logAnalyzer".to_string(),
        handler("logAnalyzer", 600, &["metricCollector"]),
    );
    report_handlers.insert(
        "trendAnalyzer".to_string(),
        handler("trendAnalyzer", 600, &["metricCollector"]),
    );
    report_handlers.insert(
        "reportGenerator".to_string(),
        handler("reportGenerator", 900, &["logAnalyzer", "trendAnalyzer"]),
    );

    let mut service_types = BTreeMap::new();
    service_types.insert(
        "check".to_string(),
        ServiceType {
            description: "Service health checks".to_string(),
            queues: vec![
                "ai_analysis".to_string(),
                "performance_analysis".to_string(),
                "service_checks".to_string(),
            ],
            handlers: check_handlers,
        },
    );
    service_types.insert(
        "report".to_string(),
        ServiceType {
            description: "Service reporting workflow".to_string(),
            queues: vec!["service_checks".to_string()],
            handlers: report_handlers,
        },
    );

    Catalog {
        service_types,
        queues: vec![
            QueueConfig {
                name: "ai_analysis".to_string(),
                max_concurrent: 2,
                queue_size: 50,
            },
            QueueConfig {
                name: "performance_analysis".to_string(),
                max_concurrent: 2,
                queue_size: 50,
            },
            QueueConfig {
                name: "service_checks".to_string(),
                max_concurrent: 5,
                queue_size: 100,
            },
        ],
    }
}
