//! Polling dispatch workers.
//!
//! Dispatch is polling-based, not event-driven: a fixed pool of workers
//! each asks the queue manager for the next dispatchable job on a fixed
//! cadence and executes it inline. An idle system wakes
//! `poller_count` times per interval and goes back to sleep; dispatch
//! latency is bounded by the poll interval. A separate sweep task
//! garbage-collects stale progress entries.
//!
//! Every job runs inside a panic boundary: a panicking handler fails that
//! job and releases its queue slot without taking the worker down.

use super::process::ProcessManager;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

impl ProcessManager {
    /// Spawns the poller pool and the progress sweep task.
    ///
    /// Returns the spawned task handles; all of them exit promptly once
    /// `shutdown` is cancelled. Jobs already in flight run to completion.
    pub fn start(self: &Arc<Self>, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(self.config.poller_count + 1);
        for worker_id in 0..self.config.poller_count {
            let manager = Arc::clone(self);
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                manager.poll_loop(worker_id, shutdown).await;
            }));
        }

        let manager = Arc::clone(self);
        handles.push(tokio::spawn(async move {
            manager.sweep_loop(shutdown).await;
        }));

        info!(pollers = self.config.poller_count, "scheduler started");
        handles
    }

    async fn poll_loop(self: Arc<Self>, worker_id: usize, shutdown: CancellationToken) {
        debug!(worker_id, "poller started");
        let mut interval = tokio::time::interval(self.config.poll_interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!(worker_id, "poller stopping");
                    return;
                }
                _ = interval.tick() => {
                    // A full pause stops dispatch entirely; queued jobs
                    // stay queued. Step mode still dispatches so a queued
                    // job can be walked through.
                    let (status, step_mode) = self.control.flags();
                    if status == super::state::SystemStatus::Paused && !step_mode {
                        continue;
                    }
                    // Drain: dispatch everything eligible, each job on its
                    // own task, then sleep until the next tick. Per-queue
                    // concurrency caps bound how much this hands out.
                    while let Some(job) = self.queues.process_next_job() {
                        let manager = Arc::clone(&self);
                        tokio::spawn(async move {
                            manager.run_job(job).await;
                        });
                        if shutdown.is_cancelled() {
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Runs one dispatched job inside the panic boundary.
    ///
    /// The in-flight slot is always released afterwards, and a pause
    /// remainder (see
    /// [`super::config::PauseBehavior::Requeue`]) is re-enqueued only
    /// after that release, so a key never has two runs in flight.
    pub(crate) async fn run_job(self: &Arc<Self>, job: super::queue::DispatchedJob) {
        let queue_name = job.queue.clone();
        let key = job.check.cache_key();

        match AssertUnwindSafe(self.process_check(job)).catch_unwind().await {
            Ok(requeue) => {
                self.queues.mark_job_completed(&queue_name, &key);
                if let Some(check) = requeue {
                    if let Err(err) = self.queues.enqueue_job(check) {
                        warn!(key, error = %err, "failed to requeue paused job");
                    }
                }
            }
            Err(_) => {
                error!(key, "job panicked, marking failed");
                if let Some(progress) = self.progress.get(&key) {
                    progress.fail();
                }
                self.queues.mark_job_completed(&queue_name, &key);
            }
        }
    }

    async fn sweep_loop(self: Arc<Self>, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.cleanup_interval);
        // The first tick fires immediately; skip it so a fresh start does
        // not sweep before anything could be stale.
        interval.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = interval.tick() => {
                    self.cleanup_old_progress(self.config.progress_max_age);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::catalog::{Catalog, HandlerConfig, QueueConfig, ServiceType};
    use crate::registry::HandlerRegistry;
    use crate::scheduler::config::SchedulerConfig;
    use crate::scheduler::process::ProcessManager;
    use crate::scheduler::progress::JobStatus;
    use crate::scheduler::types::{OutcomeStatus, ServiceRequest, StepOutcome};
    use std::collections::BTreeMap;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn catalog(step_ids: &[&str]) -> Catalog {
        let handlers: BTreeMap<String, HandlerConfig> = step_ids
            .iter()
            .map(|id| {
                (
                    id.to_string(),
                    HandlerConfig {
                        name: id.to_string(),
                        cache_seconds: 300,
                        description: String::new(),
                        dependencies: Vec::new(),
                    },
                )
            })
            .collect();
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
            queues: vec![QueueConfig {
                name: "service_checks".to_string(),
                max_concurrent: 2,
                queue_size: 10,
            }],
        }
    }

    fn registry() -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();
        registry.register_fn("dnsHandler", |_ctx| async {
            StepOutcome::now(OutcomeStatus::Completed, "resolved")
        });
        registry.register_fn("panicHandler", |_ctx| async { panic!("handler exploded") });
        registry
    }

    fn fast_config() -> SchedulerConfig {
        SchedulerConfig {
            poller_count: 2,
            poll_interval: Duration::from_millis(10),
            ..SchedulerConfig::default()
        }
    }

    async fn wait_for<F: Fn() -> bool>(cond: F) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn test_pollers_pick_up_queued_work() {
        let manager =
            ProcessManager::new(catalog(&["dnsHandler"]), registry(), fast_config()).unwrap();
        let shutdown = CancellationToken::new();
        let handles = manager.start(shutdown.clone());

        let req = ServiceRequest::new("payments", "check");
        manager.handle_request(&req).unwrap();

        wait_for(|| {
            manager
                .job_progress("payments-check")
                .is_some_and(|p| p.status == JobStatus::Completed)
        })
        .await;

        // A second request is now served from cache.
        let response = manager.handle_request(&req).unwrap();
        assert_eq!(response.status(), "cached");

        shutdown.cancel();
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_panicking_handler_fails_job_and_releases_slot() {
        let manager =
            ProcessManager::new(catalog(&["panicHandler"]), registry(), fast_config()).unwrap();
        let shutdown = CancellationToken::new();
        let handles = manager.start(shutdown.clone());

        let req = ServiceRequest::new("payments", "check");
        manager.handle_request(&req).unwrap();

        wait_for(|| {
            manager
                .job_progress("payments-check")
                .is_some_and(|p| p.status == JobStatus::Failed)
        })
        .await;
        wait_for(|| manager.system_metrics().active_jobs == 0).await;

        shutdown.cancel();
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_shutdown_stops_pollers() {
        let manager =
            ProcessManager::new(catalog(&["dnsHandler"]), registry(), fast_config()).unwrap();
        let shutdown = CancellationToken::new();
        let handles = manager.start(shutdown.clone());

        shutdown.cancel();
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
