//! Process manager - request dispatch and the step-execution state machine.
//!
//! The process manager is the orchestrator: it receives requests, consults
//! the cache to compute which steps are stale, reports cache hits or
//! delegates to the queue manager, and executes dequeued jobs step by step
//! while honoring the global control state. Poller wiring lives in
//! [`super::poller`].

use super::cache::ServiceCache;
use super::config::{PauseBehavior, SchedulerConfig};
use super::debug::{
    CacheDebugInfo, CacheEntryDebug, CacheFreshness, ProcessDebugInfo, ProcessingItem,
    StepCacheStatus, SystemDebugInfo, SystemMetrics,
};
use super::history::{JobHistory, JobResult};
use super::progress::{JobStatus, ProgressSnapshot, ServiceProgress};
use super::queue::{DispatchedJob, QueueError, QueueManager, QueueStats, QueuedCheck};
use super::state::{ControlCommand, ControlError, ControlState, StepSignal, SystemState, SystemStatus};
use super::tree::render_tree;
use super::types::{cache_key, InvalidationRequest, ServiceRequest, ServiceResponse};
use crate::catalog::{Catalog, CatalogError, StepOrders};
use crate::registry::{HandlerContext, HandlerRegistry};
use chrono::Utc;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

// =============================================================================
// Errors
// =============================================================================

/// Errors returned from [`ProcessManager::handle_request`].
#[derive(Debug, Error)]
pub enum RequestError {
    /// The request names a process type absent from the catalog.
    #[error("unknown service type '{0}'")]
    UnknownServiceType(String),

    /// The target queue rejected the job.
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Errors returned from [`ProcessManager::invalidate_cache`].
#[derive(Debug, Error)]
pub enum InvalidateError {
    /// An exact, non-wildcard key has no cache entry.
    #[error("no cache found for service {service_name} ({process_type})")]
    NotFound {
        service_name: String,
        process_type: String,
    },
}

// =============================================================================
// Process Manager
// =============================================================================

/// The scheduling orchestrator.
///
/// Owns the cache and progress maps and the control state; queue contents
/// belong to the [`QueueManager`]. Instantiated as an explicit object
/// graph with no global state, so independent instances coexist in tests.
pub struct ProcessManager {
    pub(crate) catalog: Catalog,
    pub(crate) step_orders: StepOrders,
    pub(crate) registry: HandlerRegistry,
    pub(crate) queues: QueueManager,
    pub(crate) cache: DashMap<String, Arc<ServiceCache>>,
    pub(crate) progress: DashMap<String, Arc<ServiceProgress>>,
    pub(crate) control: ControlState,
    pub(crate) history: JobHistory,
    pub(crate) config: SchedulerConfig,
}

impl std::fmt::Debug for ProcessManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessManager").finish_non_exhaustive()
    }
}

impl ProcessManager {
    /// Builds a manager from a catalog, registry, and configuration.
    ///
    /// Validates the catalog against the registry up front; a
    /// configuration referencing an unregistered handler is rejected here,
    /// before any traffic is accepted.
    ///
    /// # Errors
    ///
    /// Returns the first [`CatalogError`] found during validation.
    pub fn new(
        catalog: Catalog,
        registry: HandlerRegistry,
        config: SchedulerConfig,
    ) -> Result<Arc<Self>, CatalogError> {
        let step_orders = catalog.validate(&registry)?;
        let queues = QueueManager::new(&catalog.queues);
        let history = JobHistory::new(config.max_history);
        Ok(Arc::new(Self {
            catalog,
            step_orders,
            registry,
            queues,
            cache: DashMap::new(),
            progress: DashMap::new(),
            control: ControlState::new(),
            history,
            config,
        }))
    }

    // =========================================================================
    // Request Handling
    // =========================================================================

    /// Handles a check request.
    ///
    /// In order: report `processing` if the key is in flight, report
    /// `queued` if it is already waiting, serve `cached` if every step is
    /// fresh, otherwise enqueue the expired step set.
    ///
    /// # Errors
    ///
    /// [`RequestError::UnknownServiceType`] for an uncataloged type and
    /// [`RequestError::Queue`] when the target queue is full.
    pub fn handle_request(&self, req: &ServiceRequest) -> Result<ServiceResponse, RequestError> {
        let service_type = self
            .catalog
            .service_type(&req.process_type)
            .ok_or_else(|| RequestError::UnknownServiceType(req.process_type.clone()))?;
        let key = req.cache_key();

        if self.queues.is_processing(&key) {
            return Ok(ServiceResponse::Processing {
                position: self.queues.get_position(&key),
                cache_key: key,
                start_time: Utc::now(),
            });
        }

        // Idempotent for keys already waiting in a queue.
        if let Some(existing) = self.queues.queued_snapshot(&key) {
            return Ok(ServiceResponse::Queued {
                cache_key: key,
                position: existing.position,
                queue_time: existing.queue_time,
                steps_to_run: existing.steps_to_run,
            });
        }

        let cache = self.cache_entry(&key, &req.name, &req.process_type);
        let order = self
            .step_orders
            .get(&req.process_type)
            .cloned()
            .unwrap_or_default();
        let expired = cache.expired_steps(&order, &service_type.handlers, Utc::now());

        if expired.is_empty() {
            debug!(key, "serving cached response");
            return Ok(cache.cached_response());
        }

        let check = QueuedCheck::from_request(req, expired.clone());
        let receipt = self.queues.enqueue_job(check)?;
        info!(key, queue = %receipt.queue, position = receipt.position, "request queued");
        Ok(ServiceResponse::Queued {
            cache_key: key,
            position: receipt.position,
            queue_time: receipt.queue_time,
            steps_to_run: expired,
        })
    }

    fn cache_entry(&self, key: &str, name: &str, process_type: &str) -> Arc<ServiceCache> {
        let entry = self
            .cache
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(ServiceCache::new(name, process_type)));
        Arc::clone(entry.value())
    }

    // =========================================================================
    // Step Execution
    // =========================================================================

    /// Executes a dequeued job's steps in order.
    ///
    /// Returns a check to re-enqueue when the run was aborted by a pause
    /// and [`PauseBehavior::Requeue`] is configured. The caller releases
    /// the in-flight slot before performing that re-enqueue, preserving
    /// at-most-one-in-flight per key.
    pub(crate) async fn process_check(&self, job: DispatchedJob) -> Option<QueuedCheck> {
        let check = job.check;
        let key = check.cache_key();
        let Some(service_type) = self.catalog.service_type(&check.process_type) else {
            warn!(key, process_type = %check.process_type, "service type vanished from catalog");
            return None;
        };

        let progress = self.get_or_create_progress(&check);
        progress.begin_run(&check.steps_to_run);
        info!(key, steps = ?check.steps_to_run, "job started");

        for (index, step_id) in check.steps_to_run.iter().enumerate() {
            let (status, step_mode) = self.control.flags();
            if status == SystemStatus::Paused && !step_mode {
                info!(key, step = %step_id, "processing paused before step");
                return self.paused_remainder(&check, index);
            }

            let Some(handler_config) = service_type.handlers.get(step_id) else {
                warn!(key, step = %step_id, "no handler configured for step");
                progress.fail_step(step_id, format!("no handler configured for step {step_id}"));
                continue;
            };

            if let Some(dep) = handler_config
                .dependencies
                .iter()
                .find(|dep| !progress.step_completed(dep))
            {
                debug!(key, step = %step_id, dependency = %dep, "dependencies not met, skipping this pass");
                continue;
            }

            self.control.set_current_step(step_id);
            progress.start_step(step_id, Utc::now());

            let Some(handler) = self.registry.get(&handler_config.name) else {
                // Startup validation makes this unreachable; fail the step
                // rather than leave it pending if it ever happens.
                progress.fail_step(step_id, format!("handler '{}' not registered", handler_config.name));
                continue;
            };

            let outcome = handler(HandlerContext {
                service_name: check.service_name.clone(),
                process_type: check.process_type.clone(),
                step_id: step_id.clone(),
                service_url: check.service_url.clone(),
            })
            .await;
            debug!(key, step = %step_id, status = ?outcome.status, "step finished");
            progress.finish_step(step_id, outcome);

            if step_mode {
                match self.control.wait_for_step(self.config.step_timeout).await {
                    StepSignal::Advance => {}
                    StepSignal::Abort => {
                        info!(key, step = %step_id, "step-mode wait aborted");
                        return None;
                    }
                }
            }
        }

        progress.complete();
        let snapshot = progress.snapshot();
        let tree = render_tree(&snapshot);
        info!(key, duration_ms = (snapshot.last_updated - snapshot.start_time).num_milliseconds(), "job completed");
        debug!(key, "\n{tree}");
        self.history.push(JobResult::from_snapshot(&snapshot, tree));

        // Cache population happens once, here, at the end of a full run.
        if let Some(cache) = self.cache.get(&key).map(|entry| Arc::clone(entry.value())) {
            let results = progress.results();
            cache.store_results(
                results.iter().map(|(id, outcome)| (id.as_str(), outcome)),
                Utc::now(),
            );
        }
        None
    }

    fn paused_remainder(&self, check: &QueuedCheck, next_index: usize) -> Option<QueuedCheck> {
        match self.config.pause_behavior {
            PauseBehavior::Abandon => None,
            PauseBehavior::Requeue => {
                let remaining = check.steps_to_run[next_index..].to_vec();
                if remaining.is_empty() {
                    return None;
                }
                Some(QueuedCheck {
                    service_name: check.service_name.clone(),
                    process_type: check.process_type.clone(),
                    steps_to_run: remaining,
                    queue_time: Utc::now(),
                    position: 0,
                    service_url: check.service_url.clone(),
                })
            }
        }
    }

    fn get_or_create_progress(&self, check: &QueuedCheck) -> Arc<ServiceProgress> {
        let entry = self.progress.entry(check.cache_key()).or_insert_with(|| {
            let step_ids = self
                .catalog
                .service_type(&check.process_type)
                .map(|t| t.handlers.keys().cloned().collect::<Vec<_>>())
                .unwrap_or_default();
            Arc::new(ServiceProgress::new(
                &check.service_name,
                &check.process_type,
                step_ids,
            ))
        });
        Arc::clone(entry.value())
    }

    // =========================================================================
    // Control Plane
    // =========================================================================

    /// Applies a control-plane command. See [`ControlState::apply`].
    pub fn handle_control_command(&self, cmd: ControlCommand) -> Result<SystemState, ControlError> {
        self.control.apply(cmd)
    }

    /// Current control-plane snapshot.
    pub fn system_state(&self) -> SystemState {
        self.control.snapshot()
    }

    // =========================================================================
    // Invalidation
    // =========================================================================

    /// Invalidates cached results.
    ///
    /// `service_name` and `process_type` each accept `"*"`; a non-empty
    /// `handlers` list limits removal to those step entries, otherwise all
    /// step entries of matching keys are wiped. Returns the number of
    /// cache entries touched.
    ///
    /// # Errors
    ///
    /// [`InvalidateError::NotFound`] when an exact, non-wildcard key has
    /// no cache entry. Wildcard requests matching nothing return `Ok(0)`.
    pub fn invalidate_cache(&self, req: &InvalidationRequest) -> Result<usize, InvalidateError> {
        let name_wild = req.service_name == "*";
        let type_wild = req.process_type == "*";

        if !name_wild && !type_wild {
            let key = cache_key(&req.service_name, &req.process_type);
            let cache = self
                .cache
                .get(&key)
                .map(|entry| Arc::clone(entry.value()))
                .ok_or_else(|| InvalidateError::NotFound {
                    service_name: req.service_name.clone(),
                    process_type: req.process_type.clone(),
                })?;
            cache.invalidate(&req.handlers, req.reset_times);
            info!(key, "cache invalidated");
            return Ok(1);
        }

        let mut touched = 0;
        for entry in self.cache.iter() {
            let cache = entry.value();
            let name_match = name_wild || cache.service_name() == req.service_name;
            let type_match = type_wild || cache.process_type() == req.process_type;
            if name_match && type_match {
                cache.invalidate(&req.handlers, req.reset_times);
                touched += 1;
            }
        }
        info!(
            service = %req.service_name,
            process_type = %req.process_type,
            touched,
            "wildcard cache invalidation"
        );
        Ok(touched)
    }

    // =========================================================================
    // Observability
    // =========================================================================

    /// Per-queue statistics, keyed by queue name.
    pub fn queue_stats(&self) -> BTreeMap<String, QueueStats> {
        self.queues.queue_stats()
    }

    /// Progress snapshot for one cache key.
    pub fn job_progress(&self, key: &str) -> Option<ProgressSnapshot> {
        self.progress.get(key).map(|entry| entry.value().snapshot())
    }

    /// Progress snapshots, optionally filtered by service name and type.
    pub fn active_jobs(
        &self,
        service_name: Option<&str>,
        process_type: Option<&str>,
    ) -> BTreeMap<String, ProgressSnapshot> {
        self.progress
            .iter()
            .filter(|entry| {
                let progress = entry.value();
                service_name.map_or(true, |n| progress.service_name() == n)
                    && process_type.map_or(true, |t| progress.process_type() == t)
            })
            .map(|entry| (entry.key().clone(), entry.value().snapshot()))
            .collect()
    }

    /// The most recent `limit` history entries, oldest first.
    pub fn history(&self, limit: usize) -> Vec<Arc<JobResult>> {
        self.history.recent(limit)
    }

    /// Comprehensive debug snapshot across queues, cache, and progress.
    ///
    /// Cache entries are classified valid/expired by comparing `now`
    /// against `last_updated + cache_seconds` per handler.
    pub fn system_debug_info(&self) -> SystemDebugInfo {
        let now = Utc::now();

        let mut cache_entries = BTreeMap::new();
        for entry in self.cache.iter() {
            let snapshot = entry.value().snapshot();
            let mut step_statuses = BTreeMap::new();
            if let Some(service_type) = self.catalog.service_type(&snapshot.process_type) {
                for (step_id, step) in &snapshot.steps {
                    let Some(handler) = service_type.handlers.get(step_id) else {
                        continue;
                    };
                    let status = if step.is_valid(handler.cache_seconds, now) {
                        CacheFreshness::Valid
                    } else {
                        CacheFreshness::Expired
                    };
                    step_statuses.insert(
                        step_id.clone(),
                        StepCacheStatus {
                            status,
                            last_updated: step.last_updated,
                            cache_expires: step.expires_at(handler.cache_seconds),
                            age_secs: (now - step.last_updated).num_seconds(),
                        },
                    );
                }
            }
            cache_entries.insert(
                entry.key().clone(),
                CacheEntryDebug {
                    service_name: snapshot.service_name,
                    process_type: snapshot.process_type,
                    last_updated: snapshot.last_updated,
                    step_statuses,
                },
            );
        }

        let mut processing_items = BTreeMap::new();
        for entry in self.progress.iter() {
            let snapshot = entry.value().snapshot();
            if !matches!(snapshot.status, JobStatus::Processing | JobStatus::Initializing) {
                continue;
            }
            let completed_steps: Vec<String> = snapshot
                .steps
                .iter()
                .filter(|(_, s)| s.status == super::progress::StepStatus::Completed)
                .map(|(id, _)| id.clone())
                .collect();
            let pending_steps: Vec<String> = snapshot
                .steps
                .iter()
                .filter(|(_, s)| s.status == super::progress::StepStatus::Pending)
                .map(|(id, _)| id.clone())
                .collect();
            processing_items.insert(
                entry.key().clone(),
                ProcessingItem {
                    service_name: snapshot.service_name,
                    process_type: snapshot.process_type,
                    status: snapshot.status,
                    start_time: snapshot.start_time,
                    process_ms: (now - snapshot.start_time).num_milliseconds(),
                    completed_steps,
                    pending_steps,
                    total_steps: snapshot.total_steps,
                },
            );
        }

        SystemDebugInfo {
            timestamp: now,
            queue_status: self.queues.queue_stats(),
            cache_status: CacheDebugInfo {
                total_entries: self.cache.len(),
                entries: cache_entries,
            },
            process_status: ProcessDebugInfo {
                active_processes: processing_items.len(),
                processing_items,
            },
        }
    }

    /// System-wide metrics summary.
    pub fn system_metrics(&self) -> SystemMetrics {
        SystemMetrics {
            total_cache_entries: self.cache.len(),
            active_processes: self.progress.len(),
            active_jobs: self.queues.active_job_count(),
            queue_stats: self.queues.queue_stats(),
            system_state: self.control.snapshot(),
        }
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Removes completed progress entries older than `max_age`.
    ///
    /// Returns how many entries were removed. Run periodically by the
    /// sweep task spawned from [`ProcessManager::start`].
    pub fn cleanup_old_progress(&self, max_age: std::time::Duration) -> usize {
        let now = Utc::now();
        let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
        let stale: Vec<String> = self
            .progress
            .iter()
            .filter(|entry| entry.value().is_stale(max_age, now))
            .map(|entry| entry.key().clone())
            .collect();
        let removed = stale.len();
        for key in stale {
            self.progress.remove(&key);
        }
        if removed > 0 {
            debug!(removed, "swept stale progress entries");
        }
        removed
    }
}
