//! Multi-queue manager with priority dispatch.
//!
//! The queue manager owns a fixed set of named work queues, each with its
//! own capacity and concurrency cap. Jobs are classified into exactly one
//! queue by a stable, order-independent membership test on their step set,
//! and dispatched in a fixed priority order across queues with FIFO order
//! within each queue.
//!
//! Lock layering (never taken in the reverse order): the manager-level
//! lock guards the name-to-queue map; each queue's own lock guards its
//! item list and in-flight set.

use super::types::{cache_key, ServiceRequest};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::catalog::QueueConfig;

// =============================================================================
// Queue Names
// =============================================================================

/// Queue for step sets containing an "ai"-named step. Highest priority.
pub const AI_QUEUE: &str = "ai_analysis";

/// Queue for step sets containing a "performance"-named step.
pub const PERFORMANCE_QUEUE: &str = "performance_analysis";

/// Default queue for everything else. Lowest priority.
pub const DEFAULT_QUEUE: &str = "service_checks";

/// Fixed scan order for dispatch decisions.
pub const QUEUE_PRIORITY: [&str; 3] = [AI_QUEUE, PERFORMANCE_QUEUE, DEFAULT_QUEUE];

// =============================================================================
// Queued Work
// =============================================================================

/// A unit of queued work.
#[derive(Debug, Clone, Serialize)]
pub struct QueuedCheck {
    pub service_name: String,
    #[serde(rename = "type")]
    pub process_type: String,
    /// Expired-or-missing steps to execute, in dependency order.
    pub steps_to_run: Vec<String>,
    pub queue_time: DateTime<Utc>,
    /// 1-indexed position in its queue; recomputed when the head leaves.
    pub position: usize,
    /// Optional service URL passed through to handlers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_url: Option<String>,
}

impl QueuedCheck {
    /// Builds a queued check from a request and its expired step set.
    pub fn from_request(req: &ServiceRequest, steps_to_run: Vec<String>) -> Self {
        Self {
            service_name: req.name.clone(),
            process_type: req.process_type.clone(),
            steps_to_run,
            queue_time: Utc::now(),
            position: 0,
            service_url: req.url.clone(),
        }
    }

    /// The cache key of this check.
    pub fn cache_key(&self) -> String {
        cache_key(&self.service_name, &self.process_type)
    }
}

/// A check handed to a poller, tagged with the queue it came from so the
/// in-flight slot can be released on completion.
#[derive(Debug)]
pub struct DispatchedJob {
    pub queue: String,
    pub check: QueuedCheck,
}

/// Enqueue receipt.
#[derive(Debug, Clone)]
pub struct Enqueued {
    pub queue: String,
    pub position: usize,
    pub queue_time: DateTime<Utc>,
}

// =============================================================================
// Errors
// =============================================================================

/// Queueing errors. Queue-full is the only runtime failure; it is
/// returned synchronously and never retried by this component.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The target queue already holds `capacity` items.
    #[error("queue '{queue}' is full (capacity: {capacity})")]
    Full { queue: String, capacity: usize },

    /// The classified target queue is not configured.
    #[error("queue '{queue}' not found")]
    UnknownQueue { queue: String },
}

// =============================================================================
// Statistics
// =============================================================================

/// Detail line for one queued job.
#[derive(Debug, Clone, Serialize)]
pub struct QueuedJobInfo {
    pub service_name: String,
    #[serde(rename = "type")]
    pub process_type: String,
    pub queue_position: usize,
    pub queue_time: DateTime<Utc>,
    pub wait_ms: i64,
    pub steps_to_run: Vec<String>,
}

/// Statistics for one queue.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub queue_name: String,
    pub queue_length: usize,
    pub max_queue_size: usize,
    pub active_checks: usize,
    pub queued_services: Vec<String>,
    pub queued_jobs: Vec<QueuedJobInfo>,
}

// =============================================================================
// Work Queue
// =============================================================================

struct QueueInner {
    items: VecDeque<QueuedCheck>,
    /// Cache keys currently in flight from this queue.
    processing: HashSet<String>,
}

struct WorkQueue {
    name: String,
    max_size: usize,
    max_concurrent: usize,
    inner: Mutex<QueueInner>,
}

impl WorkQueue {
    fn new(config: &QueueConfig) -> Self {
        Self {
            name: config.name.clone(),
            max_size: config.queue_size,
            max_concurrent: config.max_concurrent,
            inner: Mutex::new(QueueInner {
                items: VecDeque::new(),
                processing: HashSet::new(),
            }),
        }
    }

    fn stats(&self, now: DateTime<Utc>) -> QueueStats {
        let inner = self.inner.lock();
        QueueStats {
            queue_name: self.name.clone(),
            queue_length: inner.items.len(),
            max_queue_size: self.max_size,
            active_checks: inner.processing.len(),
            queued_services: inner
                .items
                .iter()
                .map(|item| format!("{} ({})", item.service_name, item.process_type))
                .collect(),
            queued_jobs: inner
                .items
                .iter()
                .map(|item| QueuedJobInfo {
                    service_name: item.service_name.clone(),
                    process_type: item.process_type.clone(),
                    queue_position: item.position,
                    queue_time: item.queue_time,
                    wait_ms: (now - item.queue_time).num_milliseconds(),
                    steps_to_run: item.steps_to_run.clone(),
                })
                .collect(),
        }
    }
}

// =============================================================================
// Queue Manager
// =============================================================================

/// Owns the named work queues; classifies, enqueues, and dispatches work.
pub struct QueueManager {
    queues: RwLock<HashMap<String, Arc<WorkQueue>>>,
}

impl QueueManager {
    /// Creates a manager with one work queue per configuration entry.
    pub fn new(configs: &[QueueConfig]) -> Self {
        let queues = configs
            .iter()
            .map(|cfg| (cfg.name.clone(), Arc::new(WorkQueue::new(cfg))))
            .collect();
        Self {
            queues: RwLock::new(queues),
        }
    }

    /// Classifies a step set into its target queue name.
    ///
    /// A stable membership test, not a priority score: a step id starting
    /// with `ai` routes to the AI queue; failing that, one starting with
    /// `performance` routes to the performance queue; everything else goes
    /// to the default queue.
    pub fn classify(steps: &[String]) -> &'static str {
        if steps.iter().any(|s| s.starts_with("ai")) {
            AI_QUEUE
        } else if steps.iter().any(|s| s.starts_with("performance")) {
            PERFORMANCE_QUEUE
        } else {
            DEFAULT_QUEUE
        }
    }

    /// Enqueues a job into its classified queue.
    ///
    /// # Errors
    ///
    /// [`QueueError::Full`] when the target queue is at capacity (no
    /// mutation is performed) and [`QueueError::UnknownQueue`] when the
    /// classified queue is not configured.
    pub fn enqueue_job(&self, mut check: QueuedCheck) -> Result<Enqueued, QueueError> {
        let target = Self::classify(&check.steps_to_run);
        let queue = self.queue(target).ok_or_else(|| QueueError::UnknownQueue {
            queue: target.to_string(),
        })?;

        let mut inner = queue.inner.lock();
        if inner.items.len() >= queue.max_size {
            return Err(QueueError::Full {
                queue: target.to_string(),
                capacity: queue.max_size,
            });
        }

        check.queue_time = Utc::now();
        check.position = inner.items.len() + 1;
        let receipt = Enqueued {
            queue: target.to_string(),
            position: check.position,
            queue_time: check.queue_time,
        };
        debug!(
            service = %check.service_name,
            queue = target,
            position = check.position,
            "job enqueued"
        );
        inner.items.push_back(check);
        Ok(receipt)
    }

    /// Returns the next dispatchable job, or `None` when every queue is
    /// empty or saturated.
    ///
    /// Scans queues in the fixed priority order, takes the head of the
    /// first queue that is non-empty and below its concurrency cap, marks
    /// its key in flight, and recomputes 1-indexed positions for the rest
    /// of that queue. Never blocks; callers poll.
    pub fn process_next_job(&self) -> Option<DispatchedJob> {
        for name in QUEUE_PRIORITY {
            let Some(queue) = self.queue(name) else {
                continue;
            };

            let mut inner = queue.inner.lock();
            if inner.items.is_empty() || inner.processing.len() >= queue.max_concurrent {
                continue;
            }

            // Head exists: checked non-empty above.
            let check = inner.items.pop_front()?;
            inner.processing.insert(check.cache_key());
            for (index, item) in inner.items.iter_mut().enumerate() {
                item.position = index + 1;
            }
            drop(inner);

            debug!(queue = name, service = %check.service_name, "job dispatched");
            return Some(DispatchedJob {
                queue: name.to_string(),
                check,
            });
        }
        None
    }

    /// Releases the in-flight slot a dispatched job held.
    pub fn mark_job_completed(&self, queue_name: &str, key: &str) {
        if let Some(queue) = self.queue(queue_name) {
            queue.inner.lock().processing.remove(key);
            debug!(queue = queue_name, key, "job slot released");
        }
    }

    /// Whether a key is in flight from any queue.
    pub fn is_processing(&self, key: &str) -> bool {
        let queues = self.queues.read();
        queues
            .values()
            .any(|queue| queue.inner.lock().processing.contains(key))
    }

    /// Position of a queued (not yet dispatched) key, scanning all queues.
    pub fn get_position(&self, key: &str) -> Option<usize> {
        let queues = self.queues.read();
        for queue in queues.values() {
            let inner = queue.inner.lock();
            if let Some(item) = inner.items.iter().find(|item| item.cache_key() == key) {
                return Some(item.position);
            }
        }
        None
    }

    /// Copy of the queued entry for a key, if one is waiting.
    pub fn queued_snapshot(&self, key: &str) -> Option<QueuedCheck> {
        let queues = self.queues.read();
        for queue in queues.values() {
            let inner = queue.inner.lock();
            if let Some(item) = inner.items.iter().find(|item| item.cache_key() == key) {
                return Some(item.clone());
            }
        }
        None
    }

    /// Per-queue statistics, keyed by queue name.
    pub fn queue_stats(&self) -> BTreeMap<String, QueueStats> {
        let now = Utc::now();
        let queues = self.queues.read();
        queues
            .iter()
            .map(|(name, queue)| (name.clone(), queue.stats(now)))
            .collect()
    }

    /// Total jobs currently in flight across all queues.
    pub fn active_job_count(&self) -> usize {
        let queues = self.queues.read();
        queues
            .values()
            .map(|queue| queue.inner.lock().processing.len())
            .sum()
    }

    fn queue(&self, name: &str) -> Option<Arc<WorkQueue>> {
        self.queues.read().get(name).cloned()
    }
}
