//! Job scheduling and result caching.
//!
//! The scheduler accepts check requests for (service, process type) pairs
//! and answers each one in exactly one of three ways: `cached` when every
//! configured step has a fresh result, `processing` when a job for that
//! key is already in flight, or `queued` after enqueueing the expired
//! steps as a job.
//!
//! # Architecture
//!
//! - [`process::ProcessManager`] is the orchestrator: it owns the result
//!   caches, the progress map, the control plane, and the job history,
//!   and runs the per-job step loop.
//! - [`queue::QueueManager`] owns the named work queues. Jobs are
//!   classified into exactly one queue and dispatched in a fixed priority
//!   order with per-queue concurrency caps.
//! - Dispatch is polling-based: a fixed pool of workers (see
//!   [`poller`]) each polls for the next dispatchable job on a 100ms
//!   cadence and executes it inline. There is no wakeup signalling;
//!   dispatch latency is bounded by the poll interval.
//! - [`state::ControlState`] is the pause/resume/step/reset control
//!   plane, consulted by every job between steps.
//!
//! Per-key invariant: at most one job per cache key is in flight at any
//! instant, enforced by the per-queue in-flight sets.

pub mod cache;
pub mod config;
pub mod debug;
pub mod history;
pub mod poller;
pub mod process;
pub mod progress;
pub mod queue;
pub mod state;
pub mod tree;
pub mod types;

pub use cache::{CacheSnapshot, ServiceCache, StepCache};
pub use config::{PauseBehavior, SchedulerConfig};
pub use debug::{
    CacheDebugInfo, CacheEntryDebug, CacheFreshness, ProcessDebugInfo, ProcessingItem,
    StepCacheStatus, SystemDebugInfo, SystemMetrics,
};
pub use history::{JobHistory, JobResult, DEFAULT_MAX_JOBS};
pub use process::{InvalidateError, ProcessManager, RequestError};
pub use progress::{JobStatus, ProgressSnapshot, ServiceProgress, StepProgress, StepStatus};
pub use queue::{
    DispatchedJob, QueueError, QueueManager, QueueStats, QueuedCheck, QueuedJobInfo, AI_QUEUE,
    DEFAULT_QUEUE, PERFORMANCE_QUEUE, QUEUE_PRIORITY,
};
pub use state::{
    ControlCommand, ControlError, ControlState, StepSignal, SystemState, SystemStatus,
};
pub use tree::render_tree;
pub use types::{
    cache_key, CachedStep, InvalidationRequest, OutcomeStatus, ServiceRequest, ServiceResponse,
    StepOutcome,
};
