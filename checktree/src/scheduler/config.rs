//! Scheduler configuration.

use std::time::Duration;

// =============================================================================
// Configuration Constants
// =============================================================================

/// Default number of polling workers.
pub const DEFAULT_POLLER_COUNT: usize = 5;

/// Default poll cadence; bounds dispatch latency.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default time a job waits for a step command in step mode.
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(30);

/// Default cadence of the stale-progress sweep.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Default age past which completed progress entries are swept.
pub const DEFAULT_PROGRESS_MAX_AGE: Duration = Duration::from_secs(3600);

// =============================================================================
// Pause Behavior
// =============================================================================

/// What happens to a job aborted by a system pause.
///
/// The scheduler stops a running job after its current step when the
/// system is paused. This setting decides the fate of the remainder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PauseBehavior {
    /// Leave the job where it stopped; a later request re-derives the
    /// remaining work from the cache.
    #[default]
    Abandon,
    /// Re-enqueue the remaining steps so a later resume picks them up.
    Requeue,
}

// =============================================================================
// Scheduler Configuration
// =============================================================================

/// Configuration for the process manager and its poller pool.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of polling workers.
    pub poller_count: usize,
    /// Cadence at which each poller asks for the next job.
    pub poll_interval: Duration,
    /// Step-mode rendezvous timeout.
    pub step_timeout: Duration,
    /// Fate of jobs aborted by a pause.
    pub pause_behavior: PauseBehavior,
    /// Completed-job history capacity.
    pub max_history: usize,
    /// Cadence of the stale-progress sweep.
    pub cleanup_interval: Duration,
    /// Age past which completed progress entries are swept.
    pub progress_max_age: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poller_count: DEFAULT_POLLER_COUNT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            step_timeout: DEFAULT_STEP_TIMEOUT,
            pause_behavior: PauseBehavior::default(),
            max_history: super::history::DEFAULT_MAX_JOBS,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            progress_max_age: DEFAULT_PROGRESS_MAX_AGE,
        }
    }
}
