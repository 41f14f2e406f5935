//! Per-key execution progress tracking.
//!
//! One [`ServiceProgress`] exists per cache key, created on first dispatch
//! and garbage-collected by a periodic sweep once completed and old enough
//! (see [`super::process::ProcessManager::cleanup_old_progress`]).
//!
//! The instance is reused across runs for the same key: step statuses from
//! an earlier run persist, which is what lets a step whose dependency was
//! served from cache still see that dependency as completed.

use super::types::{OutcomeStatus, StepOutcome};
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

// =============================================================================
// Statuses
// =============================================================================

/// Job-level status of a progress entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Initializing,
    Processing,
    Completed,
    Failed,
}

/// Per-step execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Completed,
    Failed,
}

// =============================================================================
// Step Progress
// =============================================================================

/// Execution state of one step within a progress entry.
#[derive(Debug, Clone, Serialize)]
pub struct StepProgress {
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<StepOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

impl StepProgress {
    fn pending() -> Self {
        Self {
            status: StepStatus::Pending,
            result: None,
            start_time: None,
            end_time: None,
        }
    }
}

/// Point-in-time copy of a progress entry.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    pub service_name: String,
    pub process_type: String,
    pub status: JobStatus,
    pub total_steps: usize,
    pub completed_steps: usize,
    pub partial_failure: bool,
    pub steps: BTreeMap<String, StepProgress>,
    pub start_time: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

// =============================================================================
// Service Progress
// =============================================================================

struct ProgressInner {
    status: JobStatus,
    steps: HashMap<String, StepProgress>,
    completed_steps: usize,
    partial_failure: bool,
    start_time: DateTime<Utc>,
    last_updated: DateTime<Utc>,
}

impl ProgressInner {
    fn recount(&mut self) {
        self.completed_steps = self
            .steps
            .values()
            .filter(|s| s.status == StepStatus::Completed)
            .count();
    }
}

/// Execution state for one cache key across its runs.
///
/// Holds its own lock, independent of the manager-level map lock, so
/// debug reads of one key never block execution of another.
pub struct ServiceProgress {
    service_name: String,
    process_type: String,
    total_steps: usize,
    inner: RwLock<ProgressInner>,
}

impl ServiceProgress {
    /// Creates a progress entry with every configured step pending.
    pub fn new(
        service_name: impl Into<String>,
        process_type: impl Into<String>,
        step_ids: impl IntoIterator<Item = String>,
    ) -> Self {
        let steps: HashMap<String, StepProgress> = step_ids
            .into_iter()
            .map(|id| (id, StepProgress::pending()))
            .collect();
        let now = Utc::now();
        Self {
            service_name: service_name.into(),
            process_type: process_type.into(),
            total_steps: steps.len(),
            inner: RwLock::new(ProgressInner {
                status: JobStatus::Initializing,
                steps,
                completed_steps: 0,
                partial_failure: false,
                start_time: now,
                last_updated: now,
            }),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn process_type(&self) -> &str {
        &self.process_type
    }

    /// Current job-level status.
    pub fn status(&self) -> JobStatus {
        self.inner.read().status
    }

    /// Marks the start of a run: the steps about to execute go back to
    /// pending (their expired results are discarded), the job becomes
    /// `processing`, and the completed count is recomputed.
    pub fn begin_run(&self, steps_to_run: &[String]) {
        let mut inner = self.inner.write();
        for step_id in steps_to_run {
            inner
                .steps
                .insert(step_id.clone(), StepProgress::pending());
        }
        inner.recount();
        inner.status = JobStatus::Processing;
        inner.partial_failure = false;
        inner.start_time = Utc::now();
        inner.last_updated = inner.start_time;
    }

    /// Whether a step currently shows `completed` (dependency gate).
    pub fn step_completed(&self, step_id: &str) -> bool {
        self.inner
            .read()
            .steps
            .get(step_id)
            .is_some_and(|s| s.status == StepStatus::Completed)
    }

    /// Stamps a step's start time.
    pub fn start_step(&self, step_id: &str, start: DateTime<Utc>) {
        let mut inner = self.inner.write();
        if let Some(step) = inner.steps.get_mut(step_id) {
            step.start_time = Some(start);
        }
        inner.last_updated = start;
    }

    /// Records a handler outcome for a step.
    ///
    /// A `completed` outcome marks the step completed; a `failed` outcome
    /// marks it failed and flips the job-level partial-failure flag.
    pub fn finish_step(&self, step_id: &str, outcome: StepOutcome) {
        let now = Utc::now();
        let mut inner = self.inner.write();
        let failed = outcome.status == OutcomeStatus::Failed;
        if let Some(step) = inner.steps.get_mut(step_id) {
            step.status = if failed {
                StepStatus::Failed
            } else {
                StepStatus::Completed
            };
            step.end_time = Some(outcome.end_time);
            step.result = Some(outcome);
        }
        if failed {
            inner.partial_failure = true;
        }
        inner.recount();
        inner.last_updated = now;
    }

    /// Marks a step failed without a handler invocation (e.g. no handler
    /// configured for it) and flips the partial-failure flag.
    pub fn fail_step(&self, step_id: &str, message: impl Into<String>) {
        let mut inner = self.inner.write();
        let outcome = StepOutcome::now(OutcomeStatus::Failed, message);
        inner.steps.insert(
            step_id.to_string(),
            StepProgress {
                status: StepStatus::Failed,
                end_time: Some(outcome.end_time),
                start_time: Some(outcome.start_time),
                result: Some(outcome),
            },
        );
        inner.partial_failure = true;
        inner.last_updated = Utc::now();
    }

    /// Marks the whole run completed.
    pub fn complete(&self) {
        let mut inner = self.inner.write();
        inner.status = JobStatus::Completed;
        inner.last_updated = Utc::now();
    }

    /// Marks the whole run failed (panic recovery path).
    pub fn fail(&self) {
        let mut inner = self.inner.write();
        inner.status = JobStatus::Failed;
        inner.last_updated = Utc::now();
    }

    /// Step results recorded so far, for the end-of-run cache fold-in.
    pub fn results(&self) -> Vec<(String, StepOutcome)> {
        self.inner
            .read()
            .steps
            .iter()
            .filter_map(|(id, step)| step.result.clone().map(|r| (id.clone(), r)))
            .collect()
    }

    /// Point-in-time copy of the whole entry.
    pub fn snapshot(&self) -> ProgressSnapshot {
        let inner = self.inner.read();
        ProgressSnapshot {
            service_name: self.service_name.clone(),
            process_type: self.process_type.clone(),
            status: inner.status,
            total_steps: self.total_steps,
            completed_steps: inner.completed_steps,
            partial_failure: inner.partial_failure,
            steps: inner
                .steps
                .iter()
                .map(|(id, step)| (id.clone(), step.clone()))
                .collect(),
            start_time: inner.start_time,
            last_updated: inner.last_updated,
        }
    }

    /// Whether this entry is completed and older than `max_age` (sweep
    /// eligibility).
    pub fn is_stale(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        let inner = self.inner.read();
        inner.status == JobStatus::Completed && now - inner.last_updated > max_age
    }
}
