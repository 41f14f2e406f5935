//! Bounded history of completed jobs.
//!
//! Every finished run appends an immutable [`JobResult`] snapshot; past
//! the configured capacity the oldest entry is evicted (FIFO). Purely for
//! observability, never consulted by the scheduling path.

use super::progress::{JobStatus, ProgressSnapshot, StepProgress};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

/// Default history capacity.
pub const DEFAULT_MAX_JOBS: usize = 1000;

/// Immutable snapshot of one completed job.
#[derive(Debug, Clone, Serialize)]
pub struct JobResult {
    pub service_name: String,
    #[serde(rename = "type")]
    pub process_type: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: i64,
    pub status: JobStatus,
    pub partial_failure: bool,
    pub steps: BTreeMap<String, StepProgress>,
    /// Rendered textual tree summary of the run.
    pub tree: String,
}

impl JobResult {
    /// Builds a history entry from a finished progress snapshot.
    pub fn from_snapshot(snapshot: &ProgressSnapshot, tree: String) -> Self {
        Self {
            service_name: snapshot.service_name.clone(),
            process_type: snapshot.process_type.clone(),
            start_time: snapshot.start_time,
            end_time: snapshot.last_updated,
            duration_ms: (snapshot.last_updated - snapshot.start_time).num_milliseconds(),
            status: snapshot.status,
            partial_failure: snapshot.partial_failure,
            steps: snapshot.steps.clone(),
            tree,
        }
    }
}

/// Bounded FIFO ring of completed job snapshots.
pub struct JobHistory {
    max_jobs: usize,
    inner: Mutex<VecDeque<Arc<JobResult>>>,
}

impl JobHistory {
    /// Creates a history bounded to `max_jobs` entries.
    pub fn new(max_jobs: usize) -> Self {
        Self {
            max_jobs,
            inner: Mutex::new(VecDeque::new()),
        }
    }

    /// Appends a snapshot, evicting the oldest entry when at capacity.
    pub fn push(&self, result: JobResult) {
        let mut jobs = self.inner.lock();
        if jobs.len() >= self.max_jobs {
            jobs.pop_front();
        }
        jobs.push_back(Arc::new(result));
    }

    /// The most recent `limit` entries, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<Arc<JobResult>> {
        let jobs = self.inner.lock();
        let skip = jobs.len().saturating_sub(limit);
        jobs.iter().skip(skip).cloned().collect()
    }

    /// Number of retained entries.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether the history is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(name: &str) -> JobResult {
        let now = Utc::now();
        JobResult {
            service_name: name.to_string(),
            process_type: "check".to_string(),
            start_time: now,
            end_time: now,
            duration_ms: 0,
            status: JobStatus::Completed,
            partial_failure: false,
            steps: BTreeMap::new(),
            tree: String::new(),
        }
    }

    #[test]
    fn test_history_evicts_oldest_past_capacity() {
        let history = JobHistory::new(2);
        history.push(result("a"));
        history.push(result("b"));
        history.push(result("c"));

        assert_eq!(history.len(), 2);
        let recent = history.recent(10);
        assert_eq!(recent[0].service_name, "b");
        assert_eq!(recent[1].service_name, "c");
    }

    #[test]
    fn test_recent_limits_from_the_end() {
        let history = JobHistory::new(10);
        for name in ["a", "b", "c"] {
            history.push(result(name));
        }

        let recent = history.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].service_name, "b");
        assert_eq!(recent[1].service_name, "c");
    }
}
