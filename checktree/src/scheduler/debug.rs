//! Observability snapshot types.
//!
//! Read-only aggregations across queues, cache, and progress, built by
//! [`super::process::ProcessManager::system_debug_info`] and
//! [`super::process::ProcessManager::system_metrics`]. All shapes derive
//! serde; the embedding front end serves them as-is.

use super::progress::JobStatus;
use super::queue::QueueStats;
use super::state::SystemState;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Freshness classification of a cached step entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheFreshness {
    Valid,
    Expired,
}

/// Debug view of one cached step.
#[derive(Debug, Clone, Serialize)]
pub struct StepCacheStatus {
    pub status: CacheFreshness,
    pub last_updated: DateTime<Utc>,
    pub cache_expires: DateTime<Utc>,
    pub age_secs: i64,
}

/// Debug view of one cache entry.
#[derive(Debug, Clone, Serialize)]
pub struct CacheEntryDebug {
    pub service_name: String,
    #[serde(rename = "type")]
    pub process_type: String,
    pub last_updated: DateTime<Utc>,
    pub step_statuses: BTreeMap<String, StepCacheStatus>,
}

/// Cache section of the debug snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct CacheDebugInfo {
    pub total_entries: usize,
    pub entries: BTreeMap<String, CacheEntryDebug>,
}

/// One in-flight or initializing progress entry.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingItem {
    pub service_name: String,
    #[serde(rename = "type")]
    pub process_type: String,
    pub status: JobStatus,
    pub start_time: DateTime<Utc>,
    pub process_ms: i64,
    pub completed_steps: Vec<String>,
    pub pending_steps: Vec<String>,
    pub total_steps: usize,
}

/// Progress section of the debug snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessDebugInfo {
    pub active_processes: usize,
    pub processing_items: BTreeMap<String, ProcessingItem>,
}

/// Comprehensive point-in-time debug snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct SystemDebugInfo {
    pub timestamp: DateTime<Utc>,
    pub queue_status: BTreeMap<String, QueueStats>,
    pub cache_status: CacheDebugInfo,
    pub process_status: ProcessDebugInfo,
}

/// System-wide metrics summary.
#[derive(Debug, Clone, Serialize)]
pub struct SystemMetrics {
    pub total_cache_entries: usize,
    pub active_processes: usize,
    pub active_jobs: usize,
    pub queue_stats: BTreeMap<String, QueueStats>,
    pub system_state: SystemState,
}
