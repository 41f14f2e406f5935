//! Per-key result cache with per-step TTLs.
//!
//! One [`ServiceCache`] exists per cache key, created lazily on the first
//! request and living until explicitly invalidated (or process exit). Each
//! step's cached result carries its own timestamp; a step entry is valid
//! iff `now - last_updated < cache_seconds` for that step's handler
//! configuration, otherwise it is expired and treated as absent.
//!
//! Cache population happens once per job run, at the end of a full run,
//! never incrementally per step.

use super::types::{CachedStep, ServiceResponse, StepOutcome};
use crate::catalog::HandlerConfig;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// One cached step result with its freshness stamp.
#[derive(Debug, Clone, Serialize)]
pub struct StepCache {
    pub result: StepOutcome,
    pub last_updated: DateTime<Utc>,
}

impl StepCache {
    /// Whether this entry is still fresh for the given TTL.
    pub fn is_valid(&self, cache_seconds: u64, now: DateTime<Utc>) -> bool {
        now - self.last_updated < Duration::seconds(cache_seconds as i64)
    }

    /// The instant this entry stops being fresh.
    pub fn expires_at(&self, cache_seconds: u64) -> DateTime<Utc> {
        self.last_updated + Duration::seconds(cache_seconds as i64)
    }
}

/// Point-in-time copy of a service cache for debug output.
#[derive(Debug, Clone, Serialize)]
pub struct CacheSnapshot {
    pub service_name: String,
    pub process_type: String,
    pub last_updated: DateTime<Utc>,
    pub steps: BTreeMap<String, StepCache>,
}

struct CacheInner {
    steps: HashMap<String, StepCache>,
    last_updated: DateTime<Utc>,
}

/// Cached step results for one cache key.
///
/// Holds its own lock, independent of the manager-level map: the map lock
/// only guards membership, so read-heavy debug calls on one entry never
/// serialize against the hot path on another.
pub struct ServiceCache {
    service_name: String,
    process_type: String,
    inner: RwLock<CacheInner>,
}

impl ServiceCache {
    /// Creates an empty cache entry for a key.
    pub fn new(service_name: impl Into<String>, process_type: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            process_type: process_type.into(),
            inner: RwLock::new(CacheInner {
                steps: HashMap::new(),
                last_updated: Utc::now(),
            }),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn process_type(&self) -> &str {
        &self.process_type
    }

    /// Returns the steps of `order` whose cached results are expired or
    /// missing, preserving the supplied (dependency-sorted) order.
    pub fn expired_steps(
        &self,
        order: &[String],
        handlers: &BTreeMap<String, HandlerConfig>,
        now: DateTime<Utc>,
    ) -> Vec<String> {
        let inner = self.inner.read();
        order
            .iter()
            .filter(|step_id| {
                let Some(config) = handlers.get(*step_id) else {
                    return false;
                };
                match inner.steps.get(*step_id) {
                    Some(entry) => !entry.is_valid(config.cache_seconds, now),
                    None => true,
                }
            })
            .cloned()
            .collect()
    }

    /// Builds a `cached` response from every stored step result, verbatim.
    pub fn cached_response(&self) -> ServiceResponse {
        let inner = self.inner.read();
        let steps = inner
            .steps
            .iter()
            .map(|(step_id, entry)| {
                (
                    step_id.clone(),
                    CachedStep {
                        last_update: entry.last_updated,
                        result: entry.result.clone(),
                    },
                )
            })
            .collect();
        ServiceResponse::Cached {
            last_update: inner.last_updated,
            steps,
        }
    }

    /// Folds a finished run's results in, stamping everything with `now`.
    pub fn store_results<'a>(
        &self,
        results: impl IntoIterator<Item = (&'a str, &'a StepOutcome)>,
        now: DateTime<Utc>,
    ) {
        let mut inner = self.inner.write();
        for (step_id, result) in results {
            inner.steps.insert(
                step_id.to_string(),
                StepCache {
                    result: result.clone(),
                    last_updated: now,
                },
            );
        }
        inner.last_updated = now;
    }

    /// Removes step entries (all of them when `handlers` is empty) and
    /// optionally zeroes the service-level stamp. Returns how many step
    /// entries were removed.
    pub fn invalidate(&self, handlers: &[String], reset_times: bool) -> usize {
        let mut inner = self.inner.write();
        let removed = if handlers.is_empty() {
            let count = inner.steps.len();
            inner.steps.clear();
            count
        } else {
            handlers
                .iter()
                .filter(|step_id| inner.steps.remove(*step_id).is_some())
                .count()
        };
        if reset_times {
            inner.last_updated = DateTime::UNIX_EPOCH;
        }
        removed
    }

    /// Point-in-time copy for debug output.
    pub fn snapshot(&self) -> CacheSnapshot {
        let inner = self.inner.read();
        CacheSnapshot {
            service_name: self.service_name.clone(),
            process_type: self.process_type.clone(),
            last_updated: inner.last_updated,
            steps: inner
                .steps
                .iter()
                .map(|(id, entry)| (id.clone(), entry.clone()))
                .collect(),
        }
    }
}
