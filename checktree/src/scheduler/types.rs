//! Request, response, and step outcome types.
//!
//! Everything here crosses the library boundary (the embedding front end
//! submits these and receives these back), so it all derives serde.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Builds the cache key identifying one logical, schedulable unit of work.
///
/// The pairing of service name and process type; every cross-component
/// lookup in the scheduler goes through this string.
pub fn cache_key(service_name: &str, process_type: &str) -> String {
    format!("{service_name}-{process_type}")
}

// =============================================================================
// Requests
// =============================================================================

/// An inbound check request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRequest {
    /// Service name (e.g. "payments").
    pub name: String,
    /// Process type, resolved against the catalog (e.g. "check").
    #[serde(rename = "type")]
    pub process_type: String,
    /// Optional service URL passed through to handlers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Requested priority; informational, routing is step-set based.
    #[serde(default)]
    pub priority: i32,
}

impl ServiceRequest {
    /// Creates a request with just a name and process type.
    pub fn new(name: impl Into<String>, process_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            process_type: process_type.into(),
            url: None,
            priority: 0,
        }
    }

    /// The cache key for this request.
    pub fn cache_key(&self) -> String {
        cache_key(&self.name, &self.process_type)
    }
}

/// A cache invalidation request.
///
/// `service_name` and `process_type` each accept the `"*"` wildcard.
/// A non-empty `handlers` list limits invalidation to those step entries;
/// otherwise all step entries of matching keys are wiped. `reset_times`
/// additionally zeroes the service-level last-updated stamp.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvalidationRequest {
    pub service_name: String,
    #[serde(rename = "type")]
    pub process_type: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub handlers: Vec<String>,
    #[serde(default)]
    pub reset_times: bool,
}

// =============================================================================
// Step Outcomes
// =============================================================================

/// Status reported by a handler invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    /// The handler ran to completion.
    Completed,
    /// The handler ran and reported a failure.
    Failed,
}

/// The result of one handler invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutcome {
    pub status: OutcomeStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl StepOutcome {
    /// Creates an outcome stamped with the current instant for both times.
    ///
    /// Handlers doing real work should stamp their own start/end instead.
    pub fn now(status: OutcomeStatus, message: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            status,
            message: message.into(),
            data: None,
            start_time: now,
            end_time: now,
        }
    }

    /// Attaches structured payload data to the outcome.
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

// =============================================================================
// Responses
// =============================================================================

/// A cached step served back verbatim from the result cache.
#[derive(Debug, Clone, Serialize)]
pub struct CachedStep {
    pub last_update: DateTime<Utc>,
    pub result: StepOutcome,
}

/// Response to a check request.
///
/// Serializes with a `status` tag using the `queued` / `processing` /
/// `cached` vocabulary the front end relies on.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ServiceResponse {
    /// Work was enqueued (or was already waiting in a queue).
    Queued {
        cache_key: String,
        position: usize,
        queue_time: DateTime<Utc>,
        steps_to_run: Vec<String>,
    },
    /// A job for this key is already in flight.
    Processing {
        cache_key: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        position: Option<usize>,
        start_time: DateTime<Utc>,
    },
    /// Every step was fresh; results served straight from cache.
    Cached {
        last_update: DateTime<Utc>,
        steps: BTreeMap<String, CachedStep>,
    },
}

impl ServiceResponse {
    /// The `status` discriminant as it appears on the wire.
    pub fn status(&self) -> &'static str {
        match self {
            ServiceResponse::Queued { .. } => "queued",
            ServiceResponse::Processing { .. } => "processing",
            ServiceResponse::Cached { .. } => "cached",
        }
    }
}
