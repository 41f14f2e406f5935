//! Static service catalog.
//!
//! The catalog is the configuration the scheduler is built from: which
//! service types exist, which handler steps each type runs (with TTLs and
//! dependencies), and which named queues are available with what limits.
//!
//! The catalog is supplied once at construction and never re-read at
//! runtime. [`Catalog::validate`] checks referential integrity up front so
//! a bad configuration is rejected before any traffic is accepted:
//! every configured handler must be registered, every dependency must name
//! a step of the same service type, the dependency graph must be acyclic,
//! and every queue a service type references must exist.

mod validate;

pub use validate::StepOrders;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

// =============================================================================
// Configuration Types
// =============================================================================

/// Configuration for one handler step of a service type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerConfig {
    /// Registered handler function name to invoke for this step.
    pub name: String,
    /// Seconds a cached result of this step stays valid.
    pub cache_seconds: u64,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Step ids (of the same service type) that must complete first.
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// One entry of the service-type catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceType {
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Named queues this service type may be routed to.
    #[serde(default)]
    pub queues: Vec<String>,
    /// Handler steps keyed by step id.
    pub handlers: BTreeMap<String, HandlerConfig>,
}

/// Static per-queue limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueConfig {
    /// Queue name.
    pub name: String,
    /// Maximum jobs from this queue in flight at once.
    pub max_concurrent: usize,
    /// Maximum jobs waiting in this queue.
    pub queue_size: usize,
}

/// The complete static catalog: service types plus queue limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Catalog {
    /// Service types keyed by process type name.
    pub service_types: BTreeMap<String, ServiceType>,
    /// Named queue configurations.
    pub queues: Vec<QueueConfig>,
}

impl Catalog {
    /// Loads a catalog from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Io`] if the file cannot be read and
    /// [`CatalogError::Parse`] if it is not a valid catalog document.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Returns the service type for a process type name, if configured.
    pub fn service_type(&self, process_type: &str) -> Option<&ServiceType> {
        self.service_types.get(process_type)
    }

    /// Returns the handler configuration for one step of a service type.
    pub fn handler(&self, process_type: &str, step_id: &str) -> Option<&HandlerConfig> {
        self.service_types
            .get(process_type)?
            .handlers
            .get(step_id)
    }

    /// Returns the queue configuration with the given name, if any.
    pub fn queue(&self, name: &str) -> Option<&QueueConfig> {
        self.queues.iter().find(|q| q.name == name)
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Catalog loading and validation errors.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Failed to read the catalog file.
    #[error("failed to read catalog file: {0}")]
    Io(#[from] std::io::Error),

    /// The catalog file is not valid JSON for the expected shape.
    #[error("failed to parse catalog: {0}")]
    Parse(#[from] serde_json::Error),

    /// A configured step names a handler with no registered implementation.
    #[error("service type '{service_type}' step '{step_id}' references unregistered handler '{handler}'")]
    UnknownHandler {
        service_type: String,
        step_id: String,
        handler: String,
    },

    /// A step dependency does not name a step of the same service type.
    #[error("service type '{service_type}' step '{step_id}' depends on unknown step '{dependency}'")]
    UnknownDependency {
        service_type: String,
        step_id: String,
        dependency: String,
    },

    /// The dependency graph of a service type contains a cycle.
    #[error("service type '{service_type}' has a dependency cycle involving step '{step_id}'")]
    DependencyCycle {
        service_type: String,
        step_id: String,
    },

    /// A service type references a queue that is not configured.
    #[error("service type '{service_type}' references unknown queue '{queue}'")]
    UnknownQueue {
        service_type: String,
        queue: String,
    },
}
