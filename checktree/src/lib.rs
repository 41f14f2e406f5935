//! Checktree - in-process job scheduling and result caching for service checks
//!
//! This library accepts named, typed check requests, serves fresh cached
//! results where possible, and otherwise decomposes each request into
//! dependent handler steps routed through named priority queues and executed
//! under bounded concurrency.
//!
//! # High-Level API
//!
//! ```ignore
//! use checktree::catalog::Catalog;
//! use checktree::registry::HandlerRegistry;
//! use checktree::scheduler::{ProcessManager, SchedulerConfig, ServiceRequest};
//! use tokio_util::sync::CancellationToken;
//!
//! let catalog = Catalog::from_json_file("config/service-config.json")?;
//! let mut registry = HandlerRegistry::new();
//! registry.register_fn("dnsHandler", |ctx| async move { /* ... */ });
//!
//! let manager = ProcessManager::new(catalog, registry, SchedulerConfig::default())?;
//! let shutdown = CancellationToken::new();
//! manager.start(shutdown.clone());
//!
//! let response = manager.handle_request(&ServiceRequest::new("payments", "check"))?;
//! ```

pub mod catalog;
pub mod logging;
pub mod registry;
pub mod scheduler;

/// Version of the checktree library and CLI.
///
/// This is synchronized across all components in the workspace.
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
