//! Handler registry.
//!
//! Handlers are the opaque business-logic functions invoked per step. The
//! catalog refers to them by name; the registry is the instance-scoped
//! table resolving those names to implementations. It is validated against
//! the catalog at construction time ([`crate::catalog::Catalog::validate`]),
//! so an unregistered handler name is a startup error, never a mid-run
//! surprise.

use crate::scheduler::StepOutcome;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Execution context passed to a handler invocation.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    /// Service name from the originating request.
    pub service_name: String,
    /// Process type from the originating request.
    pub process_type: String,
    /// The step being executed.
    pub step_id: String,
    /// Optional service URL from the originating request.
    pub service_url: Option<String>,
}

/// Boxed future returned by a handler.
pub type HandlerFuture = Pin<Box<dyn Future<Output = StepOutcome> + Send>>;

/// A registered handler function.
pub type HandlerFn = Arc<dyn Fn(HandlerContext) -> HandlerFuture + Send + Sync>;

/// Name-to-function table of step handlers.
///
/// Instance-scoped: independent schedulers carry independent registries,
/// so tests can run side by side without shared state.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, HandlerFn>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler under a name, replacing any previous entry.
    pub fn register(&mut self, name: impl Into<String>, handler: HandlerFn) {
        self.handlers.insert(name.into(), handler);
    }

    /// Registers an async closure as a handler.
    ///
    /// Convenience over [`register`](Self::register) that does the boxing.
    pub fn register_fn<F, Fut>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(HandlerContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = StepOutcome> + Send + 'static,
    {
        self.register(
            name,
            Arc::new(move |ctx| Box::pin(handler(ctx)) as HandlerFuture),
        );
    }

    /// Looks up a handler by name.
    pub fn get(&self, name: &str) -> Option<HandlerFn> {
        self.handlers.get(name).cloned()
    }

    /// Whether a handler is registered under this name.
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered handler names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.names())
            .finish()
    }
}
