//! Catalog validation and step ordering.
//!
//! Validation runs once at construction time, before any traffic is
//! accepted. Besides referential integrity it computes a deterministic
//! execution order for each service type: a topological sort of the step
//! dependency graph, breaking ties lexicographically by step id. The
//! scheduler uses this order whenever it builds a `steps_to_run` list, so
//! dependency ordering holds on every run.

use super::{Catalog, CatalogError};
use crate::registry::HandlerRegistry;
use std::collections::{BTreeMap, HashMap};

/// Deterministic per-service-type step execution orders.
///
/// Produced by [`Catalog::validate`]; keyed by process type name.
pub type StepOrders = HashMap<String, Vec<String>>;

impl Catalog {
    /// Validates the catalog against a handler registry.
    ///
    /// Checks, per service type:
    /// - every step's handler name resolves in `registry`
    /// - every dependency names a step of the same service type
    /// - the dependency graph is acyclic
    /// - every referenced queue is configured
    ///
    /// Returns the topologically sorted step order for each service type.
    ///
    /// # Errors
    ///
    /// Returns the first violation found as a [`CatalogError`].
    pub fn validate(&self, registry: &HandlerRegistry) -> Result<StepOrders, CatalogError> {
        let mut orders = StepOrders::new();

        for (type_name, service_type) in &self.service_types {
            for queue in &service_type.queues {
                if self.queue(queue).is_none() {
                    return Err(CatalogError::UnknownQueue {
                        service_type: type_name.clone(),
                        queue: queue.clone(),
                    });
                }
            }

            for (step_id, handler) in &service_type.handlers {
                if !registry.contains(&handler.name) {
                    return Err(CatalogError::UnknownHandler {
                        service_type: type_name.clone(),
                        step_id: step_id.clone(),
                        handler: handler.name.clone(),
                    });
                }

                for dependency in &handler.dependencies {
                    if !service_type.handlers.contains_key(dependency) {
                        return Err(CatalogError::UnknownDependency {
                            service_type: type_name.clone(),
                            step_id: step_id.clone(),
                            dependency: dependency.clone(),
                        });
                    }
                }
            }

            let order = topo_order(type_name, &service_type.handlers)?;
            orders.insert(type_name.clone(), order);
        }

        Ok(orders)
    }
}

/// Kahn's algorithm over the step dependency graph.
///
/// At each round the ready step with the smallest id is emitted, so the
/// result is stable across runs. A round with pending steps but nothing
/// ready means a cycle.
fn topo_order(
    type_name: &str,
    handlers: &BTreeMap<String, super::HandlerConfig>,
) -> Result<Vec<String>, CatalogError> {
    let mut remaining: BTreeMap<&str, Vec<&str>> = handlers
        .iter()
        .map(|(id, cfg)| {
            (
                id.as_str(),
                cfg.dependencies.iter().map(String::as_str).collect(),
            )
        })
        .collect();
    let mut order = Vec::with_capacity(handlers.len());

    while !remaining.is_empty() {
        let ready = remaining
            .iter()
            .find(|(_, deps)| deps.iter().all(|d| !remaining.contains_key(d)))
            .map(|(id, _)| *id);

        match ready {
            Some(id) => {
                remaining.remove(id);
                order.push(id.to_string());
            }
            None => {
                // Every pending step waits on another pending step.
                let step_id = remaining
                    .keys()
                    .next()
                    .map(|id| id.to_string())
                    .unwrap_or_default();
                return Err(CatalogError::DependencyCycle {
                    service_type: type_name.to_string(),
                    step_id,
                });
            }
        }
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{HandlerConfig, QueueConfig, ServiceType};
    use crate::registry::HandlerRegistry;
    use crate::scheduler::{OutcomeStatus, StepOutcome};

    fn handler(name: &str, deps: &[&str]) -> HandlerConfig {
        HandlerConfig {
            name: name.to_string(),
            cache_seconds: 300,
            description: String::new(),
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
        }
    }

    fn registry_with(names: &[&str]) -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();
        for name in names {
            registry.register_fn(*name, |_ctx| async {
                StepOutcome::now(OutcomeStatus::Completed, "ok")
            });
        }
        registry
    }

    fn catalog_with(handlers: BTreeMap<String, HandlerConfig>) -> Catalog {
        let mut service_types = BTreeMap::new();
        service_types.insert(
            "check".to_string(),
            ServiceType {
                description: String::new(),
                queues: vec!["service_checks".to_string()],
                handlers,
            },
        );
        Catalog {
            service_types,
            queues: vec![QueueConfig {
                name: "service_checks".to_string(),
                max_concurrent: 3,
                queue_size: 100,
            }],
        }
    }

    #[test]
    fn test_validate_accepts_well_formed_catalog() {
        let mut handlers = BTreeMap::new();
        handlers.insert("a".to_string(), handler("a", &[]));
        handlers.insert("b".to_string(), handler("b", &["a"]));
        let catalog = catalog_with(handlers);

        let orders = catalog.validate(&registry_with(&["a", "b"])).unwrap();
        assert_eq!(orders["check"], vec!["a", "b"]);
    }

    #[test]
    fn test_validate_rejects_unknown_handler() {
        let mut handlers = BTreeMap::new();
        handlers.insert("a".to_string(), handler("a", &[]));
        let catalog = catalog_with(handlers);

        let err = catalog.validate(&registry_with(&[])).unwrap_err();
        assert!(matches!(err, CatalogError::UnknownHandler { .. }));
    }

    #[test]
    fn test_validate_rejects_unknown_dependency() {
        let mut handlers = BTreeMap::new();
        handlers.insert("a".to_string(), handler("a", &["ghost"]));
        let catalog = catalog_with(handlers);

        let err = catalog.validate(&registry_with(&["a"])).unwrap_err();
        assert!(matches!(err, CatalogError::UnknownDependency { .. }));
    }

    #[test]
    fn test_validate_rejects_cycle() {
        let mut handlers = BTreeMap::new();
        handlers.insert("a".to_string(), handler("a", &["b"]));
        handlers.insert("b".to_string(), handler("b", &["a"]));
        let catalog = catalog_with(handlers);

        let err = catalog.validate(&registry_with(&["a", "b"])).unwrap_err();
        assert!(matches!(err, CatalogError::DependencyCycle { .. }));
    }

    #[test]
    fn test_validate_rejects_unknown_queue() {
        let mut handlers = BTreeMap::new();
        handlers.insert("a".to_string(), handler("a", &[]));
        let mut catalog = catalog_with(handlers);
        catalog.queues.clear();

        let err = catalog.validate(&registry_with(&["a"])).unwrap_err();
        assert!(matches!(err, CatalogError::UnknownQueue { .. }));
    }

    #[test]
    fn test_topo_order_depth_then_name() {
        // c depends on a and b; expect alphabetical among ready steps.
        let mut handlers = BTreeMap::new();
        handlers.insert("c".to_string(), handler("c", &["a", "b"]));
        handlers.insert("b".to_string(), handler("b", &[]));
        handlers.insert("a".to_string(), handler("a", &[]));
        let catalog = catalog_with(handlers);

        let orders = catalog.validate(&registry_with(&["a", "b", "c"])).unwrap();
        assert_eq!(orders["check"], vec!["a", "b", "c"]);
    }
}
