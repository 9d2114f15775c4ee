//! Backend registry.
//!
//! Maps backend names to factories that build a [`Graph`] from a
//! [`BackendConfig`]. A process-wide registry comes pre-populated with the
//! built-in `ddb` and `neo` backends; callers may register more or replace
//! them.
//!
//! # Usage
//!
//! ```rust,ignore
//! use bcfs::storage::{register_backend, resolve_backend};
//!
//! register_backend("custom", Arc::new(|config: &BackendConfig| -> Result<Arc<dyn Graph>> {
//!     Ok(Arc::new(MyGraph::new(config)?))
//! }));
//! let graph = resolve_backend(&BackendConfig::new("custom"))?;
//! ```

use super::cypher::{self, CypherGraphBackend};
use super::kv::{self, KvGraphBackend};
use super::resilience::{BreakerConfig, ResilientGraph};
use super::traits::Graph;
use crate::config::BackendConfig;
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

/// Builds a backend from its configuration.
pub type BackendFactory = Arc<dyn Fn(&BackendConfig) -> Result<Arc<dyn Graph>> + Send + Sync>;

/// Name → factory table.
#[derive(Default)]
pub struct BackendRegistry {
    factories: RwLock<HashMap<String, BackendFactory>>,
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("names", &self.names())
            .finish()
    }
}

impl BackendRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in backends.
    #[must_use]
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register(
            kv::BACKEND_NAME,
            Arc::new(|config: &BackendConfig| -> Result<Arc<dyn Graph>> {
                Ok(Arc::new(KvGraphBackend::from_config(config)?))
            }),
        );
        registry.register(
            cypher::BACKEND_NAME,
            Arc::new(|config: &BackendConfig| -> Result<Arc<dyn Graph>> {
                Ok(Arc::new(CypherGraphBackend::from_config(config)?))
            }),
        );
        registry
    }

    /// Registers `factory` under `name`. A later registration replaces an
    /// earlier one.
    pub fn register(&self, name: impl Into<String>, factory: BackendFactory) {
        let name = name.into();
        let mut factories = self
            .factories
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if factories.insert(name.clone(), factory).is_some() {
            tracing::debug!(backend = %name, "Replaced backend factory");
        } else {
            tracing::info!(backend = %name, "Registered backend");
        }
    }

    /// Builds the backend selected by the config's `name` key.
    ///
    /// With `circuit_breaker = true` the backend is wrapped in a
    /// [`ResilientGraph`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownBackend`] for an unregistered name, config
    /// errors as raised by the factory, and
    /// [`Error::InitializationFailed`] for any other factory failure.
    pub fn resolve(&self, config: &BackendConfig) -> Result<Arc<dyn Graph>> {
        let name = config.name()?;
        let factory = self
            .factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownBackend(name.to_string()))?;

        let graph = factory(config).map_err(|e| match e {
            Error::MissingConfigKey { .. }
            | Error::InvalidConfigType { .. }
            | Error::InvalidInput(_)
            | Error::InitializationFailed { .. } => e,
            other => Error::InitializationFailed {
                backend: name.to_string(),
                cause: other.to_string(),
            },
        })?;

        if config.optional_bool("circuit_breaker")?.unwrap_or(false) {
            let breaker = BreakerConfig::from_config(config)?;
            tracing::debug!(backend = %name, ?breaker, "Wrapping backend in circuit breaker");
            return Ok(Arc::new(ResilientGraph::new(graph, breaker, name)));
        }
        Ok(graph)
    }

    /// True if `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort_unstable();
        names
    }
}

static GLOBAL: OnceLock<BackendRegistry> = OnceLock::new();

/// The process-wide registry.
pub fn global() -> &'static BackendRegistry {
    GLOBAL.get_or_init(BackendRegistry::with_builtins)
}

/// Registers a backend in the process-wide registry.
pub fn register_backend(name: impl Into<String>, factory: BackendFactory) {
    global().register(name, factory);
}

/// Resolves a backend from the process-wide registry.
///
/// # Errors
///
/// See [`BackendRegistry::resolve`].
pub fn resolve_backend(config: &BackendConfig) -> Result<Arc<dyn Graph>> {
    global().resolve(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Edges, Nodes};

    struct NullGraph;

    impl Graph for NullGraph {
        fn get_nodes(&self, nodes: Nodes) -> Result<Nodes> {
            Ok(nodes)
        }

        fn get_in_edges(&self, edges: Edges) -> Result<Edges> {
            Ok(edges)
        }

        fn get_out_edges(&self, edges: Edges) -> Result<Edges> {
            Ok(edges)
        }

        fn create_nodes(&self, nodes: Nodes) -> Result<Nodes> {
            Ok(nodes)
        }

        fn create_edges(&self, edges: Edges) -> Result<Edges> {
            Ok(edges)
        }

        fn alter_nodes(&self, nodes: Nodes) -> Result<Nodes> {
            Ok(nodes)
        }

        fn delete_nodes(&self, _nodes: Nodes) -> Result<()> {
            Ok(())
        }

        fn ping(&self) -> Result<()> {
            Ok(())
        }
    }

    fn null_factory() -> BackendFactory {
        Arc::new(|_: &BackendConfig| -> Result<Arc<dyn Graph>> { Ok(Arc::new(NullGraph)) })
    }

    #[test]
    fn test_builtins_registered() {
        let registry = BackendRegistry::with_builtins();
        assert_eq!(registry.names(), vec!["ddb".to_string(), "neo".to_string()]);
        assert!(registry.contains("ddb"));
        assert!(!registry.contains("riak"));
    }

    #[test]
    fn test_unknown_backend() {
        let registry = BackendRegistry::new();
        let Err(err) = registry.resolve(&BackendConfig::new("riak")) else {
            panic!("resolved an unregistered backend");
        };
        assert_eq!(
            err.to_string(),
            "a backend with the name \"riak\" has not been registered"
        );
    }

    #[test]
    fn test_missing_name() {
        let registry = BackendRegistry::with_builtins();
        assert!(matches!(
            registry.resolve(&BackendConfig::default()),
            Err(Error::MissingConfigKey { key }) if key == "name"
        ));
    }

    #[test]
    fn test_last_registration_wins() {
        let registry = BackendRegistry::new();
        registry.register(
            "x",
            Arc::new(|_: &BackendConfig| -> Result<Arc<dyn Graph>> {
                Err(Error::OperationFailed {
                    operation: "connect".to_string(),
                    cause: "refused".to_string(),
                })
            }),
        );
        assert!(matches!(
            registry.resolve(&BackendConfig::new("x")),
            Err(Error::InitializationFailed { backend, .. }) if backend == "x"
        ));

        registry.register("x", null_factory());
        assert!(registry.resolve(&BackendConfig::new("x")).unwrap().ping().is_ok());
        assert_eq!(registry.names().len(), 1);
    }

    #[test]
    fn test_circuit_breaker_wrapping() {
        let registry = BackendRegistry::new();
        registry.register("x", null_factory());
        let config = BackendConfig::new("x")
            .with("circuit_breaker", true)
            .with("breaker_failure_threshold", 3_i64);
        assert!(registry.resolve(&config).unwrap().ping().is_ok());
    }

    #[test]
    fn test_resolve_memory_kv_backend() {
        let registry = BackendRegistry::with_builtins();
        let config = BackendConfig::new("ddb")
            .with("store", "memory")
            .with("create_tables", true);
        assert!(registry.resolve(&config).unwrap().ping().is_ok());
    }
}
