//! Backend registry integration tests.
//!
//! Covers selection through the process-wide registry, configuration loaded
//! from TOML, and the optional circuit breaker wrapper.

// Integration tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used)]

use bcfs::config::{BackendConfig, BcfsConfig};
use bcfs::models::{Edges, Nodes, Property};
use bcfs::storage::{BackendRegistry, Graph, register_backend, resolve_backend};
use bcfs::{Error, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

/// Graph whose every call fails as an unreachable store would.
struct DownGraph {
    calls: Arc<AtomicUsize>,
}

impl DownGraph {
    fn fail<T>(&self) -> Result<T> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(Error::OperationFailed {
            operation: "down".to_string(),
            cause: "connection refused".to_string(),
        })
    }
}

impl Graph for DownGraph {
    fn get_nodes(&self, _nodes: Nodes) -> Result<Nodes> {
        self.fail()
    }

    fn get_in_edges(&self, _edges: Edges) -> Result<Edges> {
        self.fail()
    }

    fn get_out_edges(&self, _edges: Edges) -> Result<Edges> {
        self.fail()
    }

    fn create_nodes(&self, _nodes: Nodes) -> Result<Nodes> {
        self.fail()
    }

    fn create_edges(&self, _edges: Edges) -> Result<Edges> {
        self.fail()
    }

    fn alter_nodes(&self, _nodes: Nodes) -> Result<Nodes> {
        self.fail()
    }

    fn delete_nodes(&self, _nodes: Nodes) -> Result<()> {
        self.fail()
    }

    fn ping(&self) -> Result<()> {
        self.fail()
    }
}

fn memory_config() -> BackendConfig {
    BackendConfig::new("ddb")
        .with("store", "memory")
        .with("create_tables", true)
        .with("base_delay_ms", 0_i64)
}

#[test]
fn test_builtins_are_registered_globally() {
    let graph = resolve_backend(&memory_config()).unwrap();
    graph.ping().unwrap();

    let mut nodes = Nodes::with_source("library");
    nodes.set_property("1", "name", "readme.md");
    graph.create_nodes(nodes).unwrap();

    let mut request = Nodes::with_source("library");
    request.get_or_create("1");
    let nodes = graph.get_nodes(request).unwrap();
    assert_eq!(
        nodes.get("1").unwrap().properties.get("name"),
        Some(&Property::String("readme.md".to_string()))
    );
}

#[test]
fn test_unknown_backend() {
    let Err(err) = resolve_backend(&BackendConfig::new("cassandra")) else {
        panic!("cassandra should not resolve");
    };
    assert!(matches!(err, Error::UnknownBackend(ref name) if name == "cassandra"));
    assert_eq!(
        err.to_string(),
        "a backend with the name \"cassandra\" has not been registered"
    );
}

#[test]
fn test_missing_name() {
    let Err(err) = resolve_backend(&BackendConfig::default()) else {
        panic!("a config without a name should not resolve");
    };
    assert!(matches!(err, Error::MissingConfigKey { ref key } if key == "name"));
}

#[test]
fn test_configuration_errors_fail_fast() {
    let Err(err) = resolve_backend(&BackendConfig::new("neo")) else {
        panic!("neo without a host should not resolve");
    };
    assert!(matches!(err, Error::MissingConfigKey { ref key } if key == "host"));

    let Err(err) = resolve_backend(&BackendConfig::new("ddb").with("region", "eu-west-1")) else {
        panic!("ddb without credentials should not resolve");
    };
    assert!(matches!(err, Error::MissingConfigKey { .. }));

    let Err(err) = resolve_backend(&memory_config().with("max_retries", "lots")) else {
        panic!("a mistyped key should not resolve");
    };
    assert!(matches!(err, Error::InvalidConfigType { ref key, .. } if key == "max_retries"));
}

#[test]
fn test_registration_overrides_globally() {
    let calls = Arc::new(AtomicUsize::new(0));
    let first = calls.clone();
    register_backend(
        "override-test",
        Arc::new(move |_config: &BackendConfig| -> Result<Arc<dyn Graph>> {
            Ok(Arc::new(DownGraph {
                calls: first.clone(),
            }))
        }),
    );
    register_backend(
        "override-test",
        Arc::new(|_config: &BackendConfig| -> Result<Arc<dyn Graph>> {
            Err(Error::OperationFailed {
                operation: "connect".to_string(),
                cause: "replaced".to_string(),
            })
        }),
    );

    let Err(err) = resolve_backend(&BackendConfig::new("override-test")) else {
        panic!("the second factory should have been used");
    };
    assert!(matches!(
        err,
        Error::InitializationFailed { ref backend, ref cause }
            if backend == "override-test" && cause.contains("replaced")
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_circuit_breaker_wrapping() {
    let calls = Arc::new(AtomicUsize::new(0));
    let registry = BackendRegistry::new();
    let shared = calls.clone();
    registry.register(
        "down",
        Arc::new(move |_config: &BackendConfig| -> Result<Arc<dyn Graph>> {
            Ok(Arc::new(DownGraph {
                calls: shared.clone(),
            }))
        }),
    );

    let config = BackendConfig::new("down")
        .with("circuit_breaker", true)
        .with("breaker_failure_threshold", 2_i64)
        .with("breaker_reset_ms", 60_000_i64);
    let graph = registry.resolve(&config).unwrap();

    assert!(matches!(graph.ping(), Err(Error::OperationFailed { .. })));
    assert!(matches!(graph.ping(), Err(Error::OperationFailed { .. })));
    assert!(matches!(
        graph.ping(),
        Err(Error::BackendUnavailable { attempts: 0, .. })
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let unwrapped = registry.resolve(&BackendConfig::new("down")).unwrap();
    for _ in 0..3 {
        assert!(matches!(unwrapped.ping(), Err(Error::OperationFailed { .. })));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 5);
}

#[test]
fn test_config_file_selects_backend() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
log_level = "debug"
log_format = "json"

[backend]
name = "ddb"
store = "memory"
create_tables = true
node_table = "files"
max_retries = 3
"#,
    )
    .unwrap();

    let config = BcfsConfig::load_from_file(&path).unwrap();
    assert_eq!(config.log_level, "debug");
    assert_eq!(config.backend.name().unwrap(), "ddb");

    let graph = resolve_backend(&config.backend).unwrap();
    graph.ping().unwrap();
}

#[test]
fn test_config_file_without_backend_name() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "log_level = \"info\"\n").unwrap();

    assert!(matches!(
        BcfsConfig::load_from_file(&path),
        Err(Error::MissingConfigKey { .. })
    ));
}
