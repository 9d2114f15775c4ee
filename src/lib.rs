//! # bcfs
//!
//! A pluggable storage layer for a filesystem-like graph.
//!
//! Callers address nodes and edges by logical identifiers scoped to a
//! *source* namespace. Backends translate that logical model into whatever
//! substrate they use:
//!
//! - `ddb`: a partition/range keyed key-value store (DynamoDB wire protocol,
//!   or an in-process store for tests) with batched, retried reads and writes
//! - `neo`: a Cypher store reached through the Neo4j HTTP transaction endpoint
//!
//! ## Example
//!
//! ```rust,ignore
//! use bcfs::config::BackendConfig;
//! use bcfs::models::Nodes;
//! use bcfs::storage::resolve_backend;
//!
//! let config = BackendConfig::new("ddb").with("store", "memory").with("create_tables", true);
//! let graph = resolve_backend(&config)?;
//!
//! let mut request = Nodes::with_source("library");
//! request.get_or_create("1");
//! let nodes = graph.get_nodes(request)?;
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

pub mod config;
pub mod models;
pub mod observability;
pub mod storage;

pub use config::{BackendConfig, BcfsConfig, ConfigValue};
pub use models::{Edges, Node, Nodes, Properties, Property, PropertyKind};
pub use storage::{BackendRegistry, Graph, register_backend, resolve_backend};

/// Error type for bcfs operations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `InvalidInput` | Malformed request collections, empty alters, unsupported property kinds on write |
/// | `MissingSourceId` | A request has no reserved source entry |
/// | `UnknownBackend` | `resolve` is called with an unregistered backend name |
/// | `MissingConfigKey` / `InvalidConfigType` | A required backend config key is absent or mistyped |
/// | `InitializationFailed` | A backend factory could not set up its store connection |
/// | `UnsupportedType` | A stored attribute holds a kind other than string, number or binary |
/// | `NotFound` | `alter_nodes` targets a node that does not exist |
/// | `HasDependentEdges` | `delete_nodes` targets a node that edges still reference |
/// | `BackendUnavailable` | The store kept throttling past the retry ceiling |
/// | `DeadlineExceeded` / `Canceled` | The operation deadline passed or its token was cancelled |
/// | `OperationFailed` | Any other store or transport failure |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The request collection did not carry its reserved source entry.
    #[error("missing source id in request")]
    MissingSourceId,

    /// No backend is registered under the requested name.
    #[error("a backend with the name \"{0}\" has not been registered")]
    UnknownBackend(String),

    /// A required configuration key is absent.
    #[error("missing config key: {key}")]
    MissingConfigKey {
        /// The missing key.
        key: String,
    },

    /// A configuration key holds a value of the wrong type.
    #[error("invalid {key} parameter type from config: expected {expected}, found {found}")]
    InvalidConfigType {
        /// The offending key.
        key: String,
        /// The expected value type.
        expected: &'static str,
        /// The value type that was found.
        found: &'static str,
    },

    /// A backend factory failed to construct its backend.
    #[error("failed to initialize backend '{backend}': {cause}")]
    InitializationFailed {
        /// The backend name.
        backend: String,
        /// The underlying cause.
        cause: String,
    },

    /// A stored attribute carries a kind the graph model cannot represent.
    #[error("unsupported type {kind} for attribute '{attribute}' of record '{record}'")]
    UnsupportedType {
        /// The record (node id or edge pair) holding the attribute.
        record: String,
        /// The attribute name.
        attribute: String,
        /// The store kind that was observed.
        kind: &'static str,
    },

    /// The target entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A node cannot be deleted while edges still reference it.
    #[error("node '{node}' has {edges} dependent edge(s)")]
    HasDependentEdges {
        /// The node id.
        node: String,
        /// Number of referencing edges observed.
        edges: usize,
    },

    /// The store did not complete the operation within the retry ceiling.
    #[error("backend unavailable: '{operation}' gave up after {attempts} attempts")]
    BackendUnavailable {
        /// The operation that was retried.
        operation: String,
        /// Number of attempts made without progress.
        attempts: u32,
    },

    /// The operation deadline passed.
    #[error("deadline exceeded during '{operation}'")]
    DeadlineExceeded {
        /// The operation in flight.
        operation: String,
    },

    /// The operation was cancelled.
    #[error("operation '{operation}' was canceled")]
    Canceled {
        /// The operation in flight.
        operation: String,
    },

    /// An operation failed.
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },
}

/// Result type alias for bcfs operations.
pub type Result<T> = std::result::Result<T, Error>;
