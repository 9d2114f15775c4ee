//! The contract every graph backend satisfies.
//!
//! # Available Implementations
//!
//! | Backend | Name | Substrate |
//! |---------|------|-----------|
//! | `KvGraphBackend` | `ddb` | Partition/range keyed key-value store |
//! | `CypherGraphBackend` | `neo` | Cypher over the Neo4j HTTP transaction endpoint |
//! | `ResilientGraph` | (wrapper) | Circuit breaker around any of the above |
//!
//! # Request and Response Shape
//!
//! Every request collection carries its source id in a reserved entry
//! (see [`Nodes::with_source`] and [`Edges::with_source`]). A request without
//! it fails with [`Error::MissingSourceId`](crate::Error::MissingSourceId)
//! before the store is touched.
//!
//! | Operation | Request | Response | Missing records |
//! |-----------|---------|----------|-----------------|
//! | `get_nodes` | node ids | ids + properties | present with empty properties |
//! | `get_out_edges` | `(from, to)` pairs | pairs + properties | present with empty properties |
//! | `get_in_edges` | "to" ids | `edges[to][from]` | endpoint present with no pairs |
//! | `create_nodes` | ids + properties | as written | n/a |
//! | `create_edges` | pairs + properties | as written | n/a |
//! | `alter_nodes` | ids + properties to set | updated records | `NotFound` |
//! | `delete_nodes` | node ids | nothing | ignored |
//! | `ping` | nothing | nothing | n/a |
//!
//! Absence is silent for reads: a missing record is never an error.

use crate::Result;
use crate::models::{Edges, Nodes};

/// A graph storage backend.
///
/// # Implementor Notes
///
/// - Methods use `&self` so a backend can be shared as `Arc<dyn Graph>`
/// - Each call either returns a complete result or a single error; there is no
///   partial success
/// - Responses carry the request's source entry; `ids()` and `iter()` skip it
pub trait Graph: Send + Sync {
    /// Fetches the requested nodes.
    ///
    /// # Errors
    ///
    /// Returns an error if the request has no source entry, a stored attribute
    /// has an unsupported kind, or the store fails.
    fn get_nodes(&self, nodes: Nodes) -> Result<Nodes>;

    /// Fetches all edges pointing at each requested endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the request has no source entry, a stored attribute
    /// has an unsupported kind, or the store fails.
    fn get_in_edges(&self, edges: Edges) -> Result<Edges>;

    /// Fetches the requested `(from, to)` edges.
    ///
    /// # Errors
    ///
    /// Returns an error if the request has no source entry, a stored attribute
    /// has an unsupported kind, or the store fails.
    fn get_out_edges(&self, edges: Edges) -> Result<Edges>;

    /// Writes the given nodes, replacing existing records.
    ///
    /// # Errors
    ///
    /// Returns an error if the request has no source entry or the store fails.
    fn create_nodes(&self, nodes: Nodes) -> Result<Nodes>;

    /// Writes the given edges, replacing existing records.
    ///
    /// # Errors
    ///
    /// Returns an error if the request has no source entry or the store fails.
    fn create_edges(&self, edges: Edges) -> Result<Edges>;

    /// Sets properties on existing nodes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`](crate::Error::NotFound) if a node does not
    /// exist and [`Error::InvalidInput`](crate::Error::InvalidInput) if a node
    /// has nothing to set.
    fn alter_nodes(&self, nodes: Nodes) -> Result<Nodes>;

    /// Deletes the given nodes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HasDependentEdges`](crate::Error::HasDependentEdges) if
    /// edges still reference a node and the backend does not cascade.
    fn delete_nodes(&self, nodes: Nodes) -> Result<()>;

    /// Checks that the store is reachable and provisioned.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be reached.
    fn ping(&self) -> Result<()>;
}

impl<G: Graph + ?Sized> Graph for std::sync::Arc<G> {
    fn get_nodes(&self, nodes: Nodes) -> Result<Nodes> {
        (**self).get_nodes(nodes)
    }

    fn get_in_edges(&self, edges: Edges) -> Result<Edges> {
        (**self).get_in_edges(edges)
    }

    fn get_out_edges(&self, edges: Edges) -> Result<Edges> {
        (**self).get_out_edges(edges)
    }

    fn create_nodes(&self, nodes: Nodes) -> Result<Nodes> {
        (**self).create_nodes(nodes)
    }

    fn create_edges(&self, edges: Edges) -> Result<Edges> {
        (**self).create_edges(edges)
    }

    fn alter_nodes(&self, nodes: Nodes) -> Result<Nodes> {
        (**self).alter_nodes(nodes)
    }

    fn delete_nodes(&self, nodes: Nodes) -> Result<()> {
        (**self).delete_nodes(nodes)
    }

    fn ping(&self) -> Result<()> {
        (**self).ping()
    }
}
