//! Data models for bcfs.
//!
//! The graph is described by three containers:
//!
//! - [`Properties`]: typed key/value set attached to nodes and edges
//! - [`Nodes`]: node id → [`Node`], used both as request and response
//! - [`Edges`]: from id → to id → [`Properties`]
//!
//! Collections are created per call and discarded afterwards. The source id
//! scoping a request travels once per collection as a reserved entry named
//! [`SOURCE_ENTRY`] whose [`NODE_ID`] property holds the source id.

mod edge;
mod node;
mod property;

pub use edge::Edges;
pub use node::{NODE_ID, Node, Nodes, SOURCE_ENTRY, SOURCE_SEPARATOR};
pub use property::{Properties, Property, PropertyKind};
