//! Storage backend traits.

mod graph;

pub use graph::Graph;
