//! Nodes and node collections.

use super::property::{Properties, Property};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Key of the reserved entry that carries the source id of a request.
pub const SOURCE_ENTRY: &str = "source_id";

/// Name of the property holding a node id (and, on the reserved entry, the source id).
pub const NODE_ID: &str = "nid";

/// Character joining a source id to a record id in stored keys.
pub const SOURCE_SEPARATOR: char = ':';

/// Rejects source ids that could not be told apart once joined to a record id.
pub(super) fn checked_source(source: &str) -> Result<&str> {
    if source.contains(SOURCE_SEPARATOR) {
        return Err(Error::InvalidInput(format!(
            "source id '{source}' must not contain '{SOURCE_SEPARATOR}'"
        )));
    }
    Ok(source)
}

/// A graph node: a property set addressed by its node id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Node {
    /// The node's properties.
    pub properties: Properties,
}

impl Node {
    /// Creates a node with no properties.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a node holding `properties`.
    #[must_use]
    pub const fn with_properties(properties: Properties) -> Self {
        Self { properties }
    }

    /// Returns true if the node holds no properties.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}

/// A mapping from node id to [`Node`], used both as request and response.
///
/// As a request, an entry with no properties means "fetch this one". As a
/// response, an entry left empty means the store had no matching record:
/// absence is silent, never an error.
///
/// The collection is scoped by the reserved [`SOURCE_ENTRY`] node. Iteration
/// helpers ([`ids`](Self::ids), [`iter`](Self::iter), [`len`](Self::len))
/// skip it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Nodes {
    entries: HashMap<String, Node>,
}

impl Nodes {
    /// Creates an empty collection with no source entry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty collection scoped to `source_id`.
    pub fn with_source(source_id: impl Into<String>) -> Self {
        let mut nodes = Self::new();
        nodes.set_source(source_id);
        nodes
    }

    /// Sets (or replaces) the reserved source entry.
    pub fn set_source(&mut self, source_id: impl Into<String>) {
        let mut entry = Node::new();
        entry.properties.set_string(NODE_ID, source_id);
        self.entries.insert(SOURCE_ENTRY.to_string(), entry);
    }

    /// Reads the source id from the reserved entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingSourceId`] if the reserved entry is absent and
    /// [`Error::InvalidInput`] if it has no string [`NODE_ID`] property or the
    /// source id contains [`SOURCE_SEPARATOR`].
    pub fn source_id(&self) -> Result<&str> {
        let entry = self.entries.get(SOURCE_ENTRY).ok_or(Error::MissingSourceId)?;
        checked_source(entry.properties.string_key(NODE_ID)?)
    }

    /// Returns the node for `id`, creating an empty one on first access.
    ///
    /// Repeated calls with the same id return the same node.
    pub fn get_or_create(&mut self, id: impl Into<String>) -> &mut Node {
        self.entries.entry(id.into()).or_default()
    }

    /// Returns the node for `id` if present.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Node> {
        self.entries.get(id)
    }

    /// Inserts a node, returning the previous one.
    pub fn insert(&mut self, id: impl Into<String>, node: Node) -> Option<Node> {
        self.entries.insert(id.into(), node)
    }

    /// Removes a node.
    pub fn remove(&mut self, id: &str) -> Option<Node> {
        self.entries.remove(id)
    }

    /// Returns true if `id` has an entry (touched or populated).
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Iterates over node ids, skipping the source entry.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries
            .keys()
            .map(String::as_str)
            .filter(|id| *id != SOURCE_ENTRY)
    }

    /// Iterates over `(id, node)`, skipping the source entry.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Node)> {
        self.entries
            .iter()
            .filter(|(id, _)| id.as_str() != SOURCE_ENTRY)
            .map(|(id, node)| (id.as_str(), node))
    }

    /// Mutable iteration over `(id, node)`, skipping the source entry.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut Node)> {
        self.entries
            .iter_mut()
            .filter(|(id, _)| id.as_str() != SOURCE_ENTRY)
            .map(|(id, node)| (id.as_str(), node))
    }

    /// Number of nodes, not counting the source entry.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids().count()
    }

    /// Returns true if the collection holds no nodes besides the source entry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Convenience for building requests: sets one property on a node.
    pub fn set_property(
        &mut self,
        id: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<Property>,
    ) {
        self.get_or_create(id).properties.set(key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_or_create_is_idempotent() {
        let mut nodes = Nodes::new();
        nodes.get_or_create("a").properties.set_string("k", "v");

        let again = nodes.get_or_create("a");
        assert_eq!(again.properties.string_key("k").unwrap(), "v");
        assert_eq!(nodes.len(), 1);
    }

    #[test]
    fn test_source_entry_is_hidden_from_iteration() {
        let mut nodes = Nodes::with_source("library");
        nodes.get_or_create("1");
        nodes.get_or_create("2");

        let mut ids: Vec<_> = nodes.ids().collect();
        ids.sort_unstable();
        assert_eq!(ids, vec!["1", "2"]);
        assert_eq!(nodes.len(), 2);
        assert!(nodes.contains(SOURCE_ENTRY));
        assert_eq!(nodes.source_id().unwrap(), "library");
    }

    #[test]
    fn test_missing_source_entry() {
        let mut nodes = Nodes::new();
        nodes.get_or_create("1");
        assert!(matches!(nodes.source_id(), Err(Error::MissingSourceId)));
    }

    #[test]
    fn test_source_entry_without_nid() {
        let mut nodes = Nodes::new();
        nodes.get_or_create(SOURCE_ENTRY).properties.set_number(NODE_ID, "3");
        assert!(matches!(nodes.source_id(), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_source_with_separator_is_rejected() {
        let nodes = Nodes::with_source("a:b");
        assert!(matches!(nodes.source_id(), Err(Error::InvalidInput(_))));
    }
}
