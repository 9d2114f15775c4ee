//! Edge collections.

use super::node::{NODE_ID, SOURCE_ENTRY, checked_source};
use super::property::Properties;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A two-level mapping `from id → to id → properties`.
///
/// Out-edge requests list the `(from, to)` pairs to fetch. In-edge requests
/// list only the endpoints being looked up (see [`add_endpoint`](Self::add_endpoint));
/// their responses are oriented by that endpoint, `edges[to][from]`.
///
/// Like [`Nodes`](super::Nodes), the collection carries its source id in a
/// reserved entry (`edges[SOURCE_ENTRY][SOURCE_ENTRY]`) that iteration skips.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Edges {
    entries: HashMap<String, HashMap<String, Properties>>,
}

impl Edges {
    /// Creates an empty collection with no source entry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty collection scoped to `source_id`.
    pub fn with_source(source_id: impl Into<String>) -> Self {
        let mut edges = Self::new();
        edges.set_source(source_id);
        edges
    }

    /// Sets (or replaces) the reserved source entry.
    pub fn set_source(&mut self, source_id: impl Into<String>) {
        let mut entry = Properties::new();
        entry.set_string(NODE_ID, source_id);
        self.entries
            .entry(SOURCE_ENTRY.to_string())
            .or_default()
            .insert(SOURCE_ENTRY.to_string(), entry);
    }

    /// Reads the source id from the reserved entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingSourceId`] if the reserved entry is absent and
    /// [`Error::InvalidInput`] if it has no string `nid` property or the
    /// source id contains `:`.
    pub fn source_id(&self) -> Result<&str> {
        let entry = self
            .entries
            .get(SOURCE_ENTRY)
            .and_then(|inner| inner.get(SOURCE_ENTRY))
            .ok_or(Error::MissingSourceId)?;
        checked_source(entry.string_key(NODE_ID)?)
    }

    /// Returns the properties of `(from, to)`, creating an empty set on first access.
    pub fn get_or_create(&mut self, from: impl Into<String>, to: impl Into<String>) -> &mut Properties {
        self.entries
            .entry(from.into())
            .or_default()
            .entry(to.into())
            .or_default()
    }

    /// Returns the properties of `(from, to)` if present.
    #[must_use]
    pub fn get(&self, from: &str, to: &str) -> Option<&Properties> {
        self.entries.get(from).and_then(|inner| inner.get(to))
    }

    /// Registers an endpoint with no pairs yet, as used by in-edge requests.
    pub fn add_endpoint(&mut self, id: impl Into<String>) {
        self.entries.entry(id.into()).or_default();
    }

    /// Iterates over outer-level ids, skipping the source entry.
    pub fn endpoints(&self) -> impl Iterator<Item = &str> {
        self.entries
            .keys()
            .map(String::as_str)
            .filter(|id| *id != SOURCE_ENTRY)
    }

    /// Iterates over the inner ids recorded under `id`.
    pub fn neighbors<'a>(&'a self, id: &str) -> impl Iterator<Item = &'a str> + use<'a> {
        self.entries
            .get(id)
            .into_iter()
            .flat_map(|inner| inner.keys().map(String::as_str))
    }

    /// Iterates over `(outer, inner, properties)` triples, skipping the source entry.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str, &Properties)> {
        self.entries
            .iter()
            .filter(|(outer, _)| outer.as_str() != SOURCE_ENTRY)
            .flat_map(|(outer, inner)| {
                inner
                    .iter()
                    .map(move |(id, props)| (outer.as_str(), id.as_str(), props))
            })
    }

    /// Number of `(outer, inner)` pairs, not counting the source entry.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pairs().count()
    }

    /// Returns true if the collection holds no pairs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_or_create_creates_both_levels() {
        let mut edges = Edges::new();
        edges.get_or_create("1", "2").set_string("name", "foo");

        assert_eq!(
            edges.get("1", "2").unwrap().string_key("name").unwrap(),
            "foo"
        );
        assert!(edges.get("2", "1").is_none());
    }

    #[test]
    fn test_get_or_create_is_idempotent() {
        let mut edges = Edges::new();
        edges.get_or_create("1", "2").set_number("weight", "3");
        let again = edges.get_or_create("1", "2");
        assert_eq!(again.int_key("weight").unwrap(), 3);
        assert_eq!(edges.len(), 1);
    }

    #[test]
    fn test_source_entry() {
        let mut edges = Edges::with_source("library");
        edges.get_or_create("1", "2");
        edges.add_endpoint("9");

        assert_eq!(edges.source_id().unwrap(), "library");
        assert_eq!(edges.len(), 1);
        let mut endpoints: Vec<_> = edges.endpoints().collect();
        endpoints.sort_unstable();
        assert_eq!(endpoints, vec!["1", "9"]);
        assert_eq!(edges.neighbors("9").count(), 0);
    }

    #[test]
    fn test_missing_source_entry() {
        let edges = Edges::new();
        assert!(matches!(edges.source_id(), Err(Error::MissingSourceId)));
    }

    #[test]
    fn test_source_with_separator_is_rejected() {
        let edges = Edges::with_source("a:b");
        assert!(matches!(edges.source_id(), Err(Error::InvalidInput(_))));
    }
}
