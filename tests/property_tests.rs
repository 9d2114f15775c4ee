//! Property-based tests for the key-value backend.
//!
//! Uses proptest to verify invariants across random inputs:
//! - Batch reads and writes issue one store call per window
//! - Composite keys strip back to the ids they were built from
//! - Written property sets read back with identical values and kinds
//! - Lazy accessors are idempotent

// Property tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used)]

use bcfs::models::{Edges, Nodes, Properties, Property};
use bcfs::storage::kv::{MAX_BATCH_GET, MAX_BATCH_WRITE, keys};
use bcfs::storage::{Graph, InMemoryKvStore, KvGraphBackend, KvSettings, RetryPolicy};
use proptest::prelude::*;
use std::sync::Arc;

fn backend() -> (Arc<InMemoryKvStore>, KvGraphBackend) {
    let store = Arc::new(InMemoryKvStore::with_default_tables());
    let settings = KvSettings {
        retry: RetryPolicy {
            max_retries: 8,
            base_delay_ms: 0,
            max_delay_ms: 0,
        },
        ..KvSettings::default()
    };
    let backend = KvGraphBackend::new(store.clone(), settings);
    (store, backend)
}

fn property() -> impl Strategy<Value = Property> {
    prop_oneof![
        ".{0,24}".prop_map(Property::String),
        any::<i64>().prop_map(|n| Property::Number(n.to_string())),
        prop::collection::vec(any::<u8>(), 0..32).prop_map(Property::Binary),
    ]
}

/// Property names that cannot collide with key attributes.
fn properties() -> impl Strategy<Value = Properties> {
    prop::collection::btree_map("[a-m][a-z_]{0,7}", property(), 0..8)
        .prop_map(|map| map.into_iter().collect())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Property: N requested ids take `ceil(N / 100)` batch reads.
    #[test]
    fn prop_batch_read_windows(n in 1usize..450) {
        let (store, backend) = backend();
        let mut request = Nodes::with_source("s");
        for i in 0..n {
            request.get_or_create(i.to_string());
        }
        backend.get_nodes(request).unwrap();
        prop_assert_eq!(store.batch_get_calls(), n.div_ceil(MAX_BATCH_GET));
    }

    /// Property: N written nodes take `ceil(N / 25)` batch writes.
    #[test]
    fn prop_batch_write_windows(n in 1usize..120) {
        let (store, backend) = backend();
        let mut nodes = Nodes::with_source("s");
        for i in 0..n {
            nodes.set_property(i.to_string(), "name", "x");
        }
        backend.create_nodes(nodes).unwrap();
        prop_assert_eq!(store.batch_write_calls(), n.div_ceil(MAX_BATCH_WRITE));
        prop_assert_eq!(store.item_count("nodes"), n);
    }

    /// Property: unscoping a scoped id yields the id, even when either part
    /// contains the separator.
    #[test]
    fn prop_scoped_key_roundtrip(source in "[a-z:]{1,12}", id in ".{0,24}") {
        let key = keys::scoped(&source, &id);
        prop_assert_eq!(keys::unscoped(&source, &key), Some(id.as_str()));
    }

    /// Property: node properties read back exactly as written.
    #[test]
    fn prop_node_properties_roundtrip(id in "[a-z0-9:]{1,12}", props in properties()) {
        let (_store, backend) = backend();
        let mut nodes = Nodes::with_source("s");
        nodes.get_or_create(id.clone()).properties = props.clone();
        backend.create_nodes(nodes).unwrap();

        let mut request = Nodes::with_source("s");
        request.get_or_create(id.clone());
        let mut read = backend.get_nodes(request).unwrap().get(&id).unwrap().properties.clone();

        prop_assert_eq!(read.remove("nid"), Some(Property::String(id.clone())));
        prop_assert_eq!(read, props);
    }

    /// Property: edge properties read back exactly as written, in both directions.
    #[test]
    fn prop_edge_properties_roundtrip(
        from in "[a-z0-9:]{1,12}",
        to in "[a-z0-9:]{1,12}",
        props in properties(),
    ) {
        let (_store, backend) = backend();
        let mut edges = Edges::with_source("s");
        *edges.get_or_create(from.clone(), to.clone()) = props.clone();
        backend.create_edges(edges).unwrap();

        let mut request = Edges::with_source("s");
        request.get_or_create(from.clone(), to.clone());
        let out = backend.get_out_edges(request).unwrap();
        prop_assert_eq!(out.get(&from, &to), Some(&props));

        let mut request = Edges::with_source("s");
        request.add_endpoint(to.clone());
        let incoming = backend.get_in_edges(request).unwrap();
        prop_assert_eq!(incoming.get(&to, &from), Some(&props));
    }

    /// Property: the lazy accessor returns the same entry on repeated access.
    #[test]
    fn prop_get_or_create_idempotent(id in "[a-z0-9]{1,16}", value in ".{0,16}") {
        let mut nodes = Nodes::with_source("s");
        nodes.get_or_create(id.clone()).properties.set_string("v", value.clone());
        let again = nodes.get_or_create(id.clone());
        prop_assert_eq!(again.properties.get("v"), Some(&Property::String(value)));
        prop_assert_eq!(nodes.len(), 1);
    }
}
