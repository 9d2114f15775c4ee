//! Composite key derivation.
//!
//! | Table | Partition | Range |
//! |-------|-----------|-------|
//! | nodes | `sid_nid` = `<source>:<node>` | `nid` = `<node>` |
//! | edges | `sid_from` = `<source>:<from>` | `sid_to` = `<source>:<to>` |
//! | edges, reverse index | `sid_to` | `sid_from` |

use super::codec::{AttributeValue, Item};
use super::store::{IndexSpec, TableSpec};
use crate::models::{NODE_ID, SOURCE_SEPARATOR};

/// Node table partition attribute.
pub const NODE_PARTITION: &str = "sid_nid";
/// Node table range attribute.
pub const NODE_RANGE: &str = NODE_ID;
/// Edge table partition attribute.
pub const EDGE_PARTITION: &str = "sid_from";
/// Edge table range attribute, and partition of the reverse index.
pub const EDGE_RANGE: &str = "sid_to";

/// Joins a source id and a logical id.
#[must_use]
pub fn scoped(source: &str, id: &str) -> String {
    format!("{source}{SOURCE_SEPARATOR}{id}")
}

/// Removes the `<source>:` prefix from a stored key component.
///
/// Ids may themselves contain `:`; only the leading source prefix is removed.
#[must_use]
pub fn unscoped<'a>(source: &str, key: &'a str) -> Option<&'a str> {
    key.strip_prefix(source)?.strip_prefix(SOURCE_SEPARATOR)
}

/// Key of a node record.
#[must_use]
pub fn node_key(source: &str, id: &str) -> Item {
    Item::from([
        (NODE_PARTITION.to_string(), AttributeValue::s(scoped(source, id))),
        (NODE_RANGE.to_string(), AttributeValue::s(id)),
    ])
}

/// Key of an edge record.
#[must_use]
pub fn edge_key(source: &str, from: &str, to: &str) -> Item {
    Item::from([
        (EDGE_PARTITION.to_string(), AttributeValue::s(scoped(source, from))),
        (EDGE_RANGE.to_string(), AttributeValue::s(scoped(source, to))),
    ])
}

/// True for attributes that exist only to address a record.
///
/// `nid` is not internal: it is the node's own id and is returned to callers.
#[must_use]
pub fn is_internal(attribute: &str) -> bool {
    matches!(attribute, NODE_PARTITION | EDGE_PARTITION | EDGE_RANGE)
}

/// Layout of the node table.
#[must_use]
pub fn node_table(name: &str) -> TableSpec {
    TableSpec {
        name: name.to_string(),
        partition_key: NODE_PARTITION.to_string(),
        range_key: NODE_RANGE.to_string(),
        indexes: Vec::new(),
    }
}

/// Layout of the edge table and its reverse index.
#[must_use]
pub fn edge_table(name: &str, reverse_index: &str) -> TableSpec {
    TableSpec {
        name: name.to_string(),
        partition_key: EDGE_PARTITION.to_string(),
        range_key: EDGE_RANGE.to_string(),
        indexes: vec![IndexSpec {
            name: reverse_index.to_string(),
            partition_key: EDGE_RANGE.to_string(),
            range_key: EDGE_PARTITION.to_string(),
        }],
    }
}

/// Reads a string attribute from a record.
#[must_use]
pub fn string_attribute<'a>(item: &'a Item, attribute: &str) -> Option<&'a str> {
    item.get(attribute).and_then(AttributeValue::as_s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_key() {
        let key = node_key("library", "42");
        assert_eq!(string_attribute(&key, "sid_nid"), Some("library:42"));
        assert_eq!(string_attribute(&key, "nid"), Some("42"));
    }

    #[test]
    fn test_edge_key() {
        let key = edge_key("library", "1", "2");
        assert_eq!(string_attribute(&key, "sid_from"), Some("library:1"));
        assert_eq!(string_attribute(&key, "sid_to"), Some("library:2"));
    }

    #[test]
    fn test_unscoped_keeps_colons_in_ids() {
        assert_eq!(unscoped("s", "s:a:b"), Some("a:b"));
        assert_eq!(unscoped("s", "t:a"), None);
        assert_eq!(unscoped("s", "sa"), None);
    }

    #[test]
    fn test_internal_attributes() {
        assert!(is_internal("sid_nid"));
        assert!(is_internal("sid_from"));
        assert!(is_internal("sid_to"));
        assert!(!is_internal("nid"));
        assert!(!is_internal("name"));
    }
}
