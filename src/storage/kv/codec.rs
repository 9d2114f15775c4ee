//! Typed attribute values and their mapping onto graph properties.
//!
//! [`AttributeValue`] mirrors the store's wire tags exactly. Serialized with
//! serde's default external tagging it produces the JSON the store speaks:
//! `{"S": "foo"}`, `{"N": "3"}`, `{"B": "<base64>"}`.

use crate::models::{Properties, Property};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A stored record: attribute name to typed value.
pub type Item = BTreeMap<String, AttributeValue>;

/// A single typed attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeValue {
    /// Text.
    #[serde(rename = "S")]
    String(String),
    /// Number carried as text.
    #[serde(rename = "N")]
    Number(String),
    /// Raw bytes, base64 on the wire.
    #[serde(rename = "B", with = "base64_bytes")]
    Binary(Vec<u8>),
    /// Boolean.
    #[serde(rename = "BOOL")]
    Bool(bool),
    /// Explicit null.
    #[serde(rename = "NULL")]
    Null(bool),
    /// Heterogeneous list.
    #[serde(rename = "L")]
    List(Vec<AttributeValue>),
    /// Nested map.
    #[serde(rename = "M")]
    Map(BTreeMap<String, AttributeValue>),
    /// Set of strings.
    #[serde(rename = "SS")]
    StringSet(Vec<String>),
    /// Set of numbers.
    #[serde(rename = "NS")]
    NumberSet(Vec<String>),
    /// Set of byte strings.
    #[serde(rename = "BS", with = "base64_list")]
    BinarySet(Vec<Vec<u8>>),
}

impl AttributeValue {
    /// Creates a string value.
    pub fn s(value: impl Into<String>) -> Self {
        Self::String(value.into())
    }

    /// Returns the store's tag for this value.
    #[must_use]
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::String(_) => "S",
            Self::Number(_) => "N",
            Self::Binary(_) => "B",
            Self::Bool(_) => "BOOL",
            Self::Null(_) => "NULL",
            Self::List(_) => "L",
            Self::Map(_) => "M",
            Self::StringSet(_) => "SS",
            Self::NumberSet(_) => "NS",
            Self::BinarySet(_) => "BS",
        }
    }

    /// Returns the text of a string value.
    #[must_use]
    pub fn as_s(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&Property> for AttributeValue {
    fn from(property: &Property) -> Self {
        match property {
            Property::String(s) => Self::String(s.clone()),
            Property::Number(n) => Self::Number(n.clone()),
            Property::Binary(b) => Self::Binary(b.clone()),
        }
    }
}

/// Converts a property set into stored attributes.
#[must_use]
pub fn encode_properties(properties: &Properties) -> Item {
    properties
        .iter()
        .map(|(name, value)| (name.to_string(), AttributeValue::from(value)))
        .collect()
}

/// Converts one stored attribute into a property.
///
/// # Errors
///
/// Returns [`Error::UnsupportedType`] for anything other than a string,
/// number or binary value.
pub fn decode_value(record: &str, attribute: &str, value: AttributeValue) -> Result<Property> {
    match value {
        AttributeValue::String(s) => Ok(Property::String(s)),
        AttributeValue::Number(n) => Ok(Property::Number(n)),
        AttributeValue::Binary(b) => Ok(Property::Binary(b)),
        other => Err(Error::UnsupportedType {
            record: record.to_string(),
            attribute: attribute.to_string(),
            kind: other.tag(),
        }),
    }
}

/// Converts a stored record into a property set, skipping attributes for
/// which `skip` returns true.
///
/// # Errors
///
/// Fails on the first attribute of an unsupported kind; nothing is returned
/// for the record in that case.
pub fn decode_item(record: &str, item: Item, skip: impl Fn(&str) -> bool) -> Result<Properties> {
    let mut properties = Properties::new();
    for (name, value) in item {
        if skip(&name) {
            continue;
        }
        let property = decode_value(record, &name, value)?;
        properties.set(name, property);
    }
    Ok(properties)
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(de::Error::custom)
    }
}

mod base64_list {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer, de};

    #[allow(clippy::ptr_arg)]
    pub fn serialize<S: Serializer>(values: &Vec<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(values.iter().map(|bytes| STANDARD.encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<Vec<u8>>, D::Error> {
        Vec::<String>::deserialize(deserializer)?
            .into_iter()
            .map(|encoded| STANDARD.decode(encoded).map_err(de::Error::custom))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_wire_format() {
        let mut item = Item::new();
        item.insert("name".to_string(), AttributeValue::s("foo"));
        item.insert("size".to_string(), AttributeValue::Number("42".to_string()));
        item.insert("blob".to_string(), AttributeValue::Binary(b"hi".to_vec()));

        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "name": {"S": "foo"},
                "size": {"N": "42"},
                "blob": {"B": "aGk="},
            })
        );

        let back: Item = serde_json::from_value(json).unwrap();
        assert_eq!(back, item);
    }

    #[test]
    fn test_nested_wire_format() {
        let json = serde_json::json!({
            "L": [{"BOOL": true}, {"M": {"x": {"NULL": true}}}, {"BS": ["AAE="]}]
        });
        let value: AttributeValue = serde_json::from_value(json).unwrap();
        let AttributeValue::List(items) = value else {
            panic!("expected list");
        };
        assert_eq!(items[0], AttributeValue::Bool(true));
        assert_eq!(items[2], AttributeValue::BinarySet(vec![vec![0, 1]]));
    }

    #[test]
    fn test_decode_supported_kinds() {
        let props = Properties::new()
            .with("name", "foo")
            .with("size", Property::number(7))
            .with("blob", vec![1_u8, 2, 3]);

        let decoded = decode_item("1", encode_properties(&props), |_| false).unwrap();
        assert_eq!(decoded, props);
    }

    #[test]
    fn test_decode_skips_attributes() {
        let mut item = Item::new();
        item.insert("sid_nid".to_string(), AttributeValue::s("s:1"));
        item.insert("nid".to_string(), AttributeValue::s("1"));

        let decoded = decode_item("1", item, |name| name == "sid_nid").unwrap();
        assert_eq!(decoded.len(), 1);
        assert!(decoded.contains_key("nid"));
    }

    #[test_case(AttributeValue::Bool(true), "BOOL" ; "boolean")]
    #[test_case(AttributeValue::Null(true), "NULL" ; "null")]
    #[test_case(AttributeValue::List(vec![]), "L" ; "list")]
    #[test_case(AttributeValue::Map(BTreeMap::new()), "M" ; "map")]
    #[test_case(AttributeValue::StringSet(vec!["a".into()]), "SS" ; "string set")]
    #[test_case(AttributeValue::NumberSet(vec!["1".into()]), "NS" ; "number set")]
    #[test_case(AttributeValue::BinarySet(vec![vec![1]]), "BS" ; "binary set")]
    fn test_decode_rejects_unsupported(value: AttributeValue, tag: &'static str) {
        let err = decode_value("7", "flag", value).unwrap_err();
        assert!(matches!(
            err,
            Error::UnsupportedType { ref record, ref attribute, kind }
                if record == "7" && attribute == "flag" && kind == tag
        ));
    }
}
