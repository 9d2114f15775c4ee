//! Typed property values.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The kind tag carried by every [`Property`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyKind {
    /// UTF-8 text.
    String,
    /// A number kept as its decimal text.
    Number,
    /// Raw bytes.
    Binary,
}

impl PropertyKind {
    /// Returns the lowercase kind name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Binary => "binary",
        }
    }
}

impl fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tagged property value.
///
/// Numbers are held as text so that values written by one backend are read
/// back by another without precision loss.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Property {
    /// UTF-8 text.
    String(String),
    /// Decimal number text.
    Number(String),
    /// Raw bytes.
    Binary(Vec<u8>),
}

impl Property {
    /// Builds a number property from anything with a decimal rendering.
    pub fn number(value: impl fmt::Display) -> Self {
        Self::Number(value.to_string())
    }

    /// Returns the kind of this value.
    #[must_use]
    pub const fn kind(&self) -> PropertyKind {
        match self {
            Self::String(_) => PropertyKind::String,
            Self::Number(_) => PropertyKind::Number,
            Self::Binary(_) => PropertyKind::Binary,
        }
    }

    /// Returns the text of a string property.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the bytes of a binary property.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Binary(b) => Some(b),
            _ => None,
        }
    }

    /// Parses a number property as `i64`.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Number(n) => n.trim().parse().ok(),
            _ => None,
        }
    }

    /// Parses a number property as `f64`.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => n.trim().parse().ok(),
            _ => None,
        }
    }
}

impl From<&str> for Property {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Property {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<Vec<u8>> for Property {
    fn from(value: Vec<u8>) -> Self {
        Self::Binary(value)
    }
}

impl From<i64> for Property {
    fn from(value: i64) -> Self {
        Self::number(value)
    }
}

/// A set of named properties.
///
/// Names are unique within a set; ordering carries no meaning but iteration
/// is sorted for stable output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Properties(BTreeMap<String, Property>);

impl Properties {
    /// Creates an empty property set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a property, replacing any previous value under the same name.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Property>) {
        self.0.insert(key.into(), value.into());
    }

    /// Sets a string property.
    pub fn set_string(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), Property::String(value.into()));
    }

    /// Sets a number property from its decimal text.
    pub fn set_number(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), Property::Number(value.into()));
    }

    /// Sets a binary property.
    pub fn set_binary(&mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.0.insert(key.into(), Property::Binary(value.into()));
    }

    /// Builder-style [`set`](Self::set).
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Property>) -> Self {
        self.set(key, value);
        self
    }

    /// Returns the property stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Property> {
        self.0.get(key)
    }

    /// Removes and returns the property stored under `key`.
    pub fn remove(&mut self, key: &str) -> Option<Property> {
        self.0.remove(key)
    }

    /// Returns true if a property named `key` exists.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Pulls a string out of the set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the key is absent or not a string.
    pub fn string_key(&self, key: &str) -> Result<&str> {
        match self.0.get(key) {
            Some(Property::String(s)) => Ok(s),
            Some(other) => Err(Error::InvalidInput(format!(
                "invalid {key} parameter type: {}",
                other.kind()
            ))),
            None => Err(Error::InvalidInput(format!("no such key: {key}"))),
        }
    }

    /// Pulls an integer out of the set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the key is absent, not a number, or
    /// not an integer.
    pub fn int_key(&self, key: &str) -> Result<i64> {
        match self.0.get(key) {
            Some(p @ Property::Number(text)) => p.as_i64().ok_or_else(|| {
                Error::InvalidInput(format!("{key} is not an integer: {text}"))
            }),
            Some(other) => Err(Error::InvalidInput(format!(
                "invalid {key} parameter type: {}",
                other.kind()
            ))),
            None => Err(Error::InvalidInput(format!("no such key: {key}"))),
        }
    }

    /// Number of properties.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the set holds no properties.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over `(name, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Property)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Iterates over property names.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Removes every property.
    pub fn clear(&mut self) {
        self.0.clear();
    }
}

impl FromIterator<(String, Property)> for Properties {
    fn from_iter<T: IntoIterator<Item = (String, Property)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Extend<(String, Property)> for Properties {
    fn extend<T: IntoIterator<Item = (String, Property)>>(&mut self, iter: T) {
        self.0.extend(iter);
    }
}

impl IntoIterator for Properties {
    type Item = (String, Property);
    type IntoIter = std::collections::btree_map::IntoIter<String, Property>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Properties {
    type Item = (&'a String, &'a Property);
    type IntoIter = std::collections::btree_map::Iter<'a, String, Property>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
