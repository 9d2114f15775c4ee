//! Backend configuration: an opaque name → value mapping.

use crate::{Error, Result};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single configuration value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    /// Boolean flag.
    Boolean(bool),
    /// Signed integer.
    Integer(i64),
    /// Floating point number.
    Float(f64),
    /// Text.
    String(String),
}

impl ConfigValue {
    /// Returns the name of the value's type, for error messages.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Boolean(_) => "boolean",
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::String(_) => "string",
        }
    }
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for ConfigValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for ConfigValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<f64> for ConfigValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

/// Configuration handed to a backend factory.
///
/// The `name` key selects the registered backend; every other key is
/// interpreted by that backend alone. Accessors fail with
/// [`Error::MissingConfigKey`] or [`Error::InvalidConfigType`] so that a
/// backend can refuse to initialize with a clear message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackendConfig(BTreeMap<String, ConfigValue>);

impl BackendConfig {
    /// Key selecting the registered backend.
    pub const NAME_KEY: &'static str = "name";

    /// Creates a configuration selecting backend `name`.
    pub fn new(name: impl Into<String>) -> Self {
        let name: String = name.into();
        Self::default().with(Self::NAME_KEY, name)
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ConfigValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Inserts or replaces a value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ConfigValue>) {
        self.0.insert(key.into(), value.into());
    }

    /// Returns the raw value under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.0.get(key)
    }

    /// Returns true if `key` is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Returns the selected backend name.
    ///
    /// # Errors
    ///
    /// Fails if `name` is absent or not a string.
    pub fn name(&self) -> Result<&str> {
        self.string_key(Self::NAME_KEY)
    }

    /// Extracts a required string.
    ///
    /// # Errors
    ///
    /// Fails if the key is absent or not a string.
    pub fn string_key(&self, key: &str) -> Result<&str> {
        self.optional_string(key)?.ok_or_else(|| missing(key))
    }

    /// Extracts an optional string.
    ///
    /// # Errors
    ///
    /// Fails if the key is present but not a string.
    pub fn optional_string(&self, key: &str) -> Result<Option<&str>> {
        match self.0.get(key) {
            None => Ok(None),
            Some(ConfigValue::String(s)) => Ok(Some(s)),
            Some(other) => Err(mistyped(key, "string", other)),
        }
    }

    /// Extracts a required integer.
    ///
    /// # Errors
    ///
    /// Fails if the key is absent or not an integer.
    pub fn int_key(&self, key: &str) -> Result<i64> {
        self.optional_int(key)?.ok_or_else(|| missing(key))
    }

    /// Extracts an optional integer.
    ///
    /// # Errors
    ///
    /// Fails if the key is present but not an integer.
    pub fn optional_int(&self, key: &str) -> Result<Option<i64>> {
        match self.0.get(key) {
            None => Ok(None),
            Some(ConfigValue::Integer(i)) => Ok(Some(*i)),
            Some(other) => Err(mistyped(key, "integer", other)),
        }
    }

    /// Extracts an optional non-negative integer.
    ///
    /// # Errors
    ///
    /// Fails if the key is present but not an integer, or is negative.
    pub fn optional_u64(&self, key: &str) -> Result<Option<u64>> {
        match self.optional_int(key)? {
            None => Ok(None),
            Some(i) => u64::try_from(i).map(Some).map_err(|_| Error::InvalidConfigType {
                key: key.to_string(),
                expected: "non-negative integer",
                found: "negative integer",
            }),
        }
    }

    /// Extracts a required boolean.
    ///
    /// # Errors
    ///
    /// Fails if the key is absent or not a boolean.
    pub fn bool_key(&self, key: &str) -> Result<bool> {
        self.optional_bool(key)?.ok_or_else(|| missing(key))
    }

    /// Extracts an optional boolean.
    ///
    /// # Errors
    ///
    /// Fails if the key is present but not a boolean.
    pub fn optional_bool(&self, key: &str) -> Result<Option<bool>> {
        match self.0.get(key) {
            None => Ok(None),
            Some(ConfigValue::Boolean(b)) => Ok(Some(*b)),
            Some(other) => Err(mistyped(key, "boolean", other)),
        }
    }

    /// Extracts a required secret string.
    ///
    /// # Errors
    ///
    /// Fails if the key is absent or not a string.
    pub fn secret_key(&self, key: &str) -> Result<SecretString> {
        self.string_key(key).map(|s| SecretString::from(s.to_string()))
    }

    /// Extracts an optional secret string.
    ///
    /// # Errors
    ///
    /// Fails if the key is present but not a string.
    pub fn optional_secret(&self, key: &str) -> Result<Option<SecretString>> {
        Ok(self
            .optional_string(key)?
            .map(|s| SecretString::from(s.to_string())))
    }

    /// Iterates over the configured keys.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

fn missing(key: &str) -> Error {
    Error::MissingConfigKey {
        key: key.to_string(),
    }
}

fn mistyped(key: &str, expected: &'static str, found: &ConfigValue) -> Error {
    Error::InvalidConfigType {
        key: key.to_string(),
        expected,
        found: found.type_name(),
    }
}
