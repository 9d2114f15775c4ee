//! Configuration management.
//!
//! Two layers:
//!
//! - [`BackendConfig`]: the opaque mapping handed to a backend factory
//! - [`BcfsConfig`]: process configuration (logging plus the `[backend]` table)
//!   loaded from a TOML file
//!
//! ```toml
//! log_level = "debug"
//! log_format = "json"
//!
//! [backend]
//! name = "ddb"
//! endpoint = "http://localhost:8000"
//! region = "us-east-1"
//! access_key_id = "local"
//! secret_access_key = "local"
//! ```

mod backend;

pub use backend::{BackendConfig, ConfigValue};

use crate::observability::LogFormat;
use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Process configuration.
#[derive(Debug, Clone)]
pub struct BcfsConfig {
    /// Log level used when `BCFS_LOG` is not set.
    pub log_level: String,
    /// Log output format.
    pub log_format: LogFormat,
    /// Optional log file.
    pub log_file: Option<PathBuf>,
    /// Configuration of the selected backend.
    pub backend: BackendConfig,
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    /// Log level.
    pub log_level: Option<String>,
    /// Log format (`pretty` or `json`).
    pub log_format: Option<String>,
    /// Log file path.
    pub log_file: Option<String>,
    /// Backend section.
    pub backend: Option<BackendConfig>,
}

impl Default for BcfsConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            log_file: None,
            backend: BackendConfig::default(),
        }
    }
}

impl BcfsConfig {
    /// Loads configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if it has
    /// no `[backend]` table with a `name`.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::OperationFailed {
            operation: "read_config_file".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;
        Self::parse(&contents)
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid TOML for [`ConfigFile`] or
    /// the backend has no name.
    pub fn parse(contents: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(contents).map_err(|e| Error::OperationFailed {
            operation: "parse_config_file".to_string(),
            cause: e.to_string(),
        })?;
        let config = Self::from_config_file(file);
        config.backend.name()?;
        Ok(config)
    }

    /// Returns the default config file location (`<config dir>/bcfs/config.toml`).
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        directories::BaseDirs::new()
            .map(|dirs| dirs.config_dir().join("bcfs").join("config.toml"))
    }

    fn from_config_file(file: ConfigFile) -> Self {
        let mut config = Self::default();

        if let Some(level) = file.log_level {
            config.log_level = level;
        }
        if let Some(format) = file.log_format {
            config.log_format = LogFormat::parse(&format);
        }
        config.log_file = file.log_file.map(PathBuf::from);
        if let Some(backend) = file.backend {
            config.backend = backend;
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_full_file() {
        let config = BcfsConfig::parse(
            r#"
            log_level = "debug"
            log_format = "json"

            [backend]
            name = "neo"
            host = "localhost"
            port = 7474
            "#,
        )
        .unwrap();

        assert_eq!(config.log_level, "debug");
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.backend.name().unwrap(), "neo");
        assert_eq!(config.backend.int_key("port").unwrap(), 7474);
    }

    #[test]
    fn test_backend_name_required() {
        let err = BcfsConfig::parse("log_level = \"info\"").unwrap_err();
        assert!(matches!(err, Error::MissingConfigKey { key } if key == "name"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[backend]\nname = \"ddb\"\nstore = \"memory\"").unwrap();

        let config = BcfsConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.backend.string_key("store").unwrap(), "memory");
    }

    #[test]
    fn test_load_missing_file() {
        let result = BcfsConfig::load_from_file(Path::new("/nonexistent/bcfs.toml"));
        assert!(matches!(result, Err(Error::OperationFailed { .. })));
    }
}
