//! Structured logging configuration.

use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Environment variable overriding the log filter.
pub const LOG_ENV: &str = "BCFS_LOG";

/// Output format of the log layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable multi-line output.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

impl LogFormat {
    /// Parses a format name, defaulting to [`LogFormat::Pretty`].
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Pretty,
        }
    }
}

/// Logging configuration.
#[derive(Debug)]
pub struct LoggingConfig {
    /// Event filter.
    pub filter: EnvFilter,
    /// Output format.
    pub format: LogFormat,
    /// Optional file to append to instead of stderr.
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    /// Builds a logging configuration.
    ///
    /// The filter comes from `BCFS_LOG` when set and valid, otherwise from
    /// `level`; `verbose` forces `debug`. An unparsable level falls back to
    /// `info`.
    #[must_use]
    pub fn new(level: &str, format: LogFormat, file: Option<PathBuf>, verbose: bool) -> Self {
        let fallback = if verbose { "debug" } else { level };
        let filter = EnvFilter::try_from_env(LOG_ENV)
            .or_else(|_| EnvFilter::try_new(fallback))
            .unwrap_or_else(|_| {
                tracing::warn!(level = fallback, "Invalid log level; defaulting to info");
                EnvFilter::new("info")
            });

        Self {
            filter,
            format,
            file,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self::new("info", LogFormat::default(), None, false)
    }
}
