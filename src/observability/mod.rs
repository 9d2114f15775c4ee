//! Observability: structured logging through `tracing`.
//!
//! Metrics are emitted through the `metrics` facade at their call sites; the
//! library installs no recorder, so they are free unless the embedding
//! process installs one.

mod logging;

pub use logging::{LOG_ENV, LogFormat, LoggingConfig};

use crate::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::{Mutex, OnceLock};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

static LOGGING_INSTALLED: OnceLock<()> = OnceLock::new();

/// Installs the global `tracing` subscriber.
///
/// Events go to stderr, or are appended to `config.file` when set. File
/// output never carries ANSI colors.
///
/// # Errors
///
/// Returns an error if logging has already been initialized or the log file
/// cannot be opened.
pub fn init(config: LoggingConfig) -> Result<()> {
    if LOGGING_INSTALLED.get().is_some() {
        return Err(init_failed("logging already initialized"));
    }

    let LoggingConfig {
        filter,
        format,
        file,
    } = config;
    let to_file = file.is_some();
    let writer = match file.as_deref() {
        Some(path) => BoxMakeWriter::new(Mutex::new(open_log_file(path)?)),
        None => BoxMakeWriter::new(io::stderr),
    };

    let layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_target(true);
    let registry = tracing_subscriber::registry().with(filter);
    let installed = match format {
        LogFormat::Json => registry
            .with(layer.json().with_current_span(true).with_thread_ids(true))
            .try_init(),
        LogFormat::Pretty if to_file => registry
            .with(layer.with_ansi(false).with_thread_ids(true))
            .try_init(),
        LogFormat::Pretty => registry.with(layer.pretty()).try_init(),
    };
    installed.map_err(|e| init_failed(&e.to_string()))?;

    LOGGING_INSTALLED
        .set(())
        .map_err(|()| init_failed("logging initialized concurrently"))?;
    tracing::debug!(?format, to_file, "Logging initialized");
    Ok(())
}

fn open_log_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| Error::OperationFailed {
            operation: "create_log_dir".to_string(),
            cause: format!("{}: {e}", parent.display()),
        })?;
    }

    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| Error::OperationFailed {
            operation: "open_log_file".to_string(),
            cause: format!("{}: {e}", path.display()),
        })
}

fn init_failed(cause: &str) -> Error {
    Error::OperationFailed {
        operation: "observability_init".to_string(),
        cause: cause.to_string(),
    }
}
