//! Logging setup.
//!
//! Installs the process-wide `tracing` subscriber: human-readable output on
//! stderr, plus an optional plain-text log file.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LogConfig;

/// Keeps the file writer flushing. Hold it until the process exits.
#[must_use = "dropping the guard stops log file output"]
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// Returns the filter directive to use: `debug` when verbose, otherwise the
/// configured level.
pub fn filter_directive(config: &LogConfig, verbose: bool) -> String {
    if verbose {
        "debug".to_string()
    } else {
        config.level.to_lowercase()
    }
}

/// Installs the global subscriber.
///
/// Fails if a subscriber is already installed or the log file cannot be
/// opened.
pub fn init_logging(config: &LogConfig, verbose: bool) -> Result<LogGuard> {
    let filter = EnvFilter::try_new(filter_directive(config, verbose))
        .with_context(|| format!("Invalid log level: {}", config.level))?;

    let console = fmt::layer().with_writer(std::io::stderr);

    let (file_layer, guard) = match &config.file {
        Some(path) => {
            let (writer, guard) = tracing_appender::non_blocking(open_log_file(path)?);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(LogGuard { _file: guard })
}

/// Opens `path` for appending, creating its directory when missing.
fn open_log_file(path: &Path) -> Result<RollingFileAppender> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("Log file path has no file name: {}", path.display()))?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;

    RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(file_name)
        .build(dir)
        .with_context(|| format!("Failed to open log file: {}", path.display()))
}
