//! # Tracing Setup
//!
//! Installs the global `tracing` subscriber:
//! - a human-readable console layer with ANSI colors,
//! - a JSON file layer written through a non-blocking, daily rolling appender.
//!
//! The level comes from `RUST_LOG` when set, otherwise from the configured
//! level string. The returned guard must be held for the life of the process;
//! dropping it flushes and closes the file writer.

use std::fs;
use std::path::Path;

use thiserror::Error;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Failed to create log directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid log level filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),

    #[error("A global subscriber is already installed: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

/// Sets up console and rolling JSON file logging under `log_dir`.
///
/// Files are named `{file_prefix}.YYYY-MM-DD`.
pub fn setup_logging(
    log_dir: &Path,
    log_level: &str,
    file_prefix: &str,
) -> Result<WorkerGuard, LoggingError> {
    fs::create_dir_all(log_dir)?;

    let file_appender = rolling::daily(log_dir, file_prefix);
    let (non_blocking_appender, guard) = non_blocking(file_appender);

    let console_layer = fmt::layer().with_target(true).with_ansi(true);

    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_writer(non_blocking_appender)
        .json();

    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(log_level))?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    info!("Logging initialized with level: {}", log_level);
    Ok(guard)
}
