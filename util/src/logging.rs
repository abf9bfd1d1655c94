//! Tracing setup shared by every binary and test that embeds the tracker.

use std::fs;
use std::path::Path;
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Installs the global subscriber: a daily-rolling file layer under `log_dir`, plus
/// an ANSI stdout layer when `log_to_stdout` is set.
///
/// The filter comes from `LOG_LEVEL` when it parses, otherwise from `log_level`.
/// Keep the returned guard alive for as long as logs should be flushed.
pub fn init_logging(
    log_dir: &Path,
    log_file: &str,
    log_level: &str,
    log_to_stdout: bool,
) -> Result<WorkerGuard, String> {
    fs::create_dir_all(log_dir).map_err(|e| format!("Failed to create log directory: {e}"))?;

    let file_appender = rolling::daily(log_dir, log_file);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true);

    let stdout_layer = log_to_stdout.then(|| {
        fmt::layer()
            .with_writer(std::io::stdout)
            .with_ansi(true)
            .with_target(true)
            .with_thread_ids(true)
    });

    let env_filter =
        EnvFilter::try_from_env("LOG_LEVEL").unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .try_init()
        .map_err(|e| format!("Failed to install tracing subscriber: {e}"))?;

    Ok(guard)
}
