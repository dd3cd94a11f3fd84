//! Tracing setup.
//!
//! The terminal belongs to the TUI (or to engine output in headless mode), so
//! logs go to a daily-rolling file. Headless `--debug` runs also log to stderr.

use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const LOG_FILE: &str = "miko.log";

pub fn log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("miko")
        .join("logs")
}

/// Install the global subscriber. Keep the guard alive for the life of the process.
pub fn init(debug: bool, stderr: bool) -> WorkerGuard {
    let dir = log_dir();
    std::fs::create_dir_all(&dir).ok();

    let file_appender = tracing_appender::rolling::daily(&dir, LOG_FILE);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let default_filter = if debug { "miko=debug,info" } else { "miko=info,warn" };
    let file_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let file_layer = fmt::layer()
        .with_file(true)
        .with_line_number(true)
        .with_thread_names(true)
        .with_ansi(false)
        .with_writer(non_blocking)
        .with_filter(file_filter);

    let stderr_layer = (stderr && debug).then(|| {
        fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .compact()
            .with_filter(EnvFilter::new("miko=debug"))
    });

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .init();

    tracing::debug!(path = %dir.join(LOG_FILE).display(), "logging initialized");
    guard
}
