use std::fs;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Directory for the rolling JSON log, overridable for batch hosts
pub const LOG_DIR_ENV_VAR: &str = "IGAC_LOG_DIR";
const DEFAULT_LOG_DIR: &str = "logs";
const LOG_FILE_PREFIX: &str = "igac_pipeline.log";

fn log_dir() -> PathBuf {
    std::env::var(LOG_DIR_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_LOG_DIR))
}

/// Install the global subscriber: a daily-rolling JSON file layer plus a console layer on stderr.
///
/// The returned guard flushes the file writer when dropped; keep it alive for the whole run.
pub fn init_logging() -> WorkerGuard {
    let dir = log_dir();
    let _ = fs::create_dir_all(&dir);

    let file_appender = tracing_appender::rolling::daily(&dir, LOG_FILE_PREFIX);
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_writer(non_blocking_writer);

    // stdout is reserved for command output
    let console_layer = fmt::layer().with_target(true).with_writer(std::io::stderr);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("igac_pipeline=info,warn"));

    // A second call (e.g. from tests) keeps the first subscriber
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init();

    guard
}
