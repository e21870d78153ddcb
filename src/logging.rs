//! Structured logging setup using `tracing-subscriber` and `tracing-appender`.
//!
//! Two modes:
//! - **Production** ([`init_production`]): JSON file layer (daily rotation) + console layer
//! - **CLI** ([`init_cli`]): console-only for one-shot subcommands
//!
//! External telemetry from [`crate::audit::external`] is emitted under the
//! `actuation_kernel::external` target, so it can be filtered separately.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Log file prefix inside the logs directory.
pub const LOG_FILE_PREFIX: &str = "actuation-kernel.log";

/// Holds the non-blocking writer guard for file logging.
///
/// Dropping it flushes pending log entries and closes the file.
pub struct LoggingGuard {
    _guard: WorkerGuard,
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Initialise logging for long-running use.
///
/// Writes JSON logs to `{logs_dir}/actuation-kernel.log.YYYY-MM-DD` with
/// daily rotation, plus human-readable output on stderr. `RUST_LOG` wins over
/// `default_level`.
///
/// # Errors
///
/// Returns an error if the logs directory cannot be created or a global
/// subscriber is already installed.
pub fn init_production(logs_dir: &Path, default_level: &str) -> anyhow::Result<LoggingGuard> {
    std::fs::create_dir_all(logs_dir).map_err(|e| {
        anyhow::anyhow!(
            "failed to create logs directory {}: {e}",
            logs_dir.display()
        )
    })?;

    let file_appender = tracing_appender::rolling::daily(logs_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking);

    let console_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(env_filter(default_level))
        .with(json_layer)
        .with(console_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install subscriber: {e}"))?;

    Ok(LoggingGuard { _guard: guard })
}

/// Initialise stderr-only logging for one-shot subcommands.
///
/// A second call is a no-op.
pub fn init_cli(default_level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(default_level))
        .with_writer(std::io::stderr)
        .try_init();
}
