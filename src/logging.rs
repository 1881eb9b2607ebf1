use anyhow::{anyhow, Result};
use tracing::Level;
use tracing_subscriber::fmt;

use crate::config::LogLevel;

/// Install the global subscriber.
///
/// Logs go to stderr; stdout carries only the run summary.
pub fn init_logging(level: LogLevel) -> Result<()> {
    let level: Level = level.into();

    fmt::Subscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("failed to initialize logging: {}", e))
}
