//! `tracing` subscriber setup used by the binaries.

use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

use crate::config::LogSettings;

/// Installs a global stderr subscriber.
///
/// `RUST_LOG` wins over `level` when set. Calling this twice returns an error instead of
/// panicking, so tests and binaries can share it.
pub fn init_tracing(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|err| anyhow!("invalid log level {level:?}: {err}"))?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);
    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|err| anyhow!("failed to install tracing subscriber: {err}"))?;
    tracing::debug!(level, json, "logger initialized");
    Ok(())
}

/// Convenience wrapper taking the flattened CLI settings.
pub fn init_from_settings(settings: &LogSettings) -> Result<()> {
    init_tracing(&settings.log_level, settings.log_json)
}
