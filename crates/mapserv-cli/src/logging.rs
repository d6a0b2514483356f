//! Log subscriber setup

use anyhow::anyhow;
use std::io;
use tracing_subscriber::EnvFilter;

/// Install a stderr fmt subscriber filtered by `filter`.
///
/// An unparsable directive falls back to "info".
pub fn init(filter: &str) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow!("failed to install log subscriber: {}", e))
}
