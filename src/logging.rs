//! Tracing subscriber setup for hosts embedding the resilience layer.

use crate::config::Config;
use tracing_subscriber::fmt::format::FmtSpan;

/// Install a `fmt` subscriber at DEBUG or INFO depending on `config.debug`.
///
/// Fails instead of panicking when the host already installed a global
/// subscriber.
pub fn init_logging(config: &Config) -> anyhow::Result<()> {
    let log_level = if config.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_span_events(FmtSpan::CLOSE)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {}", e))
}
