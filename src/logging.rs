//! Tracing initialization from [`LoggingConfig`].

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Install a global tracing subscriber for the configured level and
/// format. Safe to call more than once; later calls are no-ops.
pub fn init(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    let result = if config.format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    };

    // a subscriber installed by the host application wins
    let _ = result;
}
