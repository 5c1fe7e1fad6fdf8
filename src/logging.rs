//! Process-wide logging.
//!
//! Installs a `tracing-subscriber` fmt layer (text or JSON). The library
//! crates log through the `log` facade; the subscriber's `tracing-log`
//! bridge picks those records up.

use crate::config::{LogFormat, Settings};
use anyhow::{anyhow, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// `RUST_LOG` wins; otherwise the configured level.
pub fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_ascii_lowercase()))
}

pub fn init(settings: &Settings) -> Result<()> {
    let filter = build_filter(&settings.log_level);
    let registry = tracing_subscriber::registry().with(filter);

    match settings.log_format {
        LogFormat::Text => registry
            .with(fmt::layer().with_target(true))
            .try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(false))
            .try_init(),
    }
    .map_err(|e| anyhow!("installing log subscriber: {}", e))
}
