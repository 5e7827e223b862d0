//! Tracing initialization (spec §10.2): structured logging via `tracing` +
//! `tracing-subscriber`, configured once at process start by the CLI
//! `start` command.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Logging configuration (spec §10.4: one `Config` struct per concern).
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Passed to `EnvFilter`; falls back to `RUST_LOG`, then `info`.
    pub filter: Option<String>,
    /// Emit newline-delimited JSON instead of human-readable text.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: None,
            json: false,
        }
    }
}

/// Installs the global tracing subscriber. Must be called exactly once,
/// before any other component logs.
pub fn init_tracing(config: &LoggingConfig) -> crate::error::Result<()> {
    let filter = match &config.filter {
        Some(f) => EnvFilter::try_new(f),
        None => EnvFilter::try_from_default_env(),
    }
    .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);

    let result = if config.json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer()).try_init()
    };

    result.map_err(|e| crate::error::Error::Tracing(e.to_string()))
}
