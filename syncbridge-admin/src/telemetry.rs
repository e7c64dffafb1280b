//! Logging initialization.
//!
//! Plain text to stderr by default, JSON lines when `SYNCBRIDGE_LOG_JSON` is set.
//! `RUST_LOG` overrides the default filter.

use crate::{AdminError, AdminResult};
use syncbridge_core::config::parse_bool;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const DEFAULT_FILTER: &str =
    "syncbridge_admin=info,syncbridge_storage=info,syncbridge_sync=info,warn";

/// Logging configuration from environment variables.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub json: bool,
    pub default_filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            json: false,
            default_filter: DEFAULT_FILTER.to_string(),
        }
    }
}

impl LogConfig {
    pub fn from_env() -> Self {
        Self {
            json: std::env::var("SYNCBRIDGE_LOG_JSON")
                .ok()
                .and_then(|s| parse_bool(&s))
                .unwrap_or(false),
            ..Default::default()
        }
    }
}

/// Install the global subscriber. Call once at startup.
pub fn init_logging(config: &LogConfig) -> AdminResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_filter));

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = if config.json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };
    result.map_err(|e| AdminError::Logging(e.to_string()))?;

    tracing::debug!(json = config.json, "Logging initialized");
    Ok(())
}
