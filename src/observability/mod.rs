//! Observability subsystem for grest
//!
//! Structured logging through `tracing`. The engine emits events with
//! `request_id`, `role` and `statement` fields; HTTP requests are traced by
//! the server's `TraceLayer`.
//!
//! # Usage
//!
//! ```ignore
//! use grest::observability::{init_logging, LoggingConfig};
//!
//! init_logging(&LoggingConfig::default());
//! tracing::info!(route = "/things", "Route loaded");
//! ```

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Log line format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset (default: "info")
    #[serde(default = "default_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
        }
    }
}

impl LoggingConfig {
    /// Filter from `RUST_LOG`, falling back to the configured level
    pub fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.level.to_lowercase()))
    }
}

/// Install the global subscriber
///
/// A second call is a no-op, so tests and embedders may call it freely.
pub fn init_logging(config: &LoggingConfig) {
    let builder = tracing_subscriber::fmt().with_env_filter(config.env_filter());
    match config.format {
        LogFormat::Pretty => builder.try_init().ok(),
        LogFormat::Json => builder.json().try_init().ok(),
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_config_defaults() {
        let config: LoggingConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.level, "info");
        assert_eq!(config.format, LogFormat::Pretty);

        let config: LoggingConfig =
            serde_json::from_str(r#"{"level": "debug", "format": "json"}"#).unwrap();
        assert_eq!(config.format, LogFormat::Json);
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init_logging(&LoggingConfig::default());
        init_logging(&LoggingConfig {
            level: "debug".to_string(),
            format: LogFormat::Json,
        });
    }
}
