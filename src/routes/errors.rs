//! # Route Loading Errors
//!
//! Every variant is fatal at startup.

use thiserror::Error;

use crate::query::ConfigError;

/// Result type for route loading
pub type RouteResult<T> = Result<T, RouteError>;

/// Route document and route table errors
#[derive(Debug, Error)]
pub enum RouteError {
    // ==================
    // Document Errors
    // ==================
    /// Failed to read the route document
    #[error("Failed to read route document {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// YAML syntax error
    #[error("Invalid YAML route document: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON syntax error
    #[error("Invalid JSON route document: {0}")]
    Json(#[from] serde_json::Error),

    /// Structurally invalid declaration
    #[error("Invalid declaration at {location}: {reason}")]
    Malformed { location: String, reason: String },

    /// A compiled route was rejected
    #[error("{0}")]
    Config(#[from] ConfigError),

    // ==================
    // Table Errors
    // ==================
    /// Path pattern cannot be parsed
    #[error("Invalid path pattern '{0}'")]
    InvalidPattern(String),

    /// Two routes share a method and pattern
    #[error("Route {method} {pattern} is declared twice")]
    Duplicate { method: String, pattern: String },
}

impl RouteError {
    pub(crate) fn malformed(location: impl Into<String>, reason: impl Into<String>) -> Self {
        RouteError::Malformed {
            location: location.into(),
            reason: reason.into(),
        }
    }
}
