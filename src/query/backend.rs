//! # Backend Seam
//!
//! The executor talks to the database only through [`TransactionSource`] and
//! [`QueryTransaction`], so the statement state machine does not depend on a
//! particular driver. Postgres and SQLite implementations live next to this
//! module; tests substitute scripted fakes.

use std::fmt;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::binding::PlaceholderStyle;
use super::Row;

/// Supported backing stores
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Postgres,
    Sqlite,
}

impl BackendKind {
    /// Positional placeholder dialect of this backend
    pub fn placeholder_style(&self) -> PlaceholderStyle {
        match self {
            BackendKind::Postgres => PlaceholderStyle::Dollar,
            BackendKind::Sqlite => PlaceholderStyle::Question,
        }
    }

    /// Default identity-switch statement, rendered with `{{role}}`
    pub fn default_impersonate_statement(&self) -> Option<&'static str> {
        match self {
            BackendKind::Postgres => Some("SET ROLE {{role}}"),
            BackendKind::Sqlite => None,
        }
    }

    /// Default statement restoring the session's own identity
    pub fn default_reset_statement(&self) -> Option<&'static str> {
        match self {
            BackendKind::Postgres => Some("RESET ROLE"),
            BackendKind::Sqlite => None,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Postgres => write!(f, "postgres"),
            BackendKind::Sqlite => write!(f, "sqlite"),
        }
    }
}

/// Connection pool sizing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_connections: u32,
    /// How long `begin` waits for a free connection
    pub acquire_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

/// Coarse origin of a backend failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    /// The database rejected a statement; `code` carries its native code
    Database,
    /// No pooled connection became available in time
    PoolTimedOut,
    /// Connection-level failure (I/O, TLS, protocol, closed pool)
    Connection,
    /// A result value could not be converted
    Decode,
    /// Anything else the driver reports
    Other,
}

/// Driver-independent error reported by a backend
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct BackendError {
    pub kind: BackendErrorKind,
    /// Native error code (SQLSTATE for Postgres, result code for SQLite)
    pub code: Option<String>,
    pub message: String,
}

impl BackendError {
    /// A database error carrying a native code
    pub fn database(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: BackendErrorKind::Database,
            code: Some(code.into()),
            message: message.into(),
        }
    }

    /// An error without a native code
    pub fn other(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: None,
            message: message.into(),
        }
    }
}

impl From<sqlx::Error> for BackendError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db) => Self {
                kind: BackendErrorKind::Database,
                code: db.code().map(|code| code.into_owned()),
                message: db.message().to_string(),
            },
            sqlx::Error::PoolTimedOut => {
                Self::other(BackendErrorKind::PoolTimedOut, "timed out waiting for a connection")
            }
            err @ (sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)) => {
                Self::other(BackendErrorKind::Connection, err.to_string())
            }
            err @ (sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::Decode(_)
            | sqlx::Error::TypeNotFound { .. }
            | sqlx::Error::ColumnNotFound(_)
            | sqlx::Error::ColumnIndexOutOfBounds { .. }) => {
                Self::other(BackendErrorKind::Decode, err.to_string())
            }
            other => Self::other(BackendErrorKind::Other, other.to_string()),
        }
    }
}

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// An open transaction on one pooled connection
///
/// Dropping a transaction without committing rolls it back.
pub trait QueryTransaction: Send {
    /// Run a statement, discarding any rows; returns the affected row count
    fn execute<'a>(&'a mut self, sql: &'a str, params: &'a [Value])
        -> BoxFuture<'a, BackendResult<u64>>;

    /// Run a statement and materialize every row in database order
    fn fetch_all<'a>(
        &'a mut self,
        sql: &'a str,
        params: &'a [Value],
    ) -> BoxFuture<'a, BackendResult<Vec<Row>>>;

    /// Commit and release the connection
    fn commit(self: Box<Self>) -> BoxFuture<'static, BackendResult<()>>;

    /// Roll back and release the connection
    fn rollback(self: Box<Self>) -> BoxFuture<'static, BackendResult<()>>;
}

/// A pool that hands out transactions
pub trait TransactionSource: Send + Sync {
    /// Which backend this is
    fn kind(&self) -> BackendKind;

    /// Acquire a connection and open a transaction on it
    fn begin(&self) -> BoxFuture<'_, BackendResult<Box<dyn QueryTransaction>>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_defaults() {
        assert_eq!(
            BackendKind::Postgres.default_impersonate_statement(),
            Some("SET ROLE {{role}}")
        );
        assert_eq!(BackendKind::Postgres.default_reset_statement(), Some("RESET ROLE"));
        assert_eq!(BackendKind::Sqlite.default_impersonate_statement(), None);
        assert_eq!(
            BackendKind::Sqlite.placeholder_style(),
            PlaceholderStyle::Question
        );
    }

    #[test]
    fn test_backend_kind_serde() {
        let kind: BackendKind = serde_json::from_str("\"postgres\"").unwrap();
        assert_eq!(kind, BackendKind::Postgres);
        assert_eq!(kind.to_string(), "postgres");
    }

    #[test]
    fn test_pool_timeout_conversion() {
        let err = BackendError::from(sqlx::Error::PoolTimedOut);
        assert_eq!(err.kind, BackendErrorKind::PoolTimedOut);
        assert!(err.code.is_none());
    }
}
