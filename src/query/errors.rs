//! # Query Engine Errors
//!
//! Load-time failures ([`ConfigError`]) are fatal for the route document.
//! Per-request failures ([`QueryError`]) abort the transaction and carry a
//! portable [`ErrorClass`] that the HTTP layer turns into a status code.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use super::backend::BackendError;
use super::sanitizer::ValidationError;
use super::template::{CompileError, RenderError};

/// Result type for per-request engine operations
pub type QueryResult<T> = Result<T, QueryError>;

/// Portable error taxonomy, independent of the originating database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorClass {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    Internal,
}

impl ErrorClass {
    /// HTTP status code for this class
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorClass::BadRequest => 400,
            ErrorClass::Unauthorized => 401,
            ErrorClass::Forbidden => 403,
            ErrorClass::NotFound => 404,
            ErrorClass::Internal => 500,
        }
    }

    /// Returns whether the caller, not the server, is at fault
    pub fn is_client_error(&self) -> bool {
        self.status_code() < 500
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorClass::BadRequest => "BAD_REQUEST",
            ErrorClass::Unauthorized => "UNAUTHORIZED",
            ErrorClass::Forbidden => "FORBIDDEN",
            ErrorClass::NotFound => "NOT_FOUND",
            ErrorClass::Internal => "INTERNAL",
        };
        write!(f, "{}", name)
    }
}

/// Per-request engine failures
#[derive(Debug, Clone, Error)]
pub enum QueryError {
    // ==================
    // Request Errors
    // ==================
    /// A template param or identity failed the identifier grammar
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// A statement template could not be rendered
    #[error("Failed to render statement '{statement}': {source}")]
    Render {
        statement: String,
        #[source]
        source: RenderError,
    },

    /// A rendered statement references a bound param with no value
    #[error("Statement '{statement}' references unknown parameter ':{name}'")]
    MissingBoundParam { statement: String, name: String },

    // ==================
    // Transaction Errors
    // ==================
    /// No transaction could be opened (includes pool exhaustion)
    #[error("Failed to open transaction: {0}")]
    Begin(#[source] BackendError),

    /// The database refused the identity switch
    #[error("Failed to assume role '{role}': {source}")]
    Impersonation {
        role: String,
        #[source]
        source: BackendError,
    },

    /// A declared statement failed; `class` comes from the backend classifier
    #[error("Statement '{statement}' failed: {source}")]
    Statement {
        statement: String,
        class: ErrorClass,
        #[source]
        source: BackendError,
    },

    /// The identity could not be restored after the last statement
    #[error("Failed to reset role: {0}")]
    RoleReset(#[source] BackendError),

    /// The final commit failed
    #[error("Failed to commit transaction: {0}")]
    Commit(#[source] BackendError),

    /// The request outlived its deadline
    #[error("Query exceeded deadline of {0:?}")]
    Timeout(Duration),
}

impl QueryError {
    /// Portable classification of this failure
    pub fn class(&self) -> ErrorClass {
        match self {
            QueryError::Validation(_) => ErrorClass::BadRequest,
            QueryError::Render { .. } => ErrorClass::BadRequest,
            QueryError::MissingBoundParam { .. } => ErrorClass::BadRequest,

            QueryError::Impersonation { .. } => ErrorClass::Unauthorized,
            QueryError::RoleReset(_) => ErrorClass::Unauthorized,
            QueryError::Statement { class, .. } => *class,

            QueryError::Begin(_) => ErrorClass::Internal,
            QueryError::Commit(_) => ErrorClass::Internal,
            QueryError::Timeout(_) => ErrorClass::Internal,
        }
    }

    /// HTTP status code for this failure
    pub fn status_code(&self) -> u16 {
        self.class().status_code()
    }
}

/// Route declaration errors, fatal at load time
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// A statement template failed to compile
    #[error("Invalid template for statement '{statement}': {source}")]
    InvalidTemplate {
        statement: String,
        #[source]
        source: CompileError,
    },

    /// A template-allowed flag is neither a boolean nor "true"/"false"
    #[error("x-grest-template-allowed on '{param}' must be a boolean, not {value}")]
    InvalidTemplateFlag { param: String, value: String },

    /// A route has no statements to run
    #[error("Route '{0}' declares no statements")]
    EmptyRoute(String),

    /// A configured name that is spliced into SQL is not an identifier
    #[error("'{value}' for {field} must be an identifier")]
    InvalidIdentifier { field: String, value: String },
}
