//! # Auth Errors
//!
//! Error types for the authentication module.

use thiserror::Error;

use crate::query::QueryError;

/// Result type for auth operations
pub type AuthResult<T> = Result<T, AuthError>;

/// Credential check errors
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    // ==================
    // Authentication Errors
    // ==================
    /// No Authorization header
    #[error("Authentication required")]
    MissingCredentials,

    /// Authorization header is not valid Basic credentials
    #[error("Malformed authorization header")]
    MalformedHeader,

    /// Username unknown or password wrong (deliberately generic)
    #[error("Invalid credentials")]
    InvalidCredentials,

    // ==================
    // Internal Errors
    // ==================
    /// The credential query itself failed
    #[error("Credential check failed: {0}")]
    Backend(#[source] QueryError),
}

impl AuthError {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            AuthError::MissingCredentials => 401,
            AuthError::MalformedHeader => 401,
            AuthError::InvalidCredentials => 401,

            AuthError::Backend(_) => 500,
        }
    }

    /// Returns whether this error should be logged at warn level
    pub fn is_client_error(&self) -> bool {
        self.status_code() < 500
    }
}
