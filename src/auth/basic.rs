//! # HTTP Basic Credential Check
//!
//! Resolves a caller identity from `Authorization: Basic ...` by running a
//! credential query against the user table. The query runs in its own
//! transaction with no role assumed; the first row's `username` column is the
//! identity.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{Map, Value};
use tracing::debug;

use super::errors::{AuthError, AuthResult};
use crate::query::{sanitizer, ConfigError, QueryExecutor};

/// `WWW-Authenticate` challenge sent with every 401
pub const CHALLENGE: &str = "Basic realm=\"Restricted\"";

/// Default credential table
pub const DEFAULT_USER_TABLE: &str = "users";

/// Decoded Basic credentials
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    /// Parse an `Authorization` header value
    pub fn from_header(value: &str) -> AuthResult<Self> {
        let (scheme, encoded) = value
            .trim()
            .split_once(' ')
            .ok_or(AuthError::MalformedHeader)?;
        if !scheme.eq_ignore_ascii_case("basic") {
            return Err(AuthError::MalformedHeader);
        }

        let decoded = STANDARD
            .decode(encoded.trim())
            .map_err(|_| AuthError::MalformedHeader)?;
        let decoded = String::from_utf8(decoded).map_err(|_| AuthError::MalformedHeader)?;
        let (username, password) = decoded.split_once(':').ok_or(AuthError::MalformedHeader)?;

        Ok(Self {
            username: username.to_string(),
            password: password.to_string(),
        })
    }
}

/// Default credential query for a user table
pub fn default_credential_query(user_table: &str) -> String {
    format!(
        "SELECT username FROM {} WHERE username = :username AND password = crypt(:password, password)",
        user_table
    )
}

/// Checks credentials against the database
pub struct CredentialChecker {
    executor: Arc<QueryExecutor>,
    query: String,
}

impl CredentialChecker {
    /// Use the default query against `user_table`
    pub fn new(executor: Arc<QueryExecutor>, user_table: &str) -> Result<Self, ConfigError> {
        if !sanitizer::is_identifier(user_table) {
            return Err(ConfigError::InvalidIdentifier {
                field: "user_table".to_string(),
                value: user_table.to_string(),
            });
        }
        Ok(Self::with_query(executor, default_credential_query(user_table)))
    }

    /// Use a custom query binding `:username` and `:password`
    pub fn with_query(executor: Arc<QueryExecutor>, query: impl Into<String>) -> Self {
        Self {
            executor,
            query: query.into(),
        }
    }

    /// Resolve the identity for `credentials`
    pub async fn check(&self, credentials: &Credentials) -> AuthResult<String> {
        let mut params = Map::new();
        params.insert("username".to_string(), Value::String(credentials.username.clone()));
        params.insert("password".to_string(), Value::String(credentials.password.clone()));

        let rows = self
            .executor
            .query_unscoped(&self.query, &params)
            .await
            .map_err(AuthError::Backend)?;

        let identity = rows
            .first()
            .and_then(|row| row.get("username"))
            .and_then(Value::as_str)
            .map(str::to_string);

        match identity {
            Some(identity) => Ok(identity),
            None => {
                debug!(username = %credentials.username, "Credentials rejected");
                Err(AuthError::InvalidCredentials)
            }
        }
    }
}
