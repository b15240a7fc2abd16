//! Configuration file
//!
//! A JSON document; every field has a default, so `{}` is a valid config.
//! Environment variables are applied after the file and win over it:
//!
//! - `GREST_DATABASE_URL` - `database.url`
//! - `GREST_AUTHENTICATION` - `auth.mode` (`none` or `basic`)
//! - `GREST_USER_TABLE` - `auth.user_table`

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::errors::{CliError, CliResult};
use crate::auth::{AuthMode, DEFAULT_USER_TABLE};
use crate::http_server::HttpServerConfig;
use crate::observability::LoggingConfig;
use crate::query::{sanitizer, BackendKind, ExecutorOptions, PoolSettings, DEFAULT_ANONYMOUS_ROLE};

/// Configuration file structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: HttpServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// OpenAPI route document (optional)
    #[serde(default)]
    pub routes: Option<PathBuf>,

    /// Serve the `/_data` and `/_roles` routes (default: true)
    #[serde(default = "default_true")]
    pub builtin_routes: bool,
}

/// Database connection and execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// "postgres" or "sqlite" (default: "postgres")
    #[serde(default = "default_backend")]
    pub backend: BackendKind,

    #[serde(default = "default_database_url")]
    pub url: String,

    /// Pool size (default: 10)
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// How long a request waits for a pooled connection (default: 5000)
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,

    /// Deadline for a whole request (optional)
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,

    /// Role used for unauthenticated requests (default: "anon")
    #[serde(default = "default_anonymous_role")]
    pub anonymous_role: String,

    /// Run `CREATE ROLE <anonymous_role>` at startup (default: true)
    #[serde(default = "default_true")]
    pub create_anonymous_role: bool,

    /// Identity switch rendered with `{{role}}`; unset uses the backend default,
    /// an empty string disables it
    #[serde(default)]
    pub impersonate_statement: Option<String>,

    /// Identity restore; unset uses the backend default, empty disables it
    #[serde(default)]
    pub reset_statement: Option<String>,
}

fn default_true() -> bool {
    true
}
fn default_backend() -> BackendKind {
    BackendKind::Postgres
}
fn default_database_url() -> String {
    "postgres://localhost/postgres".to_string()
}
fn default_max_connections() -> u32 {
    10
}
fn default_acquire_timeout_ms() -> u64 {
    5000
}
fn default_anonymous_role() -> String {
    DEFAULT_ANONYMOUS_ROLE.to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            url: default_database_url(),
            max_connections: default_max_connections(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            request_timeout_ms: None,
            anonymous_role: default_anonymous_role(),
            create_anonymous_role: true,
            impersonate_statement: None,
            reset_statement: None,
        }
    }
}

impl DatabaseConfig {
    pub fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            max_connections: self.max_connections,
            acquire_timeout: Duration::from_millis(self.acquire_timeout_ms),
        }
    }

    /// Executor options with backend defaults filled in
    pub fn executor_options(&self) -> ExecutorOptions {
        let resolve = |configured: &Option<String>, default: Option<&'static str>| {
            match configured {
                Some(statement) if statement.trim().is_empty() => None,
                Some(statement) => Some(statement.clone()),
                None => default.map(str::to_string),
            }
        };

        ExecutorOptions {
            impersonate_statement: resolve(
                &self.impersonate_statement,
                self.backend.default_impersonate_statement(),
            ),
            reset_statement: resolve(&self.reset_statement, self.backend.default_reset_statement()),
            anonymous_role: self.anonymous_role.clone(),
            request_timeout: self.request_timeout_ms.map(Duration::from_millis),
        }
    }
}

/// Authentication settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// "none" or "basic" (default: "none")
    #[serde(default)]
    pub mode: AuthMode,

    /// Credential table (default: "users")
    #[serde(default = "default_user_table")]
    pub user_table: String,

    /// Custom credential query binding `:username` and `:password` (optional)
    #[serde(default)]
    pub credential_query: Option<String>,
}

fn default_user_table() -> String {
    DEFAULT_USER_TABLE.to_string()
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: AuthMode::None,
            user_table: default_user_table(),
            credential_query: None,
        }
    }
}

impl Config {
    /// Load configuration from file, then apply environment overrides
    pub fn load(path: &Path) -> CliResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| CliError::config_error(format!("Failed to read config: {}", e)))?;

        let mut config = Self::parse(&content)?;
        config.resolve_paths(path.parent().unwrap_or_else(|| Path::new(".")));
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;

        Ok(config)
    }

    /// Parse configuration JSON
    pub fn parse(content: &str) -> CliResult<Self> {
        serde_json::from_str(content)
            .map_err(|e| CliError::config_error(format!("Invalid config JSON: {}", e)))
    }

    /// Resolve a relative route document against `base`
    pub fn resolve_paths(&mut self, base: &Path) {
        if let Some(routes) = &self.routes {
            if routes.is_relative() {
                self.routes = Some(base.join(routes));
            }
        }
    }

    /// Apply overrides from `lookup` (the process environment in production)
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> CliResult<()> {
        if let Some(url) = lookup("GREST_DATABASE_URL") {
            self.database.url = url;
        }
        if let Some(mode) = lookup("GREST_AUTHENTICATION") {
            self.auth.mode = mode
                .parse()
                .map_err(|e: String| CliError::config_error(format!("GREST_AUTHENTICATION: {}", e)))?;
        }
        if let Some(table) = lookup("GREST_USER_TABLE") {
            self.auth.user_table = table;
        }
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> CliResult<()> {
        if self.database.max_connections == 0 {
            return Err(CliError::config_error("database.max_connections must be > 0"));
        }

        if self.database.url.trim().is_empty() {
            return Err(CliError::config_error("database.url must not be empty"));
        }

        if !sanitizer::is_identifier(&self.database.anonymous_role) {
            return Err(CliError::config_error(format!(
                "Invalid database.anonymous_role: '{}'. Must be an identifier.",
                self.database.anonymous_role
            )));
        }

        if !sanitizer::is_identifier(&self.auth.user_table) {
            return Err(CliError::config_error(format!(
                "Invalid auth.user_table: '{}'. Must be an identifier.",
                self.auth.user_table
            )));
        }

        if self.database.request_timeout_ms == Some(0) {
            return Err(CliError::config_error("database.request_timeout_ms must be > 0"));
        }

        Ok(())
    }
}
