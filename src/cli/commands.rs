//! CLI command implementations
//!
//! `serve` follows a fixed startup order: config, logging, routes, database,
//! anonymous role, credential checker, listener. Any failure before the
//! listener is bound aborts startup.

use std::path::Path;
use std::sync::Arc;

use serde_json::json;
use tracing::info;

use crate::auth::{AuthMode, CredentialChecker};
use crate::http_server::{AppState, HttpServer};
use crate::observability::init_logging;
use crate::query::{self, BackendKind, QueryExecutor};
use crate::routes::{builtin, openapi, RouteTable};

use super::args::Command;
use super::config::Config;
use super::errors::{CliError, CliResult};
use super::io::write_response;

/// Parse arguments and run the selected command
pub fn run() -> CliResult<()> {
    let cli = super::args::Cli::parse_args();
    run_command(cli.command)
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Serve { config, port } => serve(&config, port),
        Command::Check { config } => check(&config),
    }
}

/// Connect to the database and serve until Ctrl-C
pub fn serve(config_path: &Path, port: Option<u16>) -> CliResult<()> {
    let mut config = Config::load(config_path)?;
    if let Some(port) = port {
        config.server.port = port;
    }

    init_logging(&config.logging);

    let routes = build_routes(&config)?;
    info!(routes = routes.len(), "Routes compiled");

    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| CliError::serve_failed(format!("Failed to create tokio runtime: {}", e)))?;

    rt.block_on(async {
        let state = build_state(&config, routes).await?;
        HttpServer::new(config.server.clone(), Arc::new(state))
            .start()
            .await
            .map_err(|e| CliError::serve_failed(format!("HTTP server failed: {}", e)))
    })
}

/// Compile the configured routes and print them without connecting
pub fn check(config_path: &Path) -> CliResult<()> {
    let config = Config::load(config_path)?;
    let routes = build_routes(&config)?;

    let summary: Vec<_> = routes
        .summary()
        .into_iter()
        .map(|(method, pattern)| json!({ "method": method, "path": pattern }))
        .collect();

    write_response(json!({ "count": routes.len(), "routes": summary }))
}

/// Route document entries followed by the built-in routes
pub fn build_routes(config: &Config) -> CliResult<RouteTable> {
    let mut entries = Vec::new();

    if let Some(path) = &config.routes {
        entries.extend(openapi::load_file(path)?);
    }

    if config.builtin_routes {
        entries.extend(builtin::all(&config.auth.user_table)?);
    }

    Ok(RouteTable::from_entries(entries)?)
}

/// Open the pool and assemble the shared server state
pub async fn build_state(config: &Config, routes: RouteTable) -> CliResult<AppState> {
    let database = &config.database;
    let source = query::connect(database.backend, &database.url, database.pool_settings()).await?;
    info!(backend = %database.backend, "Database connected");

    let executor = Arc::new(QueryExecutor::new(source, database.executor_options())?);

    if database.backend == BackendKind::Postgres && database.create_anonymous_role {
        executor.bootstrap_anonymous_role().await;
    }

    let credentials = match config.auth.mode {
        AuthMode::None => None,
        AuthMode::Basic => Some(match &config.auth.credential_query {
            Some(query) => CredentialChecker::with_query(executor.clone(), query.clone()),
            None => CredentialChecker::new(executor.clone(), &config.auth.user_table)?,
        }),
    };
    info!(mode = ?config.auth.mode, "Authentication configured");

    Ok(AppState::new(routes, executor, credentials))
}
