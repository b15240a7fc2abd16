//! CLI module for grest
//!
//! Provides command-line interface for:
//! - serve: Connect to the database and serve declared routes
//! - check: Compile routes and print them

mod args;
mod commands;
pub mod config;
mod errors;
mod io;

pub use args::{Cli, Command};
pub use commands::{build_routes, build_state, check, run, run_command, serve};
pub use config::{AuthConfig, Config, DatabaseConfig};
pub use errors::{CliError, CliErrorCode, CliResult};
