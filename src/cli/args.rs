//! CLI argument definitions using clap
//!
//! Commands:
//! - grest serve --config <path>
//! - grest check --config <path>

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// grest - SQL-declared HTTP routes with database-delegated authorization
#[derive(Parser, Debug)]
#[command(name = "grest")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Connect to the database and serve the configured routes
    Serve {
        /// Path to configuration file
        #[arg(long, default_value = "./grest.json")]
        config: PathBuf,

        /// Override the configured port
        #[arg(long)]
        port: Option<u16>,
    },

    /// Compile the configured routes and print them, without connecting
    Check {
        /// Path to configuration file
        #[arg(long, default_value = "./grest.json")]
        config: PathBuf,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serve_args() {
        let cli = Cli::try_parse_from(["grest", "serve", "--config", "x.json", "--port", "9000"])
            .unwrap();
        match cli.command {
            Command::Serve { config, port } => {
                assert_eq!(config, PathBuf::from("x.json"));
                assert_eq!(port, Some(9000));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_default_config_path() {
        let cli = Cli::try_parse_from(["grest", "check"]).unwrap();
        assert!(matches!(cli.command, Command::Check { config } if config == PathBuf::from("./grest.json")));
    }
}
