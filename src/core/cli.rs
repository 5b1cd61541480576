//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use super::constants::APP_NAME_LOWER;

#[derive(Debug, Parser)]
#[command(name = APP_NAME_LOWER, version, about = "Ask questions about tabular data")]
struct Cli {
    /// Host to bind the API server to
    #[arg(long)]
    host: Option<String>,

    /// Port to bind the API server to (default: 5280)
    #[arg(long)]
    port: Option<u16>,

    /// Path to a JSON config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the data directory
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Enable debug logging and SQL echo
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Start the server (default)
    Start,
    /// System maintenance commands
    System {
        #[command(subcommand)]
        command: SystemCommands,
    },
}

#[derive(Debug, Clone, Subcommand)]
pub enum SystemCommands {
    /// Delete the local data directory (datasets and uploads)
    Prune {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

/// CLI values that feed into config resolution
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub config: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub debug: bool,
}

/// Parse process arguments into config overrides plus an optional command
pub fn parse() -> (CliConfig, Option<Commands>) {
    let cli = Cli::parse();
    (
        CliConfig {
            host: cli.host,
            port: cli.port,
            config: cli.config,
            data_dir: cli.data_dir,
            debug: cli.debug,
        },
        cli.command,
    )
}
