//! Statefeed - unified CLI entrypoint.
//!
//! Usage:
//!   statefeed watch PORT --db 4 --idle-timeout 5000
//!   statefeed --config config/statefeed.toml watch PORT
//!   statefeed config validate --config config/statefeed.toml
//!   statefeed config show --format json

use anyhow::Result;
use clap::Parser;
use statefeed::cli::commands::{run_config, run_watch};
use statefeed::cli::{Cli, Commands};
use std::path::PathBuf;

/// Config file used by `config` subcommands when `--config` is not given.
const DEFAULT_CONFIG_PATH: &str = "config/statefeed.toml";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.map(PathBuf::from);

    match cli.command {
        Commands::Watch(args) => run_watch(args, config_path.as_deref(), cli.log_level).await,
        Commands::Config(args) => {
            let path = config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
            run_config(args, &path)
        }
    }
}
