//! Command-line interface.

pub mod commands;

use clap::{Parser, Subcommand};

/// Statefeed - table change feed over keyspace notifications.
#[derive(Parser, Debug)]
#[command(name = "statefeed")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path.
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Stream the changes of a table as JSON lines.
    Watch(commands::WatchArgs),
    /// Configuration operations.
    Config(commands::ConfigArgs),
}
