//! Watch command implementation.

use crate::consumer::{KeyOpFieldsValues, Select, SelectOutcome, Selectable, SubscriberStateTable};
use crate::core::config::{Config, ConfigOverrides};
use crate::redis::DbConnector;
use anyhow::{Context, Result};
use clap::Args;
use std::collections::VecDeque;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

/// Stream the changes of a table.
#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Table name.
    pub table: String,

    /// Database index (overrides config).
    #[arg(long)]
    pub db: Option<u32>,

    /// Store host (overrides config).
    #[arg(long)]
    pub host: Option<String>,

    /// Store port (overrides config).
    #[arg(long)]
    pub port: Option<u16>,

    /// Separator between table name and key (overrides config).
    #[arg(long)]
    pub separator: Option<String>,

    /// Exit after this many milliseconds without a change.
    #[arg(long)]
    pub idle_timeout: Option<u64>,
}

/// Initialize tracing subscriber if the telemetry feature is enabled.
///
/// Logs go to stderr so stdout carries only changes.
#[cfg(feature = "telemetry")]
fn init_tracing(level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

#[cfg(not(feature = "telemetry"))]
fn init_tracing(_level: &str) {}

/// Load the config file if one was given, defaults otherwise.
fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load config from {:?}", path)),
        None => Ok(Config::default()),
    }
}

/// Run the watch command.
pub async fn run_watch(
    args: WatchArgs,
    config_path: Option<&Path>,
    log_level: Option<String>,
) -> Result<()> {
    let mut config = load_config(config_path)?;
    config.apply_overrides(&ConfigOverrides {
        log_level,
        db: args.db,
        host: args.host.clone(),
        port: args.port,
    });
    if let Some(ref separator) = args.separator {
        config.consumer.table_separator = separator.clone();
    }
    config.validate()?;

    init_tracing(&config.telemetry.log_level);

    let db = DbConnector::from_config(&config.connection);
    let mut consumer =
        SubscriberStateTable::new(&db, &args.table, &config.consumer, config.pipeline.clone())
            .await
            .with_context(|| format!("failed to watch {} on {}", args.table, db.endpoint()))?;
    tracing::info!(table = %args.table, keyspace = consumer.keyspace(), "watching table");

    let timeout = args.idle_timeout.map(Duration::from_millis);
    let mut select = Select::new();
    let mut changes = VecDeque::new();

    loop {
        let mut sources: [&mut dyn Selectable; 1] = [&mut consumer];
        let outcome = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
            outcome = select.select(&mut sources, timeout) => outcome?,
        };

        match outcome {
            SelectOutcome::Timeout => {
                tracing::info!("idle timeout reached");
                break;
            }
            SelectOutcome::Object(_) => {
                consumer.pops(&mut changes).await?;
                print_changes(&mut changes)?;
            }
        }
    }

    Ok(())
}

fn print_changes(changes: &mut VecDeque<KeyOpFieldsValues>) -> Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for change in changes.drain(..) {
        serde_json::to_writer(&mut out, &change)?;
        writeln!(out)?;
    }
    out.flush()?;
    Ok(())
}
