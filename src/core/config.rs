//! Configuration parsing and validation.
//!
//! Statefeed configuration is loaded from TOML files with CLI overrides.
//! Every section is optional; an empty file yields a local connection to
//! database 0 with default batch sizes.

use crate::consumer::ConsumerOptions;
use crate::redis::PipelineConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Number of logical databases a stock store exposes.
pub const MAX_DATABASES: u32 = 16;

/// Top-level statefeed configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Store endpoint and database.
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Change-feed consumer settings.
    #[serde(default)]
    pub consumer: ConsumerOptions,

    /// Command pipeline settings.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Logging configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Store connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// TCP host.
    #[serde(default = "default_host")]
    pub host: String,

    /// TCP port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Unix socket path. Takes precedence over host and port when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unix_socket: Option<String>,

    /// Logical database index.
    #[serde(default)]
    pub db: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            unix_socket: None,
            db: 0,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    6379
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| "failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).with_context(|| "failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Apply CLI overrides to the configuration.
    ///
    /// A host or port override selects TCP and drops any configured socket.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(ref log_level) = overrides.log_level {
            self.telemetry.log_level = log_level.clone();
        }
        if let Some(db) = overrides.db {
            self.connection.db = db;
        }
        if let Some(ref host) = overrides.host {
            self.connection.host = host.clone();
            self.connection.unix_socket = None;
        }
        if let Some(port) = overrides.port {
            self.connection.port = port;
            self.connection.unix_socket = None;
        }
    }

    /// Validate configuration consistency.
    pub fn validate(&self) -> Result<()> {
        self.validate_connection()?;
        self.validate_consumer()?;
        self.validate_pipeline()?;
        self.validate_telemetry()?;
        Ok(())
    }

    fn validate_connection(&self) -> Result<()> {
        if self.connection.db >= MAX_DATABASES {
            anyhow::bail!(
                "connection.db must be in 0..{}, got: {}",
                MAX_DATABASES,
                self.connection.db
            );
        }
        if self.connection.unix_socket.is_none() {
            if self.connection.host.is_empty() {
                anyhow::bail!("connection.host must not be empty");
            }
            if self.connection.port == 0 {
                anyhow::bail!("connection.port must be > 0");
            }
        }
        Ok(())
    }

    fn validate_consumer(&self) -> Result<()> {
        if self.consumer.pop_batch_size == 0 {
            anyhow::bail!("consumer.pop_batch_size must be > 0");
        }
        if self.consumer.table_separator.is_empty() {
            anyhow::bail!("consumer.table_separator must not be empty");
        }
        Ok(())
    }

    fn validate_pipeline(&self) -> Result<()> {
        if self.pipeline.command_max == 0 {
            anyhow::bail!("pipeline.command_max must be > 0");
        }
        Ok(())
    }

    fn validate_telemetry(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.telemetry.log_level.as_str()) {
            anyhow::bail!(
                "telemetry.log_level must be one of {:?}, got: {}",
                valid_levels,
                self.telemetry.log_level
            );
        }
        Ok(())
    }
}

/// CLI override options that can be applied to configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Override log level.
    pub log_level: Option<String>,
    /// Override database index.
    pub db: Option<u32>,
    /// Override TCP host. Clears any configured unix socket.
    pub host: Option<String>,
    /// Override TCP port.
    pub port: Option<u16>,
}
