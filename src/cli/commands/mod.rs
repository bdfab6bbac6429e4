//! CLI command implementations.

mod config;
mod watch;

pub use config::{run_config, ConfigArgs};
pub use watch::{run_watch, WatchArgs};
