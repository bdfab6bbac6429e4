//! Table change feed.
//!
//! - [`base`] - buffered consumer with an injected refill strategy
//! - [`subscriber`] - snapshot plus keyspace-notification consumer
//! - [`select`] - readiness multiplexer driving consumers

pub mod base;
pub mod select;
pub mod subscriber;

pub use base::{ConsumerTableBase, Refill};
pub use select::{Select, SelectOutcome, Selectable};
pub use subscriber::{keyspace_pattern, KeyspaceSource, SubscriberStateTable};

use crate::redis::FieldValues;
use serde::{Deserialize, Serialize};

/// Default advisory number of changes fetched per refill.
pub const DEFAULT_POP_BATCH_SIZE: usize = 128;

/// Default separator between a table name and a row key.
pub const DEFAULT_TABLE_SEPARATOR: &str = ":";

/// Prefix passed to the refill strategy by [`ConsumerTableBase::pop`].
pub const EMPTY_PREFIX: &str = "";

/// Mutation kind of a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Set,
    Del,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Set => write!(f, "SET"),
            Self::Del => write!(f, "DEL"),
        }
    }
}

/// One observed change to a table row.
///
/// `fields` is empty for deletes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyOpFieldsValues {
    pub key: String,
    pub op: Operation,
    pub fields: FieldValues,
}

impl KeyOpFieldsValues {
    /// A row was written.
    pub fn set(key: impl Into<String>, fields: FieldValues) -> Self {
        Self {
            key: key.into(),
            op: Operation::Set,
            fields,
        }
    }

    /// A row was deleted.
    pub fn del(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            op: Operation::Del,
            fields: Vec::new(),
        }
    }
}

/// Consumer settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerOptions {
    /// Advisory refill batch size.
    #[serde(default = "default_pop_batch_size")]
    pub pop_batch_size: usize,

    /// Separator between table name and row key.
    #[serde(default = "default_table_separator")]
    pub table_separator: String,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            pop_batch_size: DEFAULT_POP_BATCH_SIZE,
            table_separator: DEFAULT_TABLE_SEPARATOR.to_string(),
        }
    }
}

fn default_pop_batch_size() -> usize {
    DEFAULT_POP_BATCH_SIZE
}

fn default_table_separator() -> String {
    DEFAULT_TABLE_SEPARATOR.to_string()
}
