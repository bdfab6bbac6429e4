//! Table accessors.
//!
//! A table is a set of hashes whose keys share the `<table><separator>`
//! prefix. Each row key maps to an ordered list of field/value pairs.

use super::connection::DbConnector;
use super::pipeline::{PipelineConfig, RedisPipeline};
use super::{RedisCommand, RedisValue, ReplyKind};
use crate::core::error::{FeedError, FeedResult};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Ordered field/value pairs of one row.
pub type FieldValues = Vec<(String, String)>;

/// Read access to a table, used for snapshots and live lookups.
pub trait TableAccessor: Send {
    /// Table name.
    fn table_name(&self) -> &str;

    /// Separator between the table name and the row key.
    fn separator(&self) -> &str;

    /// List every row key currently in the table (without the table prefix).
    fn keys(&mut self) -> Pin<Box<dyn Future<Output = FeedResult<Vec<String>>> + Send + '_>>;

    /// Read a row. `Ok(None)` means the row does not exist.
    fn get<'a>(
        &'a mut self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = FeedResult<Option<FieldValues>>> + Send + 'a>>;
}

/// Table backed by store hashes, accessed through a pipeline.
///
/// Writes ride the pipeline's deferred path; reads are synchronous.
#[derive(Debug)]
pub struct RedisTable {
    pipeline: RedisPipeline,
    table_name: String,
    separator: String,
}

impl RedisTable {
    /// Create a table over an existing pipeline.
    pub fn new(
        pipeline: RedisPipeline,
        table_name: impl Into<String>,
        separator: impl Into<String>,
    ) -> Self {
        Self {
            pipeline,
            table_name: table_name.into(),
            separator: separator.into(),
        }
    }

    /// Open a dedicated connection for this table.
    pub async fn connect(
        db: &DbConnector,
        table_name: impl Into<String>,
        separator: impl Into<String>,
        config: PipelineConfig,
    ) -> FeedResult<Self> {
        let pipeline = RedisPipeline::connect(db, config).await?;
        Ok(Self::new(pipeline, table_name, separator))
    }

    /// Store key for a row.
    pub fn full_key(&self, key: &str) -> String {
        format!("{}{}{}", self.table_name, self.separator, key)
    }

    /// Write fields of a row (`HSET`). The reply is checked on the next
    /// flush, synchronous read, or when the batch ceiling is reached.
    pub async fn set(&mut self, key: &str, fields: &[(String, String)]) -> FeedResult<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut cmd = RedisCommand::with_args("HSET", [self.full_key(key)]);
        for (field, value) in fields {
            cmd = cmd.arg(field).arg(value);
        }
        self.write(&cmd).await
    }

    /// Delete a row (`DEL`).
    pub async fn del(&mut self, key: &str) -> FeedResult<()> {
        let cmd = RedisCommand::with_args("DEL", [self.full_key(key)]);
        self.write(&cmd).await
    }

    /// Retrieve the replies of all queued writes.
    pub async fn flush(&mut self) -> FeedResult<()> {
        self.pipeline.flush().await
    }

    /// Underlying pipeline.
    pub fn pipeline_mut(&mut self) -> &mut RedisPipeline {
        &mut self.pipeline
    }

    /// Queue a write. Nobody pops a table's write replies, so once the
    /// ceiling is hit the validated replies are dropped.
    async fn write(&mut self, cmd: &RedisCommand) -> FeedResult<()> {
        self.pipeline.push(cmd, ReplyKind::Integer).await?;
        if self.pipeline.size() >= self.pipeline.command_max() {
            self.pipeline.flush().await?;
        }
        Ok(())
    }

    async fn read_keys(&mut self) -> FeedResult<Vec<String>> {
        let prefix = format!("{}{}", self.table_name, self.separator);
        let cmd = RedisCommand::with_args("KEYS", [format!("{}*", prefix)]);
        let reply = self.read(&cmd).await?;

        Ok(reply
            .into_iter()
            .filter_map(|item| {
                item.as_str()
                    .and_then(|full| full.strip_prefix(prefix.as_str()))
                    .map(str::to_string)
            })
            .collect())
    }

    async fn read_row(&mut self, key: &str) -> FeedResult<Option<FieldValues>> {
        let cmd = RedisCommand::with_args("HGETALL", [self.full_key(key)]);
        let reply = self.read(&cmd).await?;
        if reply.is_empty() {
            return Ok(None);
        }
        if reply.len() % 2 != 0 {
            return Err(FeedError::protocol(format!(
                "HGETALL returned {} elements for {}",
                reply.len(),
                key
            )));
        }

        let mut fields = Vec::with_capacity(reply.len() / 2);
        let mut items = reply.into_iter();
        while let (Some(field), Some(value)) = (items.next(), items.next()) {
            fields.push((value_to_string(field)?, value_to_string(value)?));
        }
        Ok(Some(fields))
    }

    async fn read(&mut self, cmd: &RedisCommand) -> FeedResult<Vec<RedisValue>> {
        self.pipeline
            .push(cmd, ReplyKind::Array)
            .await?
            .and_then(RedisValue::into_array)
            .ok_or_else(|| FeedError::protocol(format!("{} produced no array reply", cmd.name)))
    }
}

impl TableAccessor for RedisTable {
    fn table_name(&self) -> &str {
        &self.table_name
    }

    fn separator(&self) -> &str {
        &self.separator
    }

    fn keys(&mut self) -> Pin<Box<dyn Future<Output = FeedResult<Vec<String>>> + Send + '_>> {
        Box::pin(self.read_keys())
    }

    fn get<'a>(
        &'a mut self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = FeedResult<Option<FieldValues>>> + Send + 'a>> {
        Box::pin(self.read_row(key))
    }
}

/// Hash contents are arbitrary bytes; invalid UTF-8 is replaced, not rejected.
fn value_to_string(value: RedisValue) -> FeedResult<String> {
    match value {
        RedisValue::BulkString(b) => Ok(String::from_utf8_lossy(&b).into_owned()),
        RedisValue::SimpleString(s) => Ok(s),
        RedisValue::Integer(n) => Ok(n.to_string()),
        other => Err(FeedError::protocol(format!(
            "unexpected {} in hash reply",
            other.kind()
        ))),
    }
}

/// In-process table.
///
/// Clones share the same rows, so one handle can mutate while another is
/// owned by a consumer.
#[derive(Debug, Clone)]
pub struct MemoryTable {
    table_name: String,
    separator: String,
    rows: Arc<RwLock<BTreeMap<String, FieldValues>>>,
}

impl MemoryTable {
    /// Create an empty table.
    pub fn new(table_name: impl Into<String>, separator: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            separator: separator.into(),
            rows: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    /// Merge fields into a row, creating it if needed.
    pub fn set(&self, key: &str, fields: &[(String, String)]) {
        let mut rows = self.rows.write();
        let row = rows.entry(key.to_string()).or_default();
        for (field, value) in fields {
            match row.iter_mut().find(|(f, _)| f == field) {
                Some(existing) => existing.1 = value.clone(),
                None => row.push((field.clone(), value.clone())),
            }
        }
    }

    /// Remove a row. Returns whether it existed.
    pub fn del(&self, key: &str) -> bool {
        self.rows.write().remove(key).is_some()
    }

    /// Read a row without going through the accessor trait.
    pub fn row(&self, key: &str) -> Option<FieldValues> {
        self.rows.read().get(key).cloned()
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    /// Whether the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }
}

impl TableAccessor for MemoryTable {
    fn table_name(&self) -> &str {
        &self.table_name
    }

    fn separator(&self) -> &str {
        &self.separator
    }

    fn keys(&mut self) -> Pin<Box<dyn Future<Output = FeedResult<Vec<String>>> + Send + '_>> {
        let keys = self.rows.read().keys().cloned().collect();
        Box::pin(async move { Ok(keys) })
    }

    fn get<'a>(
        &'a mut self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = FeedResult<Option<FieldValues>>> + Send + 'a>> {
        let row = self.row(key);
        Box::pin(async move { Ok(row) })
    }
}
