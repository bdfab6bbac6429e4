//! Command pipelining.
//!
//! Batches commands whose replies are cheap to validate (nil, status,
//! integer) and retrieves their replies strictly in send order. Commands
//! expecting data back are answered synchronously after the batch drains.
//!
//! At most `command_max` commands are ever in flight on the wire. When the
//! ceiling is reached the batch is sent and every outstanding reply is read
//! and validated; validated replies stay queued until [`RedisPipeline::pop`]
//! hands them out, so batching boundaries never reorder or lose replies.

use super::connection::{check_reply_kind, check_status_ok, Connection, DbConnector};
use super::{RedisCommand, RedisValue, ReplyKind};
use crate::core::error::{FeedError, FeedResult};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Default batch ceiling.
pub const DEFAULT_COMMAND_MAX: usize = 128;

/// Pipeline configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Maximum number of commands in flight before a forced flush.
    #[serde(default = "default_command_max")]
    pub command_max: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            command_max: DEFAULT_COMMAND_MAX,
        }
    }
}

fn default_command_max() -> usize {
    DEFAULT_COMMAND_MAX
}

/// A pipeline of commands over one dedicated connection.
#[derive(Debug)]
pub struct RedisPipeline {
    /// Dedicated connection.
    conn: Connection,

    /// Expected kinds of replies not yet read off the wire, oldest first.
    in_flight: VecDeque<ReplyKind>,

    /// Replies read and validated during a forced flush, oldest first.
    completed: VecDeque<RedisValue>,

    /// Configuration.
    config: PipelineConfig,
}

impl RedisPipeline {
    /// Create a pipeline over an existing connection.
    pub fn new(conn: Connection, config: PipelineConfig) -> Self {
        Self {
            conn,
            in_flight: VecDeque::with_capacity(config.command_max),
            completed: VecDeque::new(),
            config,
        }
    }

    /// Open a dedicated connection and build a pipeline on it.
    pub async fn connect(db: &DbConnector, config: PipelineConfig) -> FeedResult<Self> {
        Ok(Self::new(db.connect().await?, config))
    }

    /// Batch ceiling.
    pub fn command_max(&self) -> usize {
        self.config.command_max
    }

    /// Number of replies sent for but not yet retrieved.
    pub fn size(&self) -> usize {
        self.in_flight.len() + self.completed.len()
    }

    /// Number of commands whose replies are still on the wire.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Logical database index of the underlying connection.
    pub fn db_id(&self) -> u32 {
        self.conn.db_id()
    }

    /// Queue or execute a command.
    ///
    /// Cheap kinds are buffered and `Ok(None)` is returned; fetch the reply
    /// later with [`pop`](Self::pop). Any other kind drains the batch first
    /// and returns the command's own reply.
    pub async fn push(
        &mut self,
        command: &RedisCommand,
        expected: ReplyKind,
    ) -> FeedResult<Option<RedisValue>> {
        if expected.is_pipelined() {
            self.conn.append_command(command);
            self.in_flight.push_back(expected);
            self.may_flush().await?;
            return Ok(None);
        }

        self.flush().await?;
        let reply = self.conn.execute(command, expected).await?;
        Ok(Some(reply))
    }

    /// Retrieve the oldest outstanding reply.
    ///
    /// Returns `Ok(None)` when nothing is pending. Otherwise waits for the
    /// reply if needed and validates it against the kind recorded at push
    /// time; a mismatch or a non-OK status is fatal for this pipeline.
    pub async fn pop(&mut self) -> FeedResult<Option<RedisValue>> {
        if let Some(reply) = self.completed.pop_front() {
            return Ok(Some(reply));
        }
        self.read_next().await
    }

    /// Retrieve and discard every outstanding reply.
    pub async fn flush(&mut self) -> FeedResult<()> {
        self.completed.clear();
        while self.read_next().await?.is_some() {}
        Ok(())
    }

    /// Register a Lua script and return its SHA1 handle.
    pub async fn load_script(&mut self, script: &str) -> FeedResult<String> {
        let cmd = RedisCommand::with_args("SCRIPT", ["LOAD", script]);
        let reply = self
            .push(&cmd, ReplyKind::String)
            .await?
            .ok_or_else(|| FeedError::protocol("SCRIPT LOAD produced no reply"))?;
        reply
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| FeedError::protocol("SCRIPT LOAD reply is not valid UTF-8"))
    }

    /// Flush every outstanding reply and release the connection.
    pub async fn close(mut self) -> FeedResult<()> {
        self.flush().await
    }

    async fn read_next(&mut self) -> FeedResult<Option<RedisValue>> {
        let Some(&expected) = self.in_flight.front() else {
            return Ok(None);
        };

        let reply = self.conn.read_reply().await?;
        self.in_flight.pop_front();

        check_reply_kind(&reply, expected)?;
        if expected == ReplyKind::Status {
            check_status_ok(&reply)?;
        }
        Ok(Some(reply))
    }

    async fn may_flush(&mut self) -> FeedResult<()> {
        if self.in_flight.len() < self.config.command_max {
            return Ok(());
        }

        tracing::trace!(
            in_flight = self.in_flight.len(),
            "pipeline ceiling reached, draining replies"
        );
        while let Some(reply) = self.read_next().await? {
            self.completed.push_back(reply);
        }
        Ok(())
    }
}

impl Drop for RedisPipeline {
    fn drop(&mut self) {
        if !self.in_flight.is_empty() {
            tracing::warn!(
                abandoned = self.in_flight.len(),
                "pipeline dropped with unread replies; call close() to flush"
            );
        }
    }
}
