//! Keyspace-notification consumer.
//!
//! [`SubscriberStateTable`] streams the changes of one table. At construction
//! it pattern-subscribes to the table's keyspace channel and then scans the
//! table, so a write racing the scan is seen twice rather than missed. The
//! scan result is handed out first; live notifications follow.
//!
//! Notifications only carry the key and the command name. Field values of a
//! write are read back from the table when the notification is decoded, so
//! several writes to one key between refills arrive as one change carrying
//! the newest values.

use super::base::{ConsumerTableBase, Refill};
use super::select::Selectable;
use super::{ConsumerOptions, KeyOpFieldsValues};
use crate::core::error::FeedResult;
use crate::redis::{
    Connection, DbConnector, PipelineConfig, RedisTable, RedisValue, TableAccessor,
};
use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;

/// Command name a keyspace notification carries for deletes.
const DEL_COMMAND: &str = "del";

/// Keyspace channel pattern covering every row of `table`.
pub fn keyspace_pattern(db: u32, table: &str, separator: &str) -> String {
    format!("__keyspace@{}__:{}{}*", db, table, separator)
}

/// Decoded notification.
#[derive(Debug, PartialEq, Eq)]
enum Notification {
    Set(String),
    Del(String),
}

/// Refill strategy combining a one-time table snapshot with live
/// keyspace notifications.
pub struct KeyspaceSource {
    subscription: Connection,
    table: Box<dyn TableAccessor>,
    pattern: String,
    key_prefix: String,
    snapshot: VecDeque<KeyOpFieldsValues>,
    events: VecDeque<RedisValue>,
}

impl std::fmt::Debug for KeyspaceSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyspaceSource")
            .field("table", &self.table.table_name())
            .field("pattern", &self.pattern)
            .field("snapshot", &self.snapshot.len())
            .field("events", &self.events.len())
            .finish()
    }
}

impl KeyspaceSource {
    /// Subscribe on `subscription`, then snapshot `table`.
    ///
    /// The order matters: a write landing between the two steps must
    /// produce a queued notification.
    pub async fn new(
        mut subscription: Connection,
        mut table: Box<dyn TableAccessor>,
    ) -> FeedResult<Self> {
        let pattern = keyspace_pattern(
            subscription.db_id(),
            table.table_name(),
            table.separator(),
        );
        subscription.psubscribe(&pattern).await?;

        let mut snapshot = VecDeque::new();
        for key in table.keys().await? {
            match table.get(&key).await? {
                Some(fields) => snapshot.push_back(KeyOpFieldsValues::set(key, fields)),
                None => tracing::debug!(%key, "row vanished during snapshot"),
            }
        }
        tracing::info!(
            table = table.table_name(),
            rows = snapshot.len(),
            %pattern,
            "table snapshot loaded"
        );

        let key_prefix = format!("{}{}", table.table_name(), table.separator());
        Ok(Self {
            subscription,
            table,
            pattern,
            key_prefix,
            snapshot,
            events: VecDeque::new(),
        })
    }

    /// Subscribed channel pattern.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Name of the consumed table.
    pub fn table_name(&self) -> &str {
        self.table.table_name()
    }

    /// Raw notifications waiting to be decoded.
    pub fn queued_events(&self) -> usize {
        self.events.len()
    }

    /// Wait until the subscription has bytes to read.
    ///
    /// Resolves at once if undecoded bytes are already buffered.
    pub async fn readable(&mut self) -> FeedResult<()> {
        if !self.subscription.has_buffered_data() {
            self.subscription.fill_read_buffer().await?;
        }
        Ok(())
    }

    /// Read one notification, then queue every further one that is already
    /// fully buffered.
    pub async fn read_data(&mut self) -> FeedResult<()> {
        let reply = self.subscription.read_reply().await?;
        self.events.push_back(reply);
        while let Some(reply) = self.subscription.try_buffered_reply()? {
            self.events.push_back(reply);
        }
        Ok(())
    }

    /// More than one change is available without further I/O.
    pub fn has_cached_data(&self) -> bool {
        self.snapshot.len() > 1 || self.events.len() > 1
    }

    /// The snapshot has not been handed out yet.
    pub fn initialized_with_data(&self) -> bool {
        !self.snapshot.is_empty()
    }

    async fn refill(&mut self, out: &mut VecDeque<KeyOpFieldsValues>) -> FeedResult<()> {
        if !self.snapshot.is_empty() {
            out.extend(self.snapshot.drain(..));
            return Ok(());
        }

        // keys emitted as SET in this refill with no DEL since
        let mut fresh = HashSet::new();
        let events = std::mem::take(&mut self.events);
        for event in events {
            match self.decode(event) {
                Some(Notification::Del(key)) => {
                    fresh.remove(&key);
                    out.push_back(KeyOpFieldsValues::del(key));
                }
                Some(Notification::Set(key)) if fresh.contains(&key) => {}
                Some(Notification::Set(key)) => match self.table.get(&key).await? {
                    Some(fields) => {
                        fresh.insert(key.clone());
                        out.push_back(KeyOpFieldsValues::set(key, fields));
                    }
                    None => tracing::debug!(%key, "row vanished before read, dropping change"),
                },
                None => {}
            }
        }
        Ok(())
    }

    /// Decode a `pmessage` reply. Malformed messages are logged and dropped.
    fn decode(&self, event: RedisValue) -> Option<Notification> {
        if event.is_null() {
            return None;
        }

        let Some(items) = event.into_array() else {
            tracing::error!(pattern = %self.pattern, "notification is not an array");
            return None;
        };
        if items.len() != 4 {
            tracing::error!(
                pattern = %self.pattern,
                len = items.len(),
                "notification has wrong number of elements"
            );
            return None;
        }

        let (Some(pattern), Some(channel), Some(command)) =
            (items[1].as_str(), items[2].as_str(), items[3].as_str())
        else {
            tracing::error!(pattern = %self.pattern, "notification element is not a string");
            return None;
        };
        if pattern != self.pattern {
            tracing::error!(
                expected = %self.pattern,
                actual = pattern,
                "notification for foreign pattern"
            );
            return None;
        }

        let Some((_, full_key)) = channel.split_once(':') else {
            tracing::error!(channel, "notification channel has no key");
            return None;
        };
        let Some(key) = full_key.strip_prefix(self.key_prefix.as_str()) else {
            tracing::error!(channel, "notification key outside table");
            return None;
        };

        let key = key.to_string();
        if command == DEL_COMMAND {
            Some(Notification::Del(key))
        } else {
            Some(Notification::Set(key))
        }
    }
}

impl Refill for KeyspaceSource {
    fn pops<'a>(
        &'a mut self,
        out: &'a mut VecDeque<KeyOpFieldsValues>,
        _prefix: &'a str,
        _batch_size: usize,
    ) -> Pin<Box<dyn Future<Output = FeedResult<()>> + Send + 'a>> {
        Box::pin(self.refill(out))
    }
}

/// Change feed of one table.
#[derive(Debug)]
pub struct SubscriberStateTable {
    inner: ConsumerTableBase<KeyspaceSource>,
}

impl SubscriberStateTable {
    /// Open a subscription connection and a table connection to `db` and
    /// start consuming `table_name`.
    pub async fn new(
        db: &DbConnector,
        table_name: &str,
        options: &ConsumerOptions,
        pipeline: PipelineConfig,
    ) -> FeedResult<Self> {
        let subscription = db.connect().await?;
        let table =
            RedisTable::connect(db, table_name, options.table_separator.as_str(), pipeline)
                .await?;
        Self::with_parts(subscription, Box::new(table), options).await
    }

    /// Build from an established subscription connection and a table
    /// accessor.
    pub async fn with_parts(
        subscription: Connection,
        table: Box<dyn TableAccessor>,
        options: &ConsumerOptions,
    ) -> FeedResult<Self> {
        let source = KeyspaceSource::new(subscription, table).await?;
        Ok(Self {
            inner: ConsumerTableBase::with_batch_size(source, options.pop_batch_size),
        })
    }

    /// Subscribed channel pattern.
    pub fn keyspace(&self) -> &str {
        self.inner.source().pattern()
    }

    /// Name of the consumed table.
    pub fn table_name(&self) -> &str {
        self.inner.source().table_name()
    }

    /// Raw notifications read but not yet decoded.
    pub fn queued_events(&self) -> usize {
        self.inner.source().queued_events()
    }

    /// Pop the next change. `Ok(None)` means nothing is available right now.
    pub async fn pop(&mut self) -> FeedResult<Option<KeyOpFieldsValues>> {
        self.inner.pop().await
    }

    /// Pop the next change, passing `prefix` to the refill.
    pub async fn pop_with_prefix(&mut self, prefix: &str) -> FeedResult<Option<KeyOpFieldsValues>> {
        self.inner.pop_with_prefix(prefix).await
    }

    /// Move every available change into `out`.
    pub async fn pops(&mut self, out: &mut VecDeque<KeyOpFieldsValues>) -> FeedResult<()> {
        self.inner.drain_into(out).await
    }

    /// Ingest notifications after the subscription became readable.
    pub async fn read_data(&mut self) -> FeedResult<()> {
        self.inner.source_mut().read_data().await
    }
}

impl Selectable for SubscriberStateTable {
    fn readable(&mut self) -> Pin<Box<dyn Future<Output = FeedResult<()>> + Send + '_>> {
        Box::pin(self.inner.source_mut().readable())
    }

    fn read_data(&mut self) -> Pin<Box<dyn Future<Output = FeedResult<()>> + Send + '_>> {
        Box::pin(SubscriberStateTable::read_data(self))
    }

    fn has_cached_data(&self) -> bool {
        self.inner.buffered() > 1 || self.inner.source().has_cached_data()
    }

    fn initialized_with_data(&self) -> bool {
        self.inner.buffered() > 0 || self.inner.source().initialized_with_data()
    }
}
