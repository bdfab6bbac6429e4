//! Common test utilities.
//!
//! This module contains shared helpers for integration tests.
//! Import with `mod common;` in test files.
//!
//! [`FakeStore`] is an in-process store speaking RESP2. It implements the
//! commands statefeed issues and publishes keyspace notifications for
//! `HSET` and `DEL` to pattern subscribers.

#![allow(dead_code)]

use bytes::BytesMut;
use parking_lot::Mutex;
use statefeed::consumer::SubscriberStateTable;
use statefeed::core::config::Config;
use statefeed::redis::protocol::{RespCodec, Resp2Encoder};
use statefeed::redis::{Connection, PipelineConfig, RedisPipeline, RedisTable, RedisValue};
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

type Rows = BTreeMap<String, Vec<(String, String)>>;

struct Subscriber {
    db: u32,
    pattern: String,
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

#[derive(Default)]
struct State {
    dbs: HashMap<u32, Rows>,
    subscribers: Vec<Subscriber>,
}

/// Shared in-process store.
#[derive(Clone, Default)]
pub struct FakeStore {
    state: Arc<Mutex<State>>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a client connection already bound to `db`.
    pub fn connect(&self, db: u32) -> Connection {
        let (client, server) = tokio::io::duplex(256 * 1024);
        tokio::spawn(serve(self.clone(), server, db));
        Connection::new(client, db)
    }

    /// Pipeline on a fresh connection.
    pub fn pipeline(&self, db: u32, command_max: usize) -> RedisPipeline {
        RedisPipeline::new(self.connect(db), PipelineConfig { command_max })
    }

    /// Table on a fresh connection.
    pub fn table(&self, db: u32, name: &str, separator: &str) -> RedisTable {
        RedisTable::new(self.pipeline(db, 128), name, separator)
    }

    /// Serve over TCP on an ephemeral local port.
    pub async fn listen(&self) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind fake store");
        let addr = listener.local_addr().expect("Failed to read local addr");
        let store = self.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(store.clone(), stream, 0));
            }
        });
        addr
    }

    /// Write hash fields directly, publishing a notification.
    pub fn hset(&self, db: u32, key: &str, fields: &[(&str, &str)]) {
        let owned: Vec<(String, String)> = fields
            .iter()
            .map(|(f, v)| (f.to_string(), v.to_string()))
            .collect();
        self.apply_hset(db, key, &owned);
    }

    /// Delete a key directly, publishing a notification if it existed.
    pub fn del(&self, db: u32, key: &str) -> bool {
        self.apply_del(db, key)
    }

    /// Read a hash directly.
    pub fn hgetall(&self, db: u32, key: &str) -> Option<Vec<(String, String)>> {
        self.state.lock().dbs.get(&db).and_then(|rows| rows.get(key).cloned())
    }

    /// Number of live pattern subscriptions.
    pub fn subscriber_count(&self) -> usize {
        let mut state = self.state.lock();
        state.subscribers.retain(|s| !s.tx.is_closed());
        state.subscribers.len()
    }

    fn apply_hset(&self, db: u32, key: &str, fields: &[(String, String)]) -> i64 {
        let mut state = self.state.lock();
        let row = state
            .dbs
            .entry(db)
            .or_default()
            .entry(key.to_string())
            .or_default();
        let mut added = 0;
        for (field, value) in fields {
            match row.iter_mut().find(|(f, _)| f == field) {
                Some(existing) => existing.1 = value.clone(),
                None => {
                    row.push((field.clone(), value.clone()));
                    added += 1;
                }
            }
        }
        publish(&mut state, db, key, "hset");
        added
    }

    fn apply_del(&self, db: u32, key: &str) -> bool {
        let mut state = self.state.lock();
        let removed = state
            .dbs
            .get_mut(&db)
            .map(|rows| rows.remove(key).is_some())
            .unwrap_or(false);
        if removed {
            publish(&mut state, db, key, "del");
        }
        removed
    }

    fn keys(&self, db: u32, pattern: &str) -> Vec<String> {
        let state = self.state.lock();
        state
            .dbs
            .get(&db)
            .map(|rows| {
                rows.keys()
                    .filter(|k| glob_match(pattern, k))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Register a subscriber and queue its confirmation under the same lock,
    /// so no notification can overtake it.
    fn subscribe(&self, db: u32, pattern: &str, tx: &mpsc::UnboundedSender<Vec<u8>>) {
        let mut state = self.state.lock();
        state.subscribers.push(Subscriber {
            db,
            pattern: pattern.to_string(),
            tx: tx.clone(),
        });
        let confirmation = RedisValue::array(vec![
            RedisValue::bulk_string("psubscribe"),
            RedisValue::bulk_string(pattern),
            RedisValue::integer(state.subscribers.len() as i64),
        ]);
        let _ = tx.send(Resp2Encoder::encode(&confirmation));
    }
}

fn publish(state: &mut State, db: u32, key: &str, event: &str) {
    let channel = format!("__keyspace@{}__:{}", db, key);
    for sub in state.subscribers.iter().filter(|s| s.db == db) {
        if glob_match(&sub.pattern, &channel) {
            let message = RedisValue::array(vec![
                RedisValue::bulk_string("pmessage"),
                RedisValue::bulk_string(&sub.pattern),
                RedisValue::bulk_string(&channel),
                RedisValue::bulk_string(event),
            ]);
            let _ = sub.tx.send(Resp2Encoder::encode(&message));
        }
    }
}

/// Supports exact matches and a single trailing `*`.
fn glob_match(pattern: &str, candidate: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => candidate.starts_with(prefix),
        None => pattern == candidate,
    }
}

async fn serve<S>(store: FakeStore, stream: S, mut db: u32)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();

    tokio::spawn(async move {
        while let Some(bytes) = rx.recv().await {
            if writer.write_all(&bytes).await.is_err() {
                break;
            }
        }
    });

    let mut codec = RespCodec::new();
    let mut buffer = BytesMut::with_capacity(16 * 1024);
    loop {
        loop {
            match codec.decode(&mut buffer) {
                Ok(Some(value)) => {
                    let reply = match Request::parse(value) {
                        Ok(request) => execute(&store, &request, &mut db, &tx),
                        Err(err) => Some(err),
                    };
                    if let Some(reply) = reply {
                        if tx.send(Resp2Encoder::encode(&reply)).is_err() {
                            return;
                        }
                    }
                }
                Ok(None) => break,
                Err(_) => return,
            }
        }
        match reader.read_buf(&mut buffer).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
    }
}

/// A decoded client request.
struct Request {
    name: String,
    args: Vec<String>,
}

impl Request {
    fn parse(value: RedisValue) -> Result<Self, RedisValue> {
        let items = value
            .into_array()
            .ok_or_else(|| RedisValue::err("expected array"))?;
        let mut words = items.into_iter().map(|item| match item {
            RedisValue::BulkString(b) => Ok(String::from_utf8_lossy(&b).into_owned()),
            RedisValue::SimpleString(s) => Ok(s),
            RedisValue::Integer(n) => Ok(n.to_string()),
            _ => Err(RedisValue::err("syntax error")),
        });
        let name = words
            .next()
            .ok_or_else(|| RedisValue::err("empty command"))??
            .to_uppercase();
        let args = words.collect::<Result<Vec<_>, _>>()?;
        Ok(Self { name, args })
    }

    fn argc(&self) -> usize {
        self.args.len()
    }
}

fn execute(
    store: &FakeStore,
    cmd: &Request,
    db: &mut u32,
    tx: &mpsc::UnboundedSender<Vec<u8>>,
) -> Option<RedisValue> {
    let arg = |i: usize| cmd.args.get(i).cloned().unwrap_or_default();
    let reply = match cmd.name.as_str() {
        "PING" => RedisValue::simple_string("PONG"),
        "SELECT" => match arg(0).parse::<u32>() {
            Ok(n) if n < 16 => {
                *db = n;
                RedisValue::ok()
            }
            _ => RedisValue::err("DB index is out of range"),
        },
        "SET" => RedisValue::ok(),
        "HSET" if cmd.argc() >= 3 && cmd.argc() % 2 == 1 => {
            let fields: Vec<(String, String)> = (1..cmd.argc())
                .step_by(2)
                .map(|i| (arg(i), arg(i + 1)))
                .collect();
            RedisValue::integer(store.apply_hset(*db, &arg(0), &fields))
        }
        "HGETALL" if cmd.argc() == 1 => {
            let fields = store.hgetall(*db, &arg(0)).unwrap_or_default();
            RedisValue::array(
                fields
                    .into_iter()
                    .flat_map(|(f, v)| [RedisValue::bulk_string(f), RedisValue::bulk_string(v)])
                    .collect(),
            )
        }
        "KEYS" if cmd.argc() == 1 => RedisValue::array(
            store
                .keys(*db, &arg(0))
                .into_iter()
                .map(RedisValue::bulk_string)
                .collect(),
        ),
        "DEL" if cmd.argc() >= 1 => {
            let removed = (0..cmd.argc())
                .filter(|&i| store.apply_del(*db, &arg(i)))
                .count();
            RedisValue::integer(removed as i64)
        }
        "PSUBSCRIBE" if cmd.argc() == 1 => {
            store.subscribe(*db, &arg(0), tx);
            return None;
        }
        "SCRIPT" if arg(0).eq_ignore_ascii_case("LOAD") => {
            use std::hash::{Hash, Hasher};
            let mut hasher = std::collections::hash_map::DefaultHasher::new();
            arg(1).hash(&mut hasher);
            RedisValue::bulk_string(format!("{:040x}", hasher.finish()))
        }
        other => RedisValue::err(format!("unknown command '{}'", other)),
    };
    Some(reply)
}

/// Read notifications until at least `n` are queued on `consumer`.
pub async fn ingest(consumer: &mut SubscriberStateTable, n: usize) {
    while consumer.queued_events() < n {
        tokio::time::timeout(Duration::from_secs(5), consumer.read_data())
            .await
            .expect("Timed out waiting for notification")
            .expect("Failed to read notification");
    }
}

/// Owned field list from borrowed pairs.
pub fn fields(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(f, v)| (f.to_string(), v.to_string()))
        .collect()
}

/// Write a config file with the given TOML content.
pub fn create_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(content.as_bytes())
        .expect("Failed to write config");
    file
}

/// Load a config from a temp file.
pub fn load_config(file: &NamedTempFile) -> Config {
    Config::from_file(file.path()).expect("Failed to load config")
}
