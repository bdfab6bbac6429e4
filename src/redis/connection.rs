//! Store connections.
//!
//! A [`Connection`] owns one socket plus a write buffer of encoded commands
//! that have not been sent yet and a read buffer of reply bytes that have
//! not been decoded yet. Nothing is shared between connections; each
//! consumer and pipeline opens its own through a [`DbConnector`].

use super::protocol::RespCodec;
use super::{RedisCommand, RedisValue, ReplyKind};
use crate::core::config::ConnectionConfig;
use crate::core::error::{FeedError, FeedResult};
use bytes::BytesMut;
use std::path::PathBuf;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

/// Initial read buffer capacity.
const READ_BUFFER_CAPACITY: usize = 16 * 1024;

/// Initial write buffer capacity.
const WRITE_BUFFER_CAPACITY: usize = 16 * 1024;

/// Byte stream a connection can run over.
pub trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Stream for T {}

/// Where the store listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// TCP host and port.
    Tcp { host: String, port: u16 },
    /// Unix domain socket path.
    Unix { path: PathBuf },
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp { host, port } => write!(f, "{}:{}", host, port),
            Self::Unix { path } => write!(f, "unix:{}", path.display()),
        }
    }
}

/// Opens connections to one logical database of the store.
#[derive(Debug, Clone)]
pub struct DbConnector {
    endpoint: Endpoint,
    db: u32,
}

impl DbConnector {
    /// Create a connector.
    pub fn new(endpoint: Endpoint, db: u32) -> Self {
        Self { endpoint, db }
    }

    /// Create a TCP connector.
    pub fn tcp(host: impl Into<String>, port: u16, db: u32) -> Self {
        Self::new(
            Endpoint::Tcp {
                host: host.into(),
                port,
            },
            db,
        )
    }

    /// Create a Unix socket connector.
    pub fn unix(path: impl Into<PathBuf>, db: u32) -> Self {
        Self::new(Endpoint::Unix { path: path.into() }, db)
    }

    /// Build a connector from the `[connection]` config section.
    pub fn from_config(config: &ConnectionConfig) -> Self {
        match &config.unix_socket {
            Some(path) => Self::unix(path, config.db),
            None => Self::tcp(config.host.clone(), config.port, config.db),
        }
    }

    /// Logical database index.
    pub fn db_id(&self) -> u32 {
        self.db
    }

    /// Endpoint this connector dials.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Open a new dedicated connection and select the database.
    pub async fn connect(&self) -> FeedResult<Connection> {
        let mut conn = match &self.endpoint {
            Endpoint::Tcp { host, port } => {
                let stream = TcpStream::connect((host.as_str(), *port)).await?;
                stream.set_nodelay(true)?;
                Connection::new(stream, self.db)
            }
            #[cfg(unix)]
            Endpoint::Unix { path } => {
                let stream = tokio::net::UnixStream::connect(path).await?;
                Connection::new(stream, self.db)
            }
            #[cfg(not(unix))]
            Endpoint::Unix { .. } => {
                return Err(FeedError::invalid_config(
                    "unix sockets are not supported on this platform",
                ))
            }
        };

        if self.db != 0 {
            conn.select_db(self.db).await?;
        }

        tracing::debug!(endpoint = %self.endpoint, db = self.db, "connected to store");
        Ok(conn)
    }
}

/// A single connection to the store.
pub struct Connection {
    stream: Box<dyn Stream>,
    codec: RespCodec,
    read_buffer: BytesMut,
    write_buffer: BytesMut,
    db: u32,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("db", &self.db)
            .field("buffered_read", &self.read_buffer.len())
            .field("buffered_write", &self.write_buffer.len())
            .finish()
    }
}

impl Connection {
    /// Wrap an already-established stream.
    ///
    /// `db` is the database the stream is bound to; no `SELECT` is issued.
    pub fn new(stream: impl Stream + 'static, db: u32) -> Self {
        Self {
            stream: Box::new(stream),
            codec: RespCodec::new(),
            read_buffer: BytesMut::with_capacity(READ_BUFFER_CAPACITY),
            write_buffer: BytesMut::with_capacity(WRITE_BUFFER_CAPACITY),
            db,
        }
    }

    /// Logical database index.
    pub fn db_id(&self) -> u32 {
        self.db
    }

    /// Encode a command into the write buffer without sending it.
    pub fn append_command(&mut self, command: &RedisCommand) {
        self.codec.encode_command(command, &mut self.write_buffer);
    }

    /// Number of encoded bytes waiting to be sent.
    pub fn pending_write_bytes(&self) -> usize {
        self.write_buffer.len()
    }

    /// Send everything in the write buffer.
    pub async fn flush_writes(&mut self) -> FeedResult<()> {
        if self.write_buffer.is_empty() {
            return Ok(());
        }
        let pending = self.write_buffer.split();
        self.stream.write_all(&pending).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Read the next reply, waiting on the socket as long as needed.
    ///
    /// Pending writes are sent first so a reply can actually arrive.
    pub async fn read_reply(&mut self) -> FeedResult<RedisValue> {
        self.flush_writes().await?;
        loop {
            if let Some(value) = self.codec.decode(&mut self.read_buffer)? {
                return Ok(value);
            }
            self.fill_read_buffer().await?;
        }
    }

    /// Decode a reply that is already fully buffered, without any I/O.
    pub fn try_buffered_reply(&mut self) -> FeedResult<Option<RedisValue>> {
        self.codec.decode(&mut self.read_buffer)
    }

    /// Perform one socket read into the read buffer.
    ///
    /// Waits until the socket is readable. A zero-length read means the
    /// peer went away and is reported as [`FeedError::ConnectionClosed`].
    /// Cancel-safe: if the future is dropped no bytes are lost.
    pub async fn fill_read_buffer(&mut self) -> FeedResult<usize> {
        let n = self.stream.read_buf(&mut self.read_buffer).await?;
        if n == 0 {
            return Err(FeedError::ConnectionClosed);
        }
        Ok(n)
    }

    /// Whether undecoded reply bytes are sitting in the read buffer.
    pub fn has_buffered_data(&self) -> bool {
        !self.read_buffer.is_empty()
    }

    /// Send one command and wait for its reply, checking the reply kind.
    pub async fn execute(
        &mut self,
        command: &RedisCommand,
        expected: ReplyKind,
    ) -> FeedResult<RedisValue> {
        self.append_command(command);
        let reply = self.read_reply().await?;
        check_reply_kind(&reply, expected)?;
        if expected == ReplyKind::Status {
            check_status_ok(&reply)?;
        }
        Ok(reply)
    }

    /// Switch this connection to another logical database.
    pub async fn select_db(&mut self, db: u32) -> FeedResult<()> {
        let cmd = RedisCommand::with_args("SELECT", [db.to_string()]);
        self.execute(&cmd, ReplyKind::Status).await?;
        self.db = db;
        Ok(())
    }

    /// Pattern-subscribe and consume the subscription confirmation.
    ///
    /// After this call the connection only carries pub/sub messages.
    pub async fn psubscribe(&mut self, pattern: &str) -> FeedResult<()> {
        let cmd = RedisCommand::with_args("PSUBSCRIBE", [pattern]);
        let reply = self.execute(&cmd, ReplyKind::Array).await?;

        let confirmed = reply
            .as_array()
            .map(|items| {
                items.len() == 3
                    && items[0].as_str() == Some("psubscribe")
                    && items[1].as_str() == Some(pattern)
            })
            .unwrap_or(false);
        if !confirmed {
            return Err(FeedError::protocol(format!(
                "unexpected psubscribe confirmation: {:?}",
                reply
            )));
        }

        tracing::debug!(pattern, "pattern subscription established");
        Ok(())
    }
}

/// Check that `reply` has the expected kind.
///
/// An error reply where something else was expected surfaces as
/// [`FeedError::Server`] so the store's message is kept.
pub fn check_reply_kind(reply: &RedisValue, expected: ReplyKind) -> FeedResult<()> {
    let actual = reply.kind();
    if actual == expected {
        return Ok(());
    }
    match reply {
        RedisValue::Error(e) => Err(FeedError::Server(e.clone())),
        _ => Err(FeedError::UnexpectedReply { expected, actual }),
    }
}

/// Check that a status reply is `OK`.
pub fn check_status_ok(reply: &RedisValue) -> FeedResult<()> {
    match reply {
        RedisValue::SimpleString(s) if s == "OK" => Ok(()),
        RedisValue::SimpleString(s) => Err(FeedError::StatusNotOk { status: s.clone() }),
        other => Err(FeedError::UnexpectedReply {
            expected: ReplyKind::Status,
            actual: other.kind(),
        }),
    }
}
