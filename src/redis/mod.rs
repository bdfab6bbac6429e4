//! Redis-protocol client plumbing.
//!
//! This module holds the RESP value model and the client-side pieces the
//! change feed is built on.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  RedisTable (KEYS / HGETALL / HSET / DEL)                    │
//! │    ↓                                                        │
//! │  RedisPipeline (expected-reply FIFO, batch ceiling)         │
//! │    ↓                                                        │
//! │  Connection (write buffer, read buffer, RESP2 codec)        │
//! │    ↓                                                        │
//! │  TCP / Unix socket                                          │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod connection;
pub mod pipeline;
pub mod protocol;
pub mod table;

use bytes::Bytes;

// Re-export main types
pub use connection::{Connection, DbConnector, Endpoint, Stream};
pub use pipeline::{PipelineConfig, RedisPipeline};
pub use table::{FieldValues, MemoryTable, RedisTable, TableAccessor};

/// Redis value type (RESP2 type system).
#[derive(Debug, Clone, PartialEq)]
pub enum RedisValue {
    /// Simple string (+OK\r\n)
    SimpleString(String),

    /// Error (-ERR message\r\n)
    Error(RedisError),

    /// Integer (:1000\r\n)
    Integer(i64),

    /// Bulk string ($6\r\nfoobar\r\n)
    BulkString(Bytes),

    /// Array (*2\r\n...)
    Array(Vec<RedisValue>),

    /// Null ($-1\r\n or *-1\r\n)
    Null,
}

impl RedisValue {
    /// Create a simple string.
    pub fn simple_string(s: impl Into<String>) -> Self {
        Self::SimpleString(s.into())
    }

    /// Create an OK response.
    pub fn ok() -> Self {
        Self::SimpleString("OK".to_string())
    }

    /// Create an error.
    pub fn error(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error(RedisError {
            kind: kind.into(),
            message: message.into(),
        })
    }

    /// Create a generic error.
    pub fn err(message: impl Into<String>) -> Self {
        Self::error("ERR", message)
    }

    /// Create an integer.
    pub fn integer(n: i64) -> Self {
        Self::Integer(n)
    }

    /// Create a bulk string from a string.
    pub fn bulk_string(s: impl AsRef<str>) -> Self {
        Self::BulkString(Bytes::from(s.as_ref().to_string()))
    }

    /// Create an array.
    pub fn array(items: Vec<RedisValue>) -> Self {
        Self::Array(items)
    }

    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The reply kind of this value.
    pub fn kind(&self) -> ReplyKind {
        match self {
            Self::SimpleString(_) => ReplyKind::Status,
            Self::Error(_) => ReplyKind::Error,
            Self::Integer(_) => ReplyKind::Integer,
            Self::BulkString(_) => ReplyKind::String,
            Self::Array(_) => ReplyKind::Array,
            Self::Null => ReplyKind::Nil,
        }
    }

    /// Try to get as string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::SimpleString(s) => Some(s),
            Self::BulkString(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Try to get as array.
    pub fn as_array(&self) -> Option<&[RedisValue]> {
        match self {
            Self::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Convert to array, consuming self.
    pub fn into_array(self) -> Option<Vec<RedisValue>> {
        match self {
            Self::Array(a) => Some(a),
            _ => None,
        }
    }
}

/// Shape a reply is expected to take.
///
/// `Nil`, `Status` and `Integer` are the cheap kinds a [`RedisPipeline`]
/// batches; every other kind is answered synchronously.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplyKind {
    /// Null bulk string or null array.
    Nil,
    /// Simple string such as `+OK`.
    Status,
    /// Integer reply.
    Integer,
    /// Bulk string.
    String,
    /// Array (including pub/sub messages).
    Array,
    /// Error reply.
    Error,
}

impl ReplyKind {
    /// Whether commands expecting this kind may be deferred in a pipeline.
    pub fn is_pipelined(&self) -> bool {
        matches!(self, Self::Nil | Self::Status | Self::Integer)
    }
}

impl std::fmt::Display for ReplyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Nil => write!(f, "nil"),
            Self::Status => write!(f, "status"),
            Self::Integer => write!(f, "integer"),
            Self::String => write!(f, "string"),
            Self::Array => write!(f, "array"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Redis error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisError {
    /// Error kind (ERR, WRONGTYPE, NOSCRIPT, etc.)
    pub kind: String,
    /// Error message.
    pub message: String,
}

impl RedisError {
    /// Create a new error.
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Create a generic error.
    pub fn generic(message: impl Into<String>) -> Self {
        Self::new("ERR", message)
    }
}

impl std::fmt::Display for RedisError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.kind, self.message)
    }
}

impl std::error::Error for RedisError {}

/// Redis command.
#[derive(Debug, Clone)]
pub struct RedisCommand {
    /// Command name (uppercase).
    pub name: String,

    /// Command arguments.
    pub args: Vec<Bytes>,
}

impl RedisCommand {
    /// Create a new command.
    pub fn new(name: impl Into<String>, args: Vec<Bytes>) -> Self {
        Self {
            name: name.into().to_uppercase(),
            args,
        }
    }

    /// Create a command from string arguments.
    pub fn with_args<I, S>(name: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let args = args
            .into_iter()
            .map(|a| Bytes::copy_from_slice(a.as_ref().as_bytes()))
            .collect();
        Self::new(name, args)
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl AsRef<[u8]>) -> Self {
        self.args.push(Bytes::copy_from_slice(arg.as_ref()));
        self
    }

    /// Convert to the RESP array sent on the wire.
    pub fn to_value(&self) -> RedisValue {
        let mut items = Vec::with_capacity(self.args.len() + 1);
        items.push(RedisValue::bulk_string(&self.name));
        items.extend(self.args.iter().cloned().map(RedisValue::BulkString));
        RedisValue::Array(items)
    }
}
