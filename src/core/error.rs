//! Error types for the change feed and command pipeline.
//!
//! Two tiers exist. Transport and protocol failures surface as [`FeedError`]
//! and leave the owning connection unusable. Malformed keyspace notifications
//! never reach this type: the consumer logs and drops them.

use crate::redis::{RedisError, ReplyKind};
use thiserror::Error;

/// Common statefeed error conditions.
#[derive(Debug, Error)]
pub enum FeedError {
    /// Socket-level read or write failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer closed the connection while a reply was outstanding.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// Bytes on the wire could not be decoded as a RESP frame.
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// A reply arrived whose kind differs from the one recorded at send time.
    ///
    /// The command stream and reply stream have desynchronized.
    #[error("unexpected reply: expected {expected}, got {actual}")]
    UnexpectedReply {
        expected: ReplyKind,
        actual: ReplyKind,
    },

    /// A status reply other than `OK` where `OK` was required.
    #[error("status reply is not OK: {status}")]
    StatusNotOk { status: String },

    /// The store answered a synchronous command with an error reply.
    #[error("server error: {0}")]
    Server(#[from] RedisError),

    /// Invalid configuration.
    #[error("invalid config: {message}")]
    InvalidConfig { message: String },
}

impl FeedError {
    /// Create a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create an invalid-config error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Whether the connection that produced this error must be torn down.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::InvalidConfig { .. })
    }

    /// Whether this error signals reply-stream desynchronization.
    pub fn is_desync(&self) -> bool {
        matches!(
            self,
            Self::UnexpectedReply { .. } | Self::StatusNotOk { .. }
        )
    }
}

/// Result type using FeedError.
pub type FeedResult<T> = Result<T, FeedError>;
