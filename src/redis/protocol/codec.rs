//! Streaming RESP codec.
//!
//! Splits complete reply frames off a growing read buffer and appends
//! encoded commands to a write buffer.

use super::{ParseResult, Resp2Encoder, Resp2Parser};
use crate::core::error::{FeedError, FeedResult};
use crate::redis::{RedisCommand, RedisValue};
use bytes::{Buf, BytesMut};

/// RESP2 codec for the client side of a connection.
#[derive(Debug, Default)]
pub struct RespCodec {
    parser: Resp2Parser,
}

impl RespCodec {
    /// Create a new codec.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one reply from the front of `buffer`.
    ///
    /// Returns `Ok(None)` when the buffer holds no complete frame. On success
    /// the frame's bytes are removed from the buffer.
    pub fn decode(&mut self, buffer: &mut BytesMut) -> FeedResult<Option<RedisValue>> {
        if buffer.is_empty() {
            return Ok(None);
        }

        let (result, consumed) = self.parser.parse_frame(buffer);
        match result {
            ParseResult::Ok(value) => {
                buffer.advance(consumed);
                Ok(Some(value))
            }
            ParseResult::Incomplete => Ok(None),
            ParseResult::Error(e) => Err(FeedError::protocol(e)),
        }
    }

    /// Append an encoded command to `buffer`.
    pub fn encode_command(&self, command: &RedisCommand, buffer: &mut BytesMut) {
        let encoded = Resp2Encoder::encode(&command.to_value());
        buffer.extend_from_slice(&encoded);
    }
}
