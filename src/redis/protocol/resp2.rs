//! RESP2 protocol parser and encoder.
//!
//! RESP2 is the default Redis protocol, supporting:
//! - Simple Strings (+)
//! - Errors (-)
//! - Integers (:)
//! - Bulk Strings ($)
//! - Arrays (*)
//! - Null (represented as $-1 or *-1)

use super::{ParseResult, RespType, MAX_BULK_SIZE, MAX_ELEMENTS, MAX_NESTING_DEPTH};
use crate::redis::{RedisError, RedisValue};
use bytes::Bytes;

/// RESP2 parser.
#[derive(Debug, Default)]
pub struct Resp2Parser {
    /// Current nesting depth.
    depth: usize,
}

impl Resp2Parser {
    /// Create a new parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a value from the buffer.
    ///
    /// Returns the parse result and the number of bytes the frame occupies.
    /// The count is only meaningful for [`ParseResult::Ok`].
    pub fn parse_frame(&mut self, data: &[u8]) -> (ParseResult, usize) {
        self.depth = 0;
        self.parse_value(data)
    }

    fn parse_value(&mut self, data: &[u8]) -> (ParseResult, usize) {
        if data.is_empty() {
            return (ParseResult::Incomplete, 0);
        }

        if self.depth > MAX_NESTING_DEPTH {
            return (
                ParseResult::Error("maximum nesting depth exceeded".to_string()),
                0,
            );
        }

        match RespType::from_byte(data[0]) {
            Some(RespType::SimpleString) => self.parse_simple_string(&data[1..]),
            Some(RespType::Error) => self.parse_error(&data[1..]),
            Some(RespType::Integer) => self.parse_integer(&data[1..]),
            Some(RespType::BulkString) => self.parse_bulk_string(&data[1..]),
            Some(RespType::Array) => self.parse_array(&data[1..]),
            None => (
                ParseResult::Error(format!("unknown type byte 0x{:02x}", data[0])),
                0,
            ),
        }
    }

    /// Parse a simple string (+OK\r\n).
    fn parse_simple_string(&self, data: &[u8]) -> (ParseResult, usize) {
        match find_crlf(data) {
            Some(pos) => {
                let s = String::from_utf8_lossy(&data[..pos]).to_string();
                (ParseResult::Ok(RedisValue::SimpleString(s)), pos + 3) // +1 for prefix, +2 for CRLF
            }
            None => (ParseResult::Incomplete, 0),
        }
    }

    /// Parse an error (-ERR message\r\n).
    fn parse_error(&self, data: &[u8]) -> (ParseResult, usize) {
        match find_crlf(data) {
            Some(pos) => {
                let s = String::from_utf8_lossy(&data[..pos]).to_string();
                let (kind, message) = parse_error_string(&s);
                (
                    ParseResult::Ok(RedisValue::Error(RedisError { kind, message })),
                    pos + 3,
                )
            }
            None => (ParseResult::Incomplete, 0),
        }
    }

    /// Parse an integer (:1000\r\n).
    fn parse_integer(&self, data: &[u8]) -> (ParseResult, usize) {
        match find_crlf(data) {
            Some(pos) => match parse_len(&data[..pos]) {
                Some(n) => (ParseResult::Ok(RedisValue::Integer(n)), pos + 3),
                None => (ParseResult::Error("invalid integer".to_string()), 0),
            },
            None => (ParseResult::Incomplete, 0),
        }
    }

    /// Parse a bulk string ($6\r\nfoobar\r\n).
    fn parse_bulk_string(&self, data: &[u8]) -> (ParseResult, usize) {
        let Some(len_pos) = find_crlf(data) else {
            return (ParseResult::Incomplete, 0);
        };

        match parse_len(&data[..len_pos]) {
            Some(-1) => (ParseResult::Ok(RedisValue::Null), len_pos + 3),
            Some(len) if len >= 0 => {
                let len = len as usize;
                if len > MAX_BULK_SIZE {
                    return (
                        ParseResult::Error(format!(
                            "bulk string too large: {} > {}",
                            len, MAX_BULK_SIZE
                        )),
                        0,
                    );
                }

                let data_start = len_pos + 2;
                let data_end = data_start + len;

                if data.len() < data_end + 2 {
                    return (ParseResult::Incomplete, 0);
                }

                if &data[data_end..data_end + 2] != b"\r\n" {
                    return (
                        ParseResult::Error("missing CRLF after bulk string".to_string()),
                        0,
                    );
                }

                let bytes = Bytes::copy_from_slice(&data[data_start..data_end]);
                (
                    ParseResult::Ok(RedisValue::BulkString(bytes)),
                    data_end + 3, // +1 for prefix, +2 for trailing CRLF
                )
            }
            _ => (
                ParseResult::Error("invalid bulk string length".to_string()),
                0,
            ),
        }
    }

    /// Parse an array (*2\r\n...).
    fn parse_array(&mut self, data: &[u8]) -> (ParseResult, usize) {
        let Some(len_pos) = find_crlf(data) else {
            return (ParseResult::Incomplete, 0);
        };

        let len = match parse_len(&data[..len_pos]) {
            Some(-1) => return (ParseResult::Ok(RedisValue::Null), len_pos + 3),
            Some(len) if len >= 0 => len as usize,
            _ => return (ParseResult::Error("invalid array length".to_string()), 0),
        };

        if len > MAX_ELEMENTS {
            return (
                ParseResult::Error(format!("array too large: {} > {}", len, MAX_ELEMENTS)),
                0,
            );
        }

        self.depth += 1;

        let mut elements = Vec::with_capacity(len.min(1024));
        let mut offset = len_pos + 2;

        for _ in 0..len {
            if offset >= data.len() {
                self.depth -= 1;
                return (ParseResult::Incomplete, 0);
            }

            let (result, consumed) = self.parse_value(&data[offset..]);
            match result {
                ParseResult::Ok(value) => {
                    elements.push(value);
                    offset += consumed;
                }
                other => {
                    self.depth -= 1;
                    return (other, 0);
                }
            }
        }

        self.depth -= 1;
        (ParseResult::Ok(RedisValue::Array(elements)), offset + 1) // +1 for prefix
    }
}

/// RESP2 encoder.
#[derive(Debug, Default)]
pub struct Resp2Encoder;

impl Resp2Encoder {
    /// Encode a value to bytes.
    pub fn encode(value: &RedisValue) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64);
        Self::encode_into(value, &mut buf);
        buf
    }

    /// Encode a value into a buffer.
    pub fn encode_into(value: &RedisValue, buf: &mut Vec<u8>) {
        match value {
            RedisValue::SimpleString(s) => {
                buf.push(b'+');
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(b"\r\n");
            }
            RedisValue::Error(e) => {
                buf.push(b'-');
                buf.extend_from_slice(e.kind.as_bytes());
                if !e.message.is_empty() {
                    buf.push(b' ');
                    buf.extend_from_slice(e.message.as_bytes());
                }
                buf.extend_from_slice(b"\r\n");
            }
            RedisValue::Integer(n) => {
                buf.push(b':');
                buf.extend_from_slice(n.to_string().as_bytes());
                buf.extend_from_slice(b"\r\n");
            }
            RedisValue::BulkString(data) => {
                buf.push(b'$');
                buf.extend_from_slice(data.len().to_string().as_bytes());
                buf.extend_from_slice(b"\r\n");
                buf.extend_from_slice(data);
                buf.extend_from_slice(b"\r\n");
            }
            RedisValue::Array(elements) => {
                buf.push(b'*');
                buf.extend_from_slice(elements.len().to_string().as_bytes());
                buf.extend_from_slice(b"\r\n");
                for elem in elements {
                    Self::encode_into(elem, buf);
                }
            }
            RedisValue::Null => {
                buf.extend_from_slice(b"$-1\r\n");
            }
        }
    }
}

/// Find CRLF in data, returning position of first \r.
fn find_crlf(data: &[u8]) -> Option<usize> {
    data.windows(2).position(|w| w == b"\r\n")
}

fn parse_len(data: &[u8]) -> Option<i64> {
    std::str::from_utf8(data).ok()?.parse().ok()
}

/// Parse error string into kind and message.
fn parse_error_string(s: &str) -> (String, String) {
    if let Some(pos) = s.find(' ') {
        (s[..pos].to_string(), s[pos + 1..].to_string())
    } else {
        (s.to_string(), String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_string() {
        let mut parser = Resp2Parser::new();
        let (result, consumed) = parser.parse_frame(b"+OK\r\n");
        assert!(matches!(result, ParseResult::Ok(RedisValue::SimpleString(s)) if s == "OK"));
        assert_eq!(consumed, 5);
    }

    #[test]
    fn test_parse_error() {
        let mut parser = Resp2Parser::new();
        let result = parser.parse_frame(b"-ERR unknown command\r\n").0;
        assert!(
            matches!(result, ParseResult::Ok(RedisValue::Error(e)) if e.kind == "ERR" && e.message == "unknown command")
        );
    }

    #[test]
    fn test_parse_integer() {
        let mut parser = Resp2Parser::new();

        let result = parser.parse_frame(b":1000\r\n").0;
        assert!(matches!(result, ParseResult::Ok(RedisValue::Integer(1000))));

        let result = parser.parse_frame(b":-42\r\n").0;
        assert!(matches!(result, ParseResult::Ok(RedisValue::Integer(-42))));

        let result = parser.parse_frame(b":abc\r\n").0;
        assert!(matches!(result, ParseResult::Error(_)));
    }

    #[test]
    fn test_parse_bulk_string() {
        let mut parser = Resp2Parser::new();

        let (result, consumed) = parser.parse_frame(b"$6\r\nfoobar\r\n");
        assert!(
            matches!(result, ParseResult::Ok(RedisValue::BulkString(b)) if b.as_ref() == b"foobar")
        );
        assert_eq!(consumed, 12);

        let result = parser.parse_frame(b"$0\r\n\r\n").0;
        assert!(matches!(result, ParseResult::Ok(RedisValue::BulkString(b)) if b.is_empty()));
    }

    #[test]
    fn test_parse_null_forms() {
        let mut parser = Resp2Parser::new();

        let (result, consumed) = parser.parse_frame(b"$-1\r\n");
        assert!(matches!(result, ParseResult::Ok(RedisValue::Null)));
        assert_eq!(consumed, 5);

        let (result, consumed) = parser.parse_frame(b"*-1\r\n:1\r\n");
        assert!(matches!(result, ParseResult::Ok(RedisValue::Null)));
        assert_eq!(consumed, 5);
    }

    #[test]
    fn test_parse_pmessage_frame() {
        let mut parser = Resp2Parser::new();
        let frame = b"*4\r\n$8\r\npmessage\r\n$3\r\np:*\r\n$3\r\nc:k\r\n$4\r\nhset\r\n+OK\r\n";
        let (result, consumed) = parser.parse_frame(frame);
        if let ParseResult::Ok(RedisValue::Array(arr)) = result {
            assert_eq!(arr.len(), 4);
            assert_eq!(arr[3].as_str(), Some("hset"));
        } else {
            panic!("expected array");
        }
        assert_eq!(&frame[consumed..], b"+OK\r\n");
    }

    #[test]
    fn test_parse_nested_array() {
        let mut parser = Resp2Parser::new();
        let result = parser.parse_frame(b"*2\r\n*2\r\n:1\r\n:2\r\n*2\r\n:3\r\n:4\r\n").0;
        if let ParseResult::Ok(RedisValue::Array(arr)) = result {
            assert_eq!(arr.len(), 2);
            assert!(matches!(&arr[0], RedisValue::Array(inner) if inner.len() == 2));
        } else {
            panic!("expected array");
        }
    }

    #[test]
    fn test_parse_incomplete() {
        let mut parser = Resp2Parser::new();

        assert!(matches!(parser.parse_frame(b"+OK").0, ParseResult::Incomplete));
        assert!(matches!(parser.parse_frame(b"$6\r\nfoo").0, ParseResult::Incomplete));
        assert!(matches!(
            parser.parse_frame(b"*2\r\n$3\r\nfoo\r\n").0,
            ParseResult::Incomplete
        ));
    }

    #[test]
    fn test_parse_unknown_prefix() {
        let mut parser = Resp2Parser::new();
        assert!(matches!(parser.parse_frame(b"PING\r\n").0, ParseResult::Error(_)));
    }

    #[test]
    fn test_encode_command_array() {
        let value = RedisValue::Array(vec![
            RedisValue::BulkString(Bytes::from("DEL")),
            RedisValue::BulkString(Bytes::from("T:k")),
        ]);
        assert_eq!(Resp2Encoder::encode(&value), b"*2\r\n$3\r\nDEL\r\n$3\r\nT:k\r\n");
    }

    #[test]
    fn test_encode_error_without_message() {
        let value = RedisValue::Error(RedisError::new("NOSCRIPT", ""));
        assert_eq!(Resp2Encoder::encode(&value), b"-NOSCRIPT\r\n");
    }
}
