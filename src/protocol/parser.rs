//! Incremental RESP Reply Parser
//!
//! Replies arrive on a byte stream, so a read may end in the middle of a
//! value or carry several values at once. The parser is incremental:
//!
//! - `Ok(Some((value, consumed)))` - a complete value; advance by `consumed`
//! - `Ok(None)` - the value is incomplete; read more bytes and retry
//! - `Err(ParseError)` - the bytes are not valid RESP
//!
//! Parsing never consumes input on `Ok(None)`, so the caller can simply append
//! to its buffer and call again.

use crate::protocol::types::{prefix, RespValue, CRLF};
use bytes::Bytes;
use thiserror::Error;

/// Errors that can occur during RESP parsing.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    /// Unknown type prefix byte
    #[error("unknown type prefix: {0:#04x}")]
    UnknownPrefix(u8),

    /// Invalid integer format
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// Invalid UTF-8 in a simple string or error message
    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(String),

    /// Negative length other than the null marker
    #[error("invalid length: {0}")]
    InvalidLength(i64),

    /// Protocol violation (missing CRLF, too deep, etc.)
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// The value exceeds maximum allowed size
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Maximum size for a single bulk string (512 MB, same as Redis)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum array nesting depth
pub const MAX_NESTING_DEPTH: usize = 32;

/// Parses one RESP value from the front of `buf`.
pub fn parse_reply(buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
    parse_value(buf, 0)
}

fn parse_value(buf: &[u8], depth: usize) -> ParseResult<Option<(RespValue, usize)>> {
    if depth > MAX_NESTING_DEPTH {
        return Err(ParseError::ProtocolError(format!(
            "maximum nesting depth exceeded: {}",
            MAX_NESTING_DEPTH
        )));
    }

    let Some(&type_byte) = buf.first() else {
        return Ok(None);
    };
    let Some((line, header_len)) = read_line(&buf[1..]) else {
        return Ok(None);
    };
    // prefix byte + line + CRLF
    let header_len = 1 + header_len;

    match type_byte {
        prefix::SIMPLE_STRING => Ok(Some((RespValue::SimpleString(utf8(line)?), header_len))),
        prefix::ERROR => Ok(Some((RespValue::Error(utf8(line)?), header_len))),
        prefix::INTEGER => Ok(Some((RespValue::Integer(integer(line)?), header_len))),
        prefix::BULK_STRING => {
            let Some(len) = length(line)? else {
                return Ok(Some((RespValue::Null, header_len)));
            };
            if len > MAX_BULK_SIZE {
                return Err(ParseError::MessageTooLarge {
                    size: len,
                    max: MAX_BULK_SIZE,
                });
            }

            let total = header_len + len + CRLF.len();
            if buf.len() < total {
                return Ok(None);
            }
            if &buf[header_len + len..total] != CRLF {
                return Err(ParseError::ProtocolError(
                    "bulk string missing trailing CRLF".to_string(),
                ));
            }

            let data = Bytes::copy_from_slice(&buf[header_len..header_len + len]);
            Ok(Some((RespValue::BulkString(data), total)))
        }
        prefix::ARRAY => {
            let Some(count) = length(line)? else {
                return Ok(Some((RespValue::Null, header_len)));
            };

            let mut consumed = header_len;
            let mut elements = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                match parse_value(&buf[consumed..], depth + 1)? {
                    Some((value, used)) => {
                        elements.push(value);
                        consumed += used;
                    }
                    None => return Ok(None),
                }
            }
            Ok(Some((RespValue::Array(elements), consumed)))
        }
        other => Err(ParseError::UnknownPrefix(other)),
    }
}

/// Returns the line before the first CRLF and the bytes it spans including
/// the CRLF.
#[inline]
fn read_line(buf: &[u8]) -> Option<(&[u8], usize)> {
    buf.windows(2)
        .position(|w| w == CRLF)
        .map(|pos| (&buf[..pos], pos + CRLF.len()))
}

fn utf8(line: &[u8]) -> ParseResult<String> {
    std::str::from_utf8(line)
        .map(str::to_string)
        .map_err(|e| ParseError::InvalidUtf8(e.to_string()))
}

fn integer(line: &[u8]) -> ParseResult<i64> {
    let s = std::str::from_utf8(line).map_err(|e| ParseError::InvalidUtf8(e.to_string()))?;
    s.parse()
        .map_err(|e: std::num::ParseIntError| ParseError::InvalidInteger(e.to_string()))
}

/// Parses a bulk/array length. `-1` is the null marker and yields `None`.
fn length(line: &[u8]) -> ParseResult<Option<usize>> {
    match integer(line)? {
        -1 => Ok(None),
        n if n < 0 => Err(ParseError::InvalidLength(n)),
        n => Ok(Some(n as usize)),
    }
}
