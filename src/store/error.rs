//! Errors returned by bit stores.
//!
//! Every failure a [`BitStore`](crate::store::BitStore) can report is a
//! [`StoreError`]. The bitset layer never wraps or retries these; they reach
//! the caller exactly as the store produced them.

use crate::protocol::ParseError;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while talking to a bit store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Transport failure (connect, read or write)
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The store sent bytes that are not valid RESP
    #[error("protocol error: {0}")]
    Protocol(#[from] ParseError),

    /// The store answered with an error reply
    #[error("server error: {0}")]
    Server(String),

    /// The store answered with a reply of the wrong type
    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),

    /// Bit offset at or beyond the store's per-key limit
    #[error("bit offset {offset} is out of range (max: {max})")]
    OffsetOutOfRange { offset: u64, max: u64 },

    /// A round trip took longer than the configured timeout
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The connection can no longer be used
    #[error("connection closed")]
    Disconnected,
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
