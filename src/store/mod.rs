//! Bit Store Module
//!
//! A [`BitStore`] is the key-value backend a [`ShardedBitSet`] writes to. It
//! offers per-key bit reads, batched writes through a [`Pipeline`], and
//! multi-key deletion. Two implementations ship with the crate:
//!
//! - [`MemoryStore`]: in-process, Redis bit semantics, TTLs and counters
//! - [`RespStore`]: a pipelined RESP client for Redis-compatible servers
//!
//! ```text
//!  ShardedBitSet
//!       │  get_bit / flush(Pipeline) / delete
//!       ▼
//! ┌──────────────┐      ┌──────────────────────────────┐
//! │   BitStore   │─────>│ MemoryStore (segments+TTL)   │
//! │   (trait)    │      └──────────────────────────────┘
//! │              │      ┌──────────────────────────────┐
//! │              │─────>│ RespStore ──TCP──> redis     │
//! └──────────────┘      └──────────────────────────────┘
//! ```
//!
//! [`ShardedBitSet`]: crate::bitset::ShardedBitSet

pub mod error;
pub mod expiry;
pub mod memory;
pub mod pipeline;
pub mod resp;

use std::future::Future;

pub use error::{StoreError, StoreResult};
pub use expiry::{start_expiry_sweeper, ExpiryConfig, ExpirySweeper};
pub use memory::{MemoryStore, StoreStats};
pub use pipeline::{Command, Pipeline};
pub use resp::{RespStore, RespStoreConfig};

/// Maximum number of bits one Redis string can address (512 MB).
pub const REDIS_MAX_BITS: u64 = 8 * 512 * 1024 * 1024;

/// The capabilities a sharded bitset needs from its key-value store.
///
/// Implementations must be safe to share between tasks; a single store is
/// typically used by many bitsets at once.
pub trait BitStore: Send + Sync {
    /// Maximum number of bits addressable under a single key.
    fn max_bits(&self) -> u64;

    /// Reads one bit. Missing keys and offsets past the end of the stored
    /// string read as `false`.
    fn get_bit(&self, key: &str, offset: u64) -> impl Future<Output = StoreResult<bool>> + Send;

    /// Deletes every key in `keys` with one request and returns how many
    /// existed.
    fn delete(&self, keys: &[String]) -> impl Future<Output = StoreResult<u64>> + Send;

    /// Submits every queued command in one round trip.
    ///
    /// All commands are executed even if one of them fails; the integer
    /// replies are returned in queue order, or the first failure is returned
    /// as the error. An empty pipeline is a no-op.
    fn flush(&self, pipeline: Pipeline) -> impl Future<Output = StoreResult<Vec<i64>>> + Send;
}
