//! # shardbits - Sharded Bit Arrays on Key-Value Stores
//!
//! shardbits stores one large logical bit array across several keys of a
//! Redis-compatible key-value store. A Redis string addresses at most 2^32
//! bits, while a Bloom filter sized for billions of elements may need more;
//! [`ShardedBitSet`] splits the index space into fixed-width shards and hides
//! the split from its caller.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              shardbits                                  │
//! │                                                                         │
//! │  ┌──────────────────┐   offsets    ┌──────────────────────────────┐     │
//! │  │ Bloom filter     │─────────────>│ ShardedBitSet                │     │
//! │  │ (caller hashes)  │              │  resolve: prefix:n / local   │     │
//! │  └──────────────────┘              └──────────────┬───────────────┘     │
//! │                                                   │ Pipeline            │
//! │                                                   ▼                     │
//! │                                    ┌──────────────────────────────┐     │
//! │                                    │ BitStore (trait)             │     │
//! │                                    └──────┬────────────────┬──────┘     │
//! │                                           │                │            │
//! │                              ┌────────────▼───┐   ┌────────▼─────────┐  │
//! │                              │ MemoryStore    │   │ RespStore        │  │
//! │                              │ + ExpirySweeper│   │ (RESP over TCP)  │  │
//! │                              └────────────────┘   └──────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```
//! use shardbits::{MemoryStore, ShardedBitSet};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let store = Arc::new(MemoryStore::new());
//! let filter_bits = ShardedBitSet::new("signup-filter", 6_000_000_000, Arc::clone(&store));
//!
//! // Offsets on both sides of the 2^32 boundary land in different keys
//! filter_bits.set(&[42, 4_294_967_296]).await.unwrap();
//! assert!(filter_bits.test(&[42, 4_294_967_296]).await.unwrap());
//! assert!(!filter_bits.test(&[43]).await.unwrap());
//!
//! // Time-bounded filter: every shard goes away together
//! filter_bits.expire(Duration::from_secs(3600)).await.unwrap();
//! assert_eq!(filter_bits.delete().await.unwrap(), 2);
//! # });
//! ```
//!
//! ## Module Overview
//!
//! - [`bitset`]: shard resolution and the set/test/expire/delete batches
//! - [`store`]: the [`BitStore`] contract, pipelines, and the two stores
//! - [`protocol`]: RESP encoding and reply parsing for [`RespStore`]
//!
//! ## Guarantees
//!
//! Each operation is one sequential batch. `set` and `expire` cost one round
//! trip, `delete` one request, `test` one round trip per offset until the first
//! unset bit. There is no atomicity across offsets: a concurrent `test` may see
//! part of a `set`. Store errors are returned unchanged and nothing is rolled
//! back.

pub mod bitset;
pub mod protocol;
pub mod store;

// Re-export commonly used types for convenience
pub use bitset::{ShardLocation, ShardedBitSet};
pub use protocol::{ParseError, RespValue};
pub use store::{
    start_expiry_sweeper, BitStore, Command, ExpiryConfig, ExpirySweeper, MemoryStore, Pipeline,
    RespStore, RespStoreConfig, StoreError, StoreResult, StoreStats, REDIS_MAX_BITS,
};

/// Version of shardbits
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
