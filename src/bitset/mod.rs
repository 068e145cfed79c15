//! Bitset Module
//!
//! [`ShardedBitSet`] is the piece a Bloom filter talks to: it takes logical
//! bit offsets, works out which store key and bit each one lands on, and turns
//! a batch of offsets into store commands.
//!
//! ```text
//! filter (hash → offsets)
//!        │
//!        ▼
//! ┌─────────────────┐   resolve(offset) → (prefix:n, offset % width)
//! │  ShardedBitSet  │
//! │  set / test     │── Pipeline of SETBIT ──┐
//! │  expire / delete│── GETBIT, DEL ─────────┤
//! └─────────────────┘                        ▼
//!                                       BitStore
//! ```

pub mod sharded;

pub use sharded::{ShardLocation, ShardedBitSet};
