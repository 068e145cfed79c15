//! Sharded Bitset
//!
//! A logical bit array of `m` bits, split across consecutive store keys that
//! each hold at most `shard_width` bits (the store's per-key limit):
//!
//! ```text
//!  logical offset:  0 ........ w-1 | w ....... 2w-1 | 2w ... m-1
//!                  └─────────────┘ └──────────────┘ └──────────┘
//!  store key:        prefix:0         prefix:1        prefix:2
//!  local offset:     0 ... w-1        0 ... w-1       0 ...
//! ```
//!
//! The key for shard `n` is always `"{prefix}:{n}"`, so every client that
//! agrees on `(prefix, m)` and the store's width addresses the same keys.
//! Nothing but these parameters is kept locally; all bits live in the store.

use crate::store::{BitStore, Pipeline, StoreResult};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Where one logical offset lives in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShardLocation {
    /// Shard number, `offset / shard_width`
    pub index: u64,
    /// Store key of the shard, `"{prefix}:{index}"`
    pub key: String,
    /// Bit position inside the shard, `offset % shard_width`
    pub offset: u64,
}

/// A bit array of `m` bits spread over as many store keys as needed.
///
/// Offsets passed to [`set`](Self::set) and [`test`](Self::test) must be
/// below `m`. This is not checked: an offset past `m` can land on a shard
/// outside the range that [`expire`](Self::expire) and
/// [`delete`](Self::delete) manage.
///
/// # Example
///
/// ```
/// use shardbits::{MemoryStore, ShardedBitSet};
/// use std::sync::Arc;
///
/// # tokio_test::block_on(async {
/// let store = Arc::new(MemoryStore::with_max_bits(8));
/// let bits = ShardedBitSet::new("bf", 20, Arc::clone(&store));
///
/// bits.set(&[0, 7, 8, 19]).await.unwrap();
/// assert!(bits.test(&[0, 7, 8, 19]).await.unwrap());
/// assert!(!bits.test(&[1, 7, 8, 19]).await.unwrap());
/// assert_eq!(store.keys(), vec!["bf:0", "bf:1", "bf:2"]);
/// # });
/// ```
pub struct ShardedBitSet<S> {
    key_prefix: String,
    m: u64,
    shard_width: u64,
    store: Arc<S>,
}

impl<S> std::fmt::Debug for ShardedBitSet<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardedBitSet")
            .field("key_prefix", &self.key_prefix)
            .field("m", &self.m)
            .field("shard_width", &self.shard_width)
            .finish()
    }
}

impl<S> Clone for ShardedBitSet<S> {
    fn clone(&self) -> Self {
        Self {
            key_prefix: self.key_prefix.clone(),
            m: self.m,
            shard_width: self.shard_width,
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: BitStore> ShardedBitSet<S> {
    /// Creates a bitset of `m` bits under `key_prefix`.
    ///
    /// The shard width is the store's [`max_bits`](BitStore::max_bits).
    ///
    /// # Panics
    ///
    /// Panics if the store reports a width of zero.
    pub fn new(key_prefix: impl Into<String>, m: u64, store: Arc<S>) -> Self {
        let shard_width = store.max_bits();
        assert!(shard_width > 0, "store must address at least one bit per key");

        Self {
            key_prefix: key_prefix.into(),
            m,
            shard_width,
            store,
        }
    }

    /// Maps a logical offset to its shard key and local bit position.
    pub fn resolve(&self, offset: u64) -> ShardLocation {
        let index = offset / self.shard_width;
        ShardLocation {
            key: self.shard_key(index),
            index,
            offset: offset % self.shard_width,
        }
    }

    /// Store key for shard `index`.
    pub fn shard_key(&self, index: u64) -> String {
        format!("{}:{}", self.key_prefix, index)
    }

    /// Number of shard keys managed by [`expire`](Self::expire) and
    /// [`delete`](Self::delete): `m / shard_width + 1`.
    ///
    /// When `m` is an exact multiple of the width this includes one key that
    /// no valid offset maps to; expiring or deleting it is harmless.
    pub fn shard_count(&self) -> u64 {
        self.m / self.shard_width + 1
    }

    /// Every shard key of this bitset, in shard order.
    pub fn shard_keys(&self) -> Vec<String> {
        (0..self.shard_count()).map(|n| self.shard_key(n)).collect()
    }

    /// Sets the bit at every offset to 1 with a single flush.
    ///
    /// Every queued `SETBIT` is submitted even if one of them fails; the first
    /// failure is returned and bits already written stay written.
    pub async fn set(&self, offsets: &[u64]) -> StoreResult<()> {
        let mut pipeline = Pipeline::with_capacity(offsets.len());
        for &offset in offsets {
            let location = self.resolve(offset);
            trace!(offset, key = %location.key, local = location.offset, "queue SETBIT");
            pipeline.set_bit(location.key, location.offset, true);
        }

        debug!(prefix = %self.key_prefix, offsets = offsets.len(), "setting bits");
        self.store.flush(pipeline).await?;
        Ok(())
    }

    /// Returns `true` if the bit at every offset is 1.
    ///
    /// Offsets are read one at a time in the given order and the first 0 bit
    /// ends the check; later offsets are never read. An empty slice is
    /// trivially `true`.
    pub async fn test(&self, offsets: &[u64]) -> StoreResult<bool> {
        for (checked, &offset) in offsets.iter().enumerate() {
            let location = self.resolve(offset);
            if !self.store.get_bit(&location.key, location.offset).await? {
                debug!(
                    prefix = %self.key_prefix,
                    offset,
                    checked = checked + 1,
                    "bit not set"
                );
                return Ok(false);
            }
        }

        trace!(prefix = %self.key_prefix, offsets = offsets.len(), "all bits set");
        Ok(true)
    }

    /// Puts a time-to-live on every shard key with a single flush.
    ///
    /// Shards that were never written do not exist in the store and are left
    /// alone by it.
    pub async fn expire(&self, ttl: Duration) -> StoreResult<()> {
        let mut pipeline = Pipeline::with_capacity(self.shard_count() as usize);
        for key in self.shard_keys() {
            pipeline.expire(key, ttl);
        }

        debug!(
            prefix = %self.key_prefix,
            shards = pipeline.len(),
            ttl = ?ttl,
            "expiring bitset"
        );
        self.store.flush(pipeline).await?;
        Ok(())
    }

    /// Deletes every shard key with one request and returns how many existed.
    pub async fn delete(&self) -> StoreResult<u64> {
        let keys = self.shard_keys();
        debug!(prefix = %self.key_prefix, shards = keys.len(), "deleting bitset");
        self.store.delete(&keys).await
    }
}

impl<S> ShardedBitSet<S> {
    /// The namespace prefix of the shard keys.
    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    /// Logical size in bits.
    pub fn len(&self) -> u64 {
        self.m
    }

    /// Returns true for a zero-sized bitset.
    pub fn is_empty(&self) -> bool {
        self.m == 0
    }

    /// Maximum bits per shard key.
    pub fn shard_width(&self) -> u64 {
        self.shard_width
    }

    /// The shared store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, REDIS_MAX_BITS};

    fn bitset(width: u64, m: u64) -> (Arc<MemoryStore>, ShardedBitSet<MemoryStore>) {
        let store = Arc::new(MemoryStore::with_max_bits(width));
        let bits = ShardedBitSet::new("bf", m, Arc::clone(&store));
        (store, bits)
    }

    #[test]
    fn test_resolve_is_deterministic() {
        let (_, bits) = bitset(REDIS_MAX_BITS, 10_000_000_000);
        let first = bits.resolve(6_000_000_123);
        assert_eq!(first, bits.resolve(6_000_000_123));
        assert_eq!(first.index, 1);
        assert_eq!(first.key, "bf:1");
        assert_eq!(first.offset, 6_000_000_123 - REDIS_MAX_BITS);
    }

    #[test]
    fn test_resolve_boundaries() {
        let (_, bits) = bitset(REDIS_MAX_BITS, 10_000_000_000);

        let last = bits.resolve(REDIS_MAX_BITS - 1);
        assert_eq!(last.index, 0);
        assert_eq!(last.offset, REDIS_MAX_BITS - 1);

        let next = bits.resolve(REDIS_MAX_BITS);
        assert_eq!(next.index, 1);
        assert_eq!(next.key, "bf:1");
        assert_eq!(next.offset, 0);
    }

    #[test]
    fn test_resolve_small_width() {
        let (_, bits) = bitset(8, 20);
        let located: Vec<(String, u64)> = [0, 7, 8, 19]
            .into_iter()
            .map(|o| {
                let l = bits.resolve(o);
                (l.key, l.offset)
            })
            .collect();
        assert_eq!(
            located,
            vec![
                ("bf:0".to_string(), 0),
                ("bf:0".to_string(), 7),
                ("bf:1".to_string(), 0),
                ("bf:2".to_string(), 3),
            ]
        );
    }

    #[test]
    fn test_shard_range_is_inclusive() {
        let (_, bits) = bitset(REDIS_MAX_BITS, 5_000_000_000);
        assert_eq!(bits.shard_keys(), vec!["bf:0", "bf:1"]);

        let (_, bits) = bitset(8, 20);
        assert_eq!(bits.shard_count(), 3);

        // Exact multiple still includes the trailing index
        let (_, bits) = bitset(8, 16);
        assert_eq!(bits.shard_keys(), vec!["bf:0", "bf:1", "bf:2"]);
    }

    #[test]
    fn test_accessors() {
        let (_, bits) = bitset(8, 20);
        assert_eq!(bits.key_prefix(), "bf");
        assert_eq!(bits.len(), 20);
        assert!(!bits.is_empty());
        assert_eq!(bits.shard_width(), 8);
        assert_eq!(
            format!("{:?}", bits),
            r#"ShardedBitSet { key_prefix: "bf", m: 20, shard_width: 8 }"#
        );
    }

    #[tokio::test]
    async fn test_set_then_test() {
        let (store, bits) = bitset(8, 20);

        bits.set(&[0, 7, 8, 19]).await.unwrap();
        assert!(bits.test(&[0, 7, 8, 19]).await.unwrap());
        assert!(!bits.test(&[1, 7, 8, 19]).await.unwrap());

        assert_eq!(store.keys(), vec!["bf:0", "bf:1", "bf:2"]);
        assert!(store.getbit("bf:2", 3).unwrap());
        assert_eq!(store.stats().flushes, 1);
    }

    #[tokio::test]
    async fn test_clean_store_reads_false() {
        let (_, bits) = bitset(8, 20);
        assert!(!bits.test(&[5]).await.unwrap());
        assert!(bits.test(&[]).await.unwrap());
    }

    #[tokio::test]
    async fn test_set_is_idempotent() {
        let (store, bits) = bitset(8, 20);

        bits.set(&[12]).await.unwrap();
        let after_once = store.keys();
        bits.set(&[12]).await.unwrap();

        assert_eq!(store.keys(), after_once);
        assert_eq!(store.strlen("bf:1"), 1);
        assert!(bits.test(&[12]).await.unwrap());
    }

    #[tokio::test]
    async fn test_short_circuits_on_first_zero() {
        let (store, bits) = bitset(8, 20);
        bits.set(&[9]).await.unwrap();

        let before = store.stats().get_bit_ops;
        assert!(!bits.test(&[3, 9]).await.unwrap());
        assert_eq!(store.stats().get_bit_ops - before, 1);
    }

    #[tokio::test]
    async fn test_expire_and_delete_cover_all_shards() {
        let (store, bits) = bitset(8, 20);
        bits.set(&[0, 19]).await.unwrap();
        store.setbit("other", 0, true).unwrap();

        bits.expire(Duration::from_secs(60)).await.unwrap();
        assert!(store.pttl("bf:0").unwrap() > 0);
        assert!(store.pttl("bf:2").unwrap() > 0);
        assert_eq!(store.pttl("other"), Some(-1));
        assert_eq!(store.stats().expire_ops, 3);

        assert_eq!(bits.delete().await.unwrap(), 2);
        assert_eq!(store.keys(), vec!["other"]);
        assert!(!bits.test(&[0]).await.unwrap());
    }
}
