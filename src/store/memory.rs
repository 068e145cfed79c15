//! In-Memory Bit Store
//!
//! [`MemoryStore`] keeps bit-strings in process memory with the same
//! semantics a Redis-compatible server gives `SETBIT`/`GETBIT`/`PEXPIRE`/`DEL`:
//!
//! - strings grow on demand, zero padded, bit 0 is the most significant bit
//!   of byte 0
//! - reading a missing key, or past the end of a string, yields 0
//! - offsets at or beyond `max_bits` are rejected
//! - keys may carry a TTL; expired keys are invisible and cleaned lazily on
//!   access or in bulk by [`MemoryStore::cleanup_expired`]
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       MemoryStore                           │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Seg 0   │ │ Seg 1   │ │ Seg 2   │ │ Seg N   │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ RwLock  │           │
//! │  │ HashMap │ │ HashMap │ │ HashMap │ │ HashMap │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Keys are spread over segments by hash, so tasks touching different keys
//! rarely contend on the same lock.

use crate::store::{BitStore, Command, Pipeline, StoreError, StoreResult, REDIS_MAX_BITS};
use bytes::BytesMut;
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use tracing::{trace, warn};

/// Number of lock segments.
const NUM_SEGMENTS: usize = 64;

/// A stored bit-string with optional expiry time.
#[derive(Debug, Clone)]
struct Entry {
    bits: BytesMut,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new() -> Self {
        Self {
            bits: BytesMut::new(),
            expires_at: None,
        }
    }

    #[inline]
    fn is_expired(&self) -> bool {
        self.expires_at
            .map(|exp| Instant::now() >= exp)
            .unwrap_or(false)
    }

    #[inline]
    fn bit(&self, offset: u64) -> bool {
        let (byte, mask) = locate(offset);
        self.bits.get(byte).map(|b| b & mask != 0).unwrap_or(false)
    }

    /// Writes one bit and returns its previous value.
    fn set_bit(&mut self, offset: u64, value: bool) -> bool {
        let (byte, mask) = locate(offset);
        if byte >= self.bits.len() {
            self.bits.resize(byte + 1, 0);
        }
        let previous = self.bits[byte] & mask != 0;
        if value {
            self.bits[byte] |= mask;
        } else {
            self.bits[byte] &= !mask;
        }
        previous
    }
}

/// Byte index and bit mask for a bit offset (MSB first).
#[inline]
fn locate(offset: u64) -> (usize, u8) {
    ((offset >> 3) as usize, 0x80u8 >> (offset & 7))
}

/// Operation counters, see [`MemoryStore::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub keys: u64,
    pub get_bit_ops: u64,
    pub set_bit_ops: u64,
    pub expire_ops: u64,
    pub del_ops: u64,
    pub flushes: u64,
    pub expired: u64,
}

/// An in-process [`BitStore`].
///
/// # Example
///
/// ```
/// use shardbits::store::MemoryStore;
///
/// let store = MemoryStore::with_max_bits(64);
/// assert_eq!(store.setbit("bits", 9, true).unwrap(), false);
/// assert!(store.getbit("bits", 9).unwrap());
/// assert!(!store.getbit("bits", 10).unwrap());
/// assert_eq!(store.strlen("bits"), 2);
/// assert!(store.getbit("bits", 64).is_err());
/// ```
pub struct MemoryStore {
    segments: Vec<RwLock<HashMap<String, Entry>>>,
    max_bits: u64,

    key_count: AtomicU64,
    get_bit_count: AtomicU64,
    set_bit_count: AtomicU64,
    expire_count: AtomicU64,
    del_count: AtomicU64,
    flush_count: AtomicU64,
    expired_count: AtomicU64,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("segments", &self.segments.len())
            .field("max_bits", &self.max_bits)
            .field("key_count", &self.key_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates a store with the Redis per-key limit of [`REDIS_MAX_BITS`].
    pub fn new() -> Self {
        Self::with_max_bits(REDIS_MAX_BITS)
    }

    /// Creates a store whose keys hold at most `max_bits` bits.
    ///
    /// # Panics
    ///
    /// Panics if `max_bits` is zero.
    pub fn with_max_bits(max_bits: u64) -> Self {
        assert!(max_bits > 0, "max_bits must be positive");

        Self {
            segments: (0..NUM_SEGMENTS)
                .map(|_| RwLock::new(HashMap::new()))
                .collect(),
            max_bits,
            key_count: AtomicU64::new(0),
            get_bit_count: AtomicU64::new(0),
            set_bit_count: AtomicU64::new(0),
            expire_count: AtomicU64::new(0),
            del_count: AtomicU64::new(0),
            flush_count: AtomicU64::new(0),
            expired_count: AtomicU64::new(0),
        }
    }

    #[inline]
    fn segment(&self, key: &str) -> &RwLock<HashMap<String, Entry>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.segments[(hasher.finish() as usize) % NUM_SEGMENTS]
    }

    // A panic while holding a segment lock cannot leave a map half-updated,
    // so poisoned locks are recovered rather than propagated.
    #[inline]
    fn read(
        lock: &RwLock<HashMap<String, Entry>>,
    ) -> RwLockReadGuard<'_, HashMap<String, Entry>> {
        lock.read().unwrap_or_else(|e| e.into_inner())
    }

    #[inline]
    fn write(
        lock: &RwLock<HashMap<String, Entry>>,
    ) -> RwLockWriteGuard<'_, HashMap<String, Entry>> {
        lock.write().unwrap_or_else(|e| e.into_inner())
    }

    fn check_offset(&self, offset: u64) -> StoreResult<()> {
        if offset >= self.max_bits {
            return Err(StoreError::OffsetOutOfRange {
                offset,
                max: self.max_bits,
            });
        }
        Ok(())
    }

    /// Removes `key` if it has expired. Must be called with the write lock.
    fn evict_if_expired(&self, data: &mut HashMap<String, Entry>, key: &str) {
        if data.get(key).map(Entry::is_expired).unwrap_or(false) {
            data.remove(key);
            self.key_count.fetch_sub(1, Ordering::Relaxed);
            self.expired_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// `GETBIT key offset`
    pub fn getbit(&self, key: &str, offset: u64) -> StoreResult<bool> {
        self.get_bit_count.fetch_add(1, Ordering::Relaxed);
        self.check_offset(offset)?;

        let segment = self.segment(key);
        {
            let data = Self::read(segment);
            match data.get(key) {
                Some(entry) if !entry.is_expired() => return Ok(entry.bit(offset)),
                Some(_) => {}
                None => return Ok(false),
            }
        }

        // Expired: reclaim it while we are here
        let mut data = Self::write(segment);
        self.evict_if_expired(&mut data, key);
        Ok(data.get(key).map(|e| e.bit(offset)).unwrap_or(false))
    }

    /// `SETBIT key offset value`. Returns the bit's previous value.
    pub fn setbit(&self, key: &str, offset: u64, value: bool) -> StoreResult<bool> {
        self.set_bit_count.fetch_add(1, Ordering::Relaxed);
        self.check_offset(offset)?;

        let mut data = Self::write(self.segment(key));
        self.evict_if_expired(&mut data, key);

        let entry = data.entry(key.to_string()).or_insert_with(|| {
            self.key_count.fetch_add(1, Ordering::Relaxed);
            Entry::new()
        });
        Ok(entry.set_bit(offset, value))
    }

    /// `PEXPIRE key ms`. Returns `false` if the key does not exist.
    ///
    /// A TTL too large to represent as a deadline is rejected the way Redis
    /// rejects it, and the key is left untouched.
    pub fn pexpire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        self.expire_count.fetch_add(1, Ordering::Relaxed);

        let deadline = Instant::now().checked_add(ttl).ok_or_else(|| {
            StoreError::Server("ERR invalid expire time in 'pexpire' command".to_string())
        })?;

        let mut data = Self::write(self.segment(key));
        self.evict_if_expired(&mut data, key);

        match data.get_mut(key) {
            Some(entry) => {
                entry.expires_at = Some(deadline);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// `DEL key [key ...]`. Returns the number of keys removed.
    pub fn del(&self, keys: &[String]) -> u64 {
        self.del_count.fetch_add(1, Ordering::Relaxed);

        let mut deleted = 0;
        for key in keys {
            let mut data = Self::write(self.segment(key));
            if let Some(entry) = data.remove(key.as_str()) {
                self.key_count.fetch_sub(1, Ordering::Relaxed);
                if entry.is_expired() {
                    self.expired_count.fetch_add(1, Ordering::Relaxed);
                } else {
                    deleted += 1;
                }
            }
        }
        deleted
    }

    /// Runs a single pipelined command and returns its integer reply.
    pub fn execute(&self, command: &Command) -> StoreResult<i64> {
        match command {
            Command::SetBit { key, offset, value } => {
                self.setbit(key, *offset, *value).map(i64::from)
            }
            Command::Expire { key, ttl } => self.pexpire(key, *ttl).map(i64::from),
        }
    }

    /// Checks if a key exists (and is not expired).
    pub fn exists(&self, key: &str) -> bool {
        Self::read(self.segment(key))
            .get(key)
            .map(|e| !e.is_expired())
            .unwrap_or(false)
    }

    /// Length in bytes of the bit-string stored at `key`, 0 if absent.
    pub fn strlen(&self, key: &str) -> usize {
        Self::read(self.segment(key))
            .get(key)
            .filter(|e| !e.is_expired())
            .map(|e| e.bits.len())
            .unwrap_or(0)
    }

    /// Remaining TTL in milliseconds.
    ///
    /// - `Some(ms)` if the key exists and has an expiry
    /// - `Some(-1)` if the key exists but has no expiry
    /// - `None` if the key doesn't exist
    pub fn pttl(&self, key: &str) -> Option<i64> {
        let data = Self::read(self.segment(key));
        let entry = data.get(key).filter(|e| !e.is_expired())?;
        Some(
            entry
                .expires_at
                .map(|exp| {
                    let left = exp.saturating_duration_since(Instant::now()).as_millis();
                    i64::try_from(left).unwrap_or(i64::MAX)
                })
                .unwrap_or(-1),
        )
    }

    /// All live keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .segments
            .iter()
            .flat_map(|segment| {
                Self::read(segment)
                    .iter()
                    .filter(|(_, entry)| !entry.is_expired())
                    .map(|(key, _)| key.clone())
                    .collect::<Vec<_>>()
            })
            .collect();
        keys.sort();
        keys
    }

    /// Removes every key.
    pub fn clear(&self) {
        for segment in &self.segments {
            Self::write(segment).clear();
        }
        self.key_count.store(0, Ordering::Relaxed);
    }

    /// Approximate number of keys, including expired keys not yet reclaimed.
    pub fn len(&self) -> u64 {
        self.key_count.load(Ordering::Relaxed)
    }

    /// Returns true if the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns operation counters.
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            keys: self.key_count.load(Ordering::Relaxed),
            get_bit_ops: self.get_bit_count.load(Ordering::Relaxed),
            set_bit_ops: self.set_bit_count.load(Ordering::Relaxed),
            expire_ops: self.expire_count.load(Ordering::Relaxed),
            del_ops: self.del_count.load(Ordering::Relaxed),
            flushes: self.flush_count.load(Ordering::Relaxed),
            expired: self.expired_count.load(Ordering::Relaxed),
        }
    }

    /// Removes expired keys from all segments and returns how many were
    /// removed. Called by the background [`ExpirySweeper`](crate::store::ExpirySweeper).
    pub fn cleanup_expired(&self) -> u64 {
        let mut cleaned = 0u64;

        for segment in &self.segments {
            let mut data = Self::write(segment);
            let before = data.len();
            data.retain(|_, entry| !entry.is_expired());
            cleaned += (before - data.len()) as u64;
        }

        if cleaned > 0 {
            self.key_count.fetch_sub(cleaned, Ordering::Relaxed);
            self.expired_count.fetch_add(cleaned, Ordering::Relaxed);
        }

        cleaned
    }
}

impl BitStore for MemoryStore {
    fn max_bits(&self) -> u64 {
        self.max_bits
    }

    async fn get_bit(&self, key: &str, offset: u64) -> StoreResult<bool> {
        self.getbit(key, offset)
    }

    async fn delete(&self, keys: &[String]) -> StoreResult<u64> {
        Ok(self.del(keys))
    }

    async fn flush(&self, pipeline: Pipeline) -> StoreResult<Vec<i64>> {
        if pipeline.is_empty() {
            return Ok(Vec::new());
        }
        self.flush_count.fetch_add(1, Ordering::Relaxed);
        trace!(commands = pipeline.len(), "flushing pipeline");

        let mut replies = Vec::with_capacity(pipeline.len());
        let mut first_error = None;
        for command in pipeline.commands() {
            match self.execute(command) {
                Ok(reply) => replies.push(reply),
                Err(e) => {
                    warn!(key = command.key(), error = %e, "pipelined command failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(replies),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setbit_and_getbit() {
        let store = MemoryStore::new();

        assert!(!store.setbit("k", 7, true).unwrap());
        assert!(store.getbit("k", 7).unwrap());
        assert!(!store.getbit("k", 6).unwrap());

        // Previous value is returned
        assert!(store.setbit("k", 7, false).unwrap());
        assert!(!store.getbit("k", 7).unwrap());
    }

    #[test]
    fn test_bit_order_is_msb_first() {
        let store = MemoryStore::new();
        store.setbit("k", 0, true).unwrap();
        store.setbit("k", 9, true).unwrap();

        let data = MemoryStore::read(store.segment("k"));
        assert_eq!(&data["k"].bits[..], &[0b1000_0000, 0b0100_0000]);
    }

    #[test]
    fn test_getbit_missing_and_past_end() {
        let store = MemoryStore::new();
        assert!(!store.getbit("missing", 100).unwrap());

        store.setbit("k", 0, true).unwrap();
        assert_eq!(store.strlen("k"), 1);
        assert!(!store.getbit("k", 1_000).unwrap());
    }

    #[test]
    fn test_offset_limit() {
        let store = MemoryStore::with_max_bits(8);

        assert!(store.setbit("k", 7, true).is_ok());
        assert!(matches!(
            store.setbit("k", 8, true),
            Err(StoreError::OffsetOutOfRange { offset: 8, max: 8 })
        ));
        assert!(matches!(
            store.getbit("k", 8),
            Err(StoreError::OffsetOutOfRange { .. })
        ));
        // A failed write must not create the key
        assert!(!store.exists("other"));
        assert!(store.setbit("other", 99, true).is_err());
        assert!(!store.exists("other"));
    }

    #[test]
    #[should_panic(expected = "max_bits must be positive")]
    fn test_zero_width_rejected() {
        MemoryStore::with_max_bits(0);
    }

    #[test]
    fn test_pexpire_and_lazy_expiry() {
        let store = MemoryStore::new();

        assert!(!store.pexpire("missing", Duration::from_secs(1)).unwrap());

        store.setbit("k", 3, true).unwrap();
        assert_eq!(store.pttl("k"), Some(-1));
        assert!(store.pexpire("k", Duration::from_millis(50)).unwrap());
        let ttl = store.pttl("k").unwrap();
        assert!(ttl > 0 && ttl <= 50);

        std::thread::sleep(Duration::from_millis(100));

        assert!(!store.exists("k"));
        assert!(!store.getbit("k", 3).unwrap());
        assert_eq!(store.pttl("k"), None);
        assert_eq!(store.len(), 0);
        assert_eq!(store.stats().expired, 1);
    }

    #[test]
    fn test_pexpire_overflow_is_rejected() {
        let store = MemoryStore::new();
        store.setbit("k", 0, true).unwrap();

        let err = store.pexpire("k", Duration::MAX).unwrap_err();
        assert!(matches!(err, StoreError::Server(ref msg) if msg.contains("invalid expire time")));
        assert_eq!(store.pttl("k"), Some(-1));
        assert!(store.getbit("k", 0).unwrap());

        let mut pipe = Pipeline::new();
        pipe.expire("k", Duration::from_secs(u64::MAX));
        assert!(store.execute(&pipe.commands()[0]).is_err());

        // Large but representable deadlines still apply and report a finite TTL
        assert!(store.pexpire("k", Duration::from_secs(100 * 365 * 24 * 3600)).unwrap());
        assert!(store.pttl("k").unwrap() > 0);
    }

    #[test]
    fn test_setbit_on_expired_key_starts_fresh() {
        let store = MemoryStore::new();
        store.setbit("k", 1, true).unwrap();
        store.pexpire("k", Duration::from_millis(10)).unwrap();

        std::thread::sleep(Duration::from_millis(30));

        assert!(!store.setbit("k", 5, true).unwrap());
        assert!(!store.getbit("k", 1).unwrap());
        assert_eq!(store.pttl("k"), Some(-1));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_del_counts_existing_keys() {
        let store = MemoryStore::new();
        store.setbit("a", 0, true).unwrap();
        store.setbit("b", 0, true).unwrap();

        let keys = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        assert_eq!(store.del(&keys), 2);
        assert!(store.is_empty());
        assert_eq!(store.del(&keys), 0);
    }

    #[test]
    fn test_keys_sorted_and_live_only() {
        let store = MemoryStore::new();
        store.setbit("bf:1", 0, true).unwrap();
        store.setbit("bf:0", 0, true).unwrap();
        store.setbit("gone", 0, true).unwrap();
        store.pexpire("gone", Duration::from_millis(1)).unwrap();

        std::thread::sleep(Duration::from_millis(10));

        assert_eq!(store.keys(), vec!["bf:0".to_string(), "bf:1".to_string()]);
    }

    #[test]
    fn test_cleanup_expired() {
        let store = MemoryStore::new();
        for i in 0..3 {
            store.setbit(&format!("short{}", i), 0, true).unwrap();
            store.pexpire(&format!("short{}", i), Duration::from_millis(10)).unwrap();
        }
        store.setbit("long", 0, true).unwrap();

        std::thread::sleep(Duration::from_millis(30));

        assert_eq!(store.cleanup_expired(), 3);
        assert_eq!(store.len(), 1);
        assert!(store.exists("long"));
    }

    #[test]
    fn test_clear() {
        let store = MemoryStore::new();
        store.setbit("a", 0, true).unwrap();
        store.clear();
        assert!(store.is_empty());
        assert!(!store.exists("a"));
    }

    #[tokio::test]
    async fn test_flush_runs_every_command() {
        let store = MemoryStore::with_max_bits(16);

        let mut pipe = Pipeline::new();
        pipe.set_bit("k", 1, true)
            .set_bit("k", 99, true)
            .set_bit("k", 2, true)
            .expire("k", Duration::from_secs(60));

        let err = store.flush(pipe).await.unwrap_err();
        assert!(matches!(err, StoreError::OffsetOutOfRange { offset: 99, .. }));

        // Commands around the failing one still ran
        assert!(store.getbit("k", 1).unwrap());
        assert!(store.getbit("k", 2).unwrap());
        assert!(store.pttl("k").unwrap() > 0);
    }

    #[tokio::test]
    async fn test_flush_replies_in_order() {
        let store = MemoryStore::new();

        let mut pipe = Pipeline::new();
        pipe.set_bit("k", 4, true)
            .set_bit("k", 4, true)
            .expire("k", Duration::from_secs(1))
            .expire("nope", Duration::from_secs(1));

        assert_eq!(store.flush(pipe).await.unwrap(), vec![0, 1, 1, 0]);
        assert_eq!(store.stats().flushes, 1);

        // Empty pipelines are not counted
        assert!(store.flush(Pipeline::new()).await.unwrap().is_empty());
        assert_eq!(store.stats().flushes, 1);
    }

    #[test]
    fn test_concurrent_access() {
        use std::sync::Arc;
        use std::thread;

        let store = Arc::new(MemoryStore::new());
        let mut handles = vec![];

        for i in 0..8 {
            let store = Arc::clone(&store);
            handles.push(thread::spawn(move || {
                for j in 0..64 {
                    store.setbit("shared", i * 64 + j, true).unwrap();
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.len(), 1);
        assert_eq!(store.strlen("shared"), 64);
        assert!((0..512).all(|bit| store.getbit("shared", bit).unwrap()));
    }
}
