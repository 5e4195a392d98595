//! The unit of storage owned by the sharded store.

use std::sync::Arc;

/// A resident cache entry.
///
/// Entries are immutable once published: a re-set replaces the whole entry
/// rather than mutating in place, so readers holding a clone never observe a
/// torn update. The value is shared as `Arc<V>` because reads hand it out
/// while the store retains ownership.
#[derive(Debug)]
pub struct Entry<K, V> {
    /// The key, kept for callbacks and scans.
    pub key: K,
    /// The cached value.
    pub value: Arc<V>,
    /// Stable 64-bit key hash; also selects the shard.
    pub key_hash: u64,
    /// Absolute expiration in Unix nanoseconds; zero means never.
    pub expire_at: i64,
    /// Eviction weight.
    pub cost: i64,
}

impl<K, V> Entry<K, V> {
    /// Returns `true` if the entry's deadline has passed at `now`.
    #[inline]
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expire_at > 0 && now > self.expire_at
    }
}

impl<K: Clone, V> Clone for Entry<K, V> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            value: Arc::clone(&self.value),
            key_hash: self.key_hash,
            expire_at: self.expire_at,
            cost: self.cost,
        }
    }
}
