//! Sharded concurrent store.
//!
//! Owns every live entry. Keys are distributed over a power-of-two number of
//! shards by the low bits of their hash; each shard is an `FxHashMap` behind
//! its own reader-writer lock, padded to a cache line so neighbouring shards
//! do not false-share. Every operation locks exactly one shard: there is no
//! global lock and no lock ordering to get wrong, because no operation holds
//! two shards at once (`clear` locks them one at a time).
//!
//! ## Architecture
//!
//! ```text
//!   key ── S::hash_one ──► h ── h & (N-1) ──► shard index
//!
//!   ┌──────────────┬──────────────┬──────────────┬──────────────┐
//!   │ shard 0      │ shard 1      │ ...          │ shard N-1    │
//!   │ RwLock<map>  │ RwLock<map>  │              │ RwLock<map>  │
//!   │ hits/misses  │ hits/misses  │              │ hits/misses  │
//!   └──────────────┴──────────────┴──────────────┴──────────────┘
//!           each padded to a 64-byte cache line
//! ```
//!
//! Reads take the read lock, clone the entry (cheap: the value is an `Arc`),
//! release, then check expiration against the cached clock; an expired entry
//! is a miss even while it still occupies the map. Writes take the write
//! lock; the live count is a separate atomic maintained on insert/remove so
//! `len()` never walks the shards.
//!
//! ## Scan cursor
//!
//! `scan` encodes its position as `(shard_index << 32) | item_index` and
//! walks shards in ascending order. The cursor is best-effort resumable:
//! concurrent mutation can duplicate or skip entries but never yields an
//! invalid read. A returned cursor of zero means the walk completed.

use std::hash::{BuildHasher, Hash};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::clock::CachedClock;
use crate::store::entry::Entry;

/// Default shard count.
pub const DEFAULT_SHARD_COUNT: usize = 1024;

/// One lock's worth of the key space, padded to a cache line.
#[repr(align(64))]
#[derive(Debug)]
struct Shard<K, V> {
    map: RwLock<FxHashMap<K, Entry<K, V>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<K, V> Default for Shard<K, V> {
    fn default() -> Self {
        Self {
            map: RwLock::new(FxHashMap::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }
}

/// Concurrent entry store with per-shard locking.
#[derive(Debug)]
pub struct ShardedStore<K, V, S> {
    shards: Box<[Shard<K, V>]>,
    shard_mask: u64,
    size: AtomicI64,
    hasher: S,
    clock: Arc<CachedClock>,
}

impl<K, V, S> ShardedStore<K, V, S>
where
    K: Eq + Hash + Clone,
    S: BuildHasher,
{
    /// Creates a store with `shard_count` shards (must be a power of two).
    pub fn new(shard_count: usize, hasher: S, clock: Arc<CachedClock>) -> Self {
        let shard_count = if shard_count == 0 {
            DEFAULT_SHARD_COUNT
        } else {
            shard_count
        };
        debug_assert!(shard_count.is_power_of_two());
        let shards: Box<[Shard<K, V>]> = (0..shard_count).map(|_| Shard::default()).collect();
        Self {
            shards,
            shard_mask: (shard_count - 1) as u64,
            size: AtomicI64::new(0),
            hasher,
            clock,
        }
    }

    /// Hash used for shard selection, the policy, and the radix tree.
    #[inline]
    pub fn key_hash(&self, key: &K) -> u64 {
        self.hasher.hash_one(key)
    }

    #[inline]
    fn shard(&self, hash: u64) -> &Shard<K, V> {
        &self.shards[(hash & self.shard_mask) as usize]
    }

    /// Number of shards.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Current time according to the store's clock.
    #[inline]
    pub fn now(&self) -> i64 {
        self.clock.now_nanos()
    }

    /// Looks up `key`, hashing it first.
    pub fn get(&self, key: &K) -> Option<Entry<K, V>> {
        let hash = self.key_hash(key);
        self.get_by_hash(key, hash)
    }

    /// Looks up `key` with a precomputed hash.
    ///
    /// An entry past its deadline is reported as a miss; removal is left to
    /// the expiration worker.
    pub fn get_by_hash(&self, key: &K, hash: u64) -> Option<Entry<K, V>> {
        let shard = self.shard(hash);
        let entry = shard.map.read().get(key).cloned();
        match entry {
            Some(entry) if !entry.is_expired_at(self.now()) => {
                shard.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry)
            }
            _ => {
                shard.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Lookup without touching hit/miss counters; used by scans.
    pub fn peek(&self, key: &K, hash: u64) -> Option<Entry<K, V>> {
        self.shard(hash).map.read().get(key).cloned()
    }

    /// Publishes `entry`, returning the displaced previous entry if any.
    ///
    /// The live count is unchanged on replacement and incremented on insert.
    pub fn set(&self, entry: Entry<K, V>) -> Option<Entry<K, V>> {
        let shard = self.shard(entry.key_hash);
        let previous = shard.map.write().insert(entry.key.clone(), entry);
        if previous.is_none() {
            self.size.fetch_add(1, Ordering::Relaxed);
        }
        previous
    }

    /// Removes `key`, hashing it first.
    pub fn delete(&self, key: &K) -> Option<Entry<K, V>> {
        let hash = self.key_hash(key);
        self.delete_by_hash(key, hash)
    }

    /// Removes `key` with a precomputed hash.
    pub fn delete_by_hash(&self, key: &K, hash: u64) -> Option<Entry<K, V>> {
        let removed = self.shard(hash).map.write().remove(key);
        if removed.is_some() {
            self.size.fetch_sub(1, Ordering::Relaxed);
        }
        removed
    }

    /// Removes whichever entry carries `hash`.
    ///
    /// Victim hashes arrive from the policy without keys. The entry, if it
    /// still exists, lives in the shard the hash selects, so only that
    /// shard's map is searched.
    pub fn take_by_hash(&self, hash: u64) -> Option<Entry<K, V>> {
        let mut map = self.shard(hash).map.write();
        let key = map
            .iter()
            .find(|(_, entry)| entry.key_hash == hash)
            .map(|(key, _)| key.clone())?;
        let removed = map.remove(&key);
        drop(map);
        if removed.is_some() {
            self.size.fetch_sub(1, Ordering::Relaxed);
        }
        removed
    }

    /// Removes `key` only if its deadline passed before `now`.
    ///
    /// This is the reconciliation point that makes the expiration worker
    /// order-insensitive: an entry re-set with a later deadline (or none) is
    /// preserved even though an old expiry record named its key.
    pub fn remove_if_expired(&self, key: &K, hash: u64, now: i64) -> Option<Entry<K, V>> {
        let mut map = self.shard(hash).map.write();
        let expired = map.get(key).is_some_and(|entry| entry.is_expired_at(now));
        if !expired {
            return None;
        }
        let removed = map.remove(key);
        drop(map);
        if removed.is_some() {
            self.size.fetch_sub(1, Ordering::Relaxed);
        }
        removed
    }

    /// Returns `true` if `key` is present and unexpired.
    pub fn has(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Live entry count.
    pub fn len(&self) -> usize {
        self.size.load(Ordering::Relaxed).max(0) as usize
    }

    /// Returns `true` when no entries are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every entry.
    pub fn clear(&self) {
        for shard in self.shards.iter() {
            let mut map = shard.map.write();
            let drained = map.len() as i64;
            map.clear();
            drop(map);
            self.size.fetch_sub(drained, Ordering::Relaxed);
        }
    }

    /// Visits entries until `f` returns `false`. May include expired entries.
    pub fn range<F>(&self, mut f: F)
    where
        F: FnMut(&Entry<K, V>) -> bool,
    {
        for shard in self.shards.iter() {
            let map = shard.map.read();
            for entry in map.values() {
                if !f(entry) {
                    return;
                }
            }
        }
    }

    /// Collects every non-expired entry. Used by the draining close.
    pub fn live_entries(&self) -> Vec<Entry<K, V>> {
        let now = self.now();
        let mut entries = Vec::with_capacity(self.len());
        self.range(|entry| {
            if !entry.is_expired_at(now) {
                entries.push(entry.clone());
            }
            true
        });
        entries
    }

    /// Fetches up to `count` entries starting at `cursor`.
    ///
    /// Returns the page and the cursor for the next call; zero means the
    /// walk is complete.
    pub fn scan(&self, cursor: u64, count: usize) -> (Vec<Entry<K, V>>, u64) {
        let count = if count == 0 { 10 } else { count };
        let mut entries = Vec::with_capacity(count);
        let mut shard_idx = (cursor >> 32) as usize;
        let mut item_idx = (cursor & 0xffff_ffff) as usize;

        while shard_idx < self.shards.len() {
            let map = self.shards[shard_idx].map.read();
            for (position, entry) in map.values().enumerate() {
                if position < item_idx {
                    continue;
                }
                entries.push(entry.clone());
                if entries.len() >= count {
                    let next = ((shard_idx as u64) << 32) | (position as u64 + 1);
                    return (entries, next);
                }
            }
            drop(map);
            shard_idx += 1;
            item_idx = 0;
        }

        (entries, 0)
    }

    /// Sweeps every shard, deleting entries already past their deadline.
    ///
    /// Returns the number removed. The expiration worker makes this mostly
    /// unnecessary; it exists for callers that disable the worker's heap by
    /// never setting TTLs and want an explicit cleanup.
    pub fn delete_expired(&self) -> usize {
        let now = self.now();
        let mut removed = 0usize;
        for shard in self.shards.iter() {
            let mut map = shard.map.write();
            let before = map.len();
            map.retain(|_, entry| !entry.is_expired_at(now));
            removed += before - map.len();
        }
        if removed > 0 {
            self.size.fetch_sub(removed as i64, Ordering::Relaxed);
        }
        removed
    }

    /// Hit/miss counters for one shard.
    pub fn shard_stats(&self, shard_idx: usize) -> (u64, u64) {
        match self.shards.get(shard_idx) {
            Some(shard) => (
                shard.hits.load(Ordering::Relaxed),
                shard.misses.load(Ordering::Relaxed),
            ),
            None => (0, 0),
        }
    }

    /// Aggregate hit/miss counters across shards.
    pub fn total_stats(&self) -> (u64, u64) {
        let mut hits = 0;
        let mut misses = 0;
        for shard in self.shards.iter() {
            hits += shard.hits.load(Ordering::Relaxed);
            misses += shard.misses.load(Ordering::Relaxed);
        }
        (hits, misses)
    }

    /// Zeroes every shard's hit/miss counters.
    pub fn reset_stats(&self) {
        for shard in self.shards.iter() {
            shard.hits.store(0, Ordering::Relaxed);
            shard.misses.store(0, Ordering::Relaxed);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::FnvBuildHasher;

    fn store() -> ShardedStore<String, u32, FnvBuildHasher> {
        ShardedStore::new(8, FnvBuildHasher, Arc::new(CachedClock::start()))
    }

    fn entry_for(store: &ShardedStore<String, u32, FnvBuildHasher>, key: &str, value: u32) -> Entry<String, u32> {
        let key = key.to_string();
        let key_hash = store.key_hash(&key);
        Entry {
            key,
            value: Arc::new(value),
            key_hash,
            expire_at: 0,
            cost: 1,
        }
    }

    #[test]
    fn set_get_delete_roundtrip() {
        let store = store();
        assert!(store.set(entry_for(&store, "a", 1)).is_none());
        assert_eq!(store.len(), 1);

        let got = store.get(&"a".to_string()).expect("hit");
        assert_eq!(*got.value, 1);

        let deleted = store.delete(&"a".to_string()).expect("was present");
        assert_eq!(*deleted.value, 1);
        assert_eq!(store.len(), 0);
        assert!(store.get(&"a".to_string()).is_none());
    }

    #[test]
    fn replacement_returns_previous_and_keeps_len() {
        let store = store();
        store.set(entry_for(&store, "k", 1));
        let prev = store.set(entry_for(&store, "k", 2)).expect("replaced");
        assert_eq!(*prev.value, 1);
        assert_eq!(store.len(), 1);
        assert_eq!(*store.get(&"k".to_string()).unwrap().value, 2);
    }

    #[test]
    fn expired_entry_reads_as_miss_but_occupies_map() {
        let store = store();
        let mut entry = entry_for(&store, "ttl", 9);
        entry.expire_at = store.now() - 1;
        store.set(entry);

        assert!(store.get(&"ttl".to_string()).is_none());
        assert!(!store.has(&"ttl".to_string()));
        // Still physically present until swept.
        assert_eq!(store.len(), 1);
        assert_eq!(store.delete_expired(), 1);
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn remove_if_expired_respects_later_deadlines() {
        let store = store();
        let key = "lazy".to_string();
        let hash = store.key_hash(&key);

        let mut entry = entry_for(&store, "lazy", 1);
        entry.expire_at = store.now() + 1_000_000_000;
        store.set(entry);

        // Old expiry record fires but the entry has a later deadline.
        assert!(store.remove_if_expired(&key, hash, store.now()).is_none());
        assert_eq!(store.len(), 1);

        let mut stale = entry_for(&store, "lazy", 2);
        stale.expire_at = store.now() - 1;
        store.set(stale);
        assert!(store.remove_if_expired(&key, hash, store.now()).is_some());
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn take_by_hash_finds_victim_in_its_shard() {
        let store = store();
        store.set(entry_for(&store, "victim", 7));
        let hash = store.key_hash(&"victim".to_string());

        let taken = store.take_by_hash(hash).expect("present");
        assert_eq!(taken.key, "victim");
        assert_eq!(store.len(), 0);
        assert!(store.take_by_hash(hash).is_none());
    }

    #[test]
    fn hit_miss_counters_accumulate_per_shard() {
        let store = store();
        store.set(entry_for(&store, "a", 1));
        store.get(&"a".to_string());
        store.get(&"a".to_string());
        store.get(&"missing".to_string());

        let (hits, misses) = store.total_stats();
        assert_eq!((hits, misses), (2, 1));
        store.reset_stats();
        assert_eq!(store.total_stats(), (0, 0));
    }

    #[test]
    fn peek_does_not_touch_counters() {
        let store = store();
        store.set(entry_for(&store, "a", 1));
        let key = "a".to_string();
        let hash = store.key_hash(&key);
        assert!(store.peek(&key, hash).is_some());
        assert_eq!(store.total_stats(), (0, 0));
    }

    #[test]
    fn clear_empties_every_shard() {
        let store = store();
        for i in 0..50 {
            store.set(entry_for(&store, &format!("k{i}"), i));
        }
        assert_eq!(store.len(), 50);
        store.clear();
        assert_eq!(store.len(), 0);
        assert!(store.get(&"k0".to_string()).is_none());
    }

    #[test]
    fn scan_visits_every_entry_exactly_once_when_quiescent() {
        let store = store();
        for i in 0..100 {
            store.set(entry_for(&store, &format!("key:{i}"), i));
        }

        let mut seen = std::collections::HashSet::new();
        let mut cursor = 0u64;
        loop {
            let (page, next) = store.scan(cursor, 7);
            for entry in page {
                assert!(seen.insert(entry.key.clone()), "duplicate {}", entry.key);
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }
        assert_eq!(seen.len(), 100);
    }

    #[test]
    fn scan_zero_count_defaults() {
        let store = store();
        for i in 0..20 {
            store.set(entry_for(&store, &format!("k{i}"), i));
        }
        let (page, _) = store.scan(0, 0);
        assert_eq!(page.len(), 10);
    }

    #[test]
    fn range_stops_when_visitor_returns_false() {
        let store = store();
        for i in 0..10 {
            store.set(entry_for(&store, &format!("k{i}"), i));
        }
        let mut visited = 0;
        store.range(|_| {
            visited += 1;
            visited < 3
        });
        assert_eq!(visited, 3);
    }

    #[test]
    fn live_entries_excludes_expired() {
        let store = store();
        store.set(entry_for(&store, "alive", 1));
        let mut dead = entry_for(&store, "dead", 2);
        dead.expire_at = store.now() - 1;
        store.set(dead);

        let live = store.live_entries();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].key, "alive");
    }

    #[test]
    fn concurrent_writers_converge_on_correct_len() {
        let store = Arc::new(ShardedStore::<u64, u64, FnvBuildHasher>::new(
            16,
            FnvBuildHasher,
            Arc::new(CachedClock::start()),
        ));
        let threads: Vec<_> = (0..4u64)
            .map(|t| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..500u64 {
                        let key = t * 1000 + i;
                        let key_hash = store.key_hash(&key);
                        store.set(Entry {
                            key,
                            value: Arc::new(key),
                            key_hash,
                            expire_at: 0,
                            cost: 1,
                        });
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(store.len(), 2000);
    }
}
