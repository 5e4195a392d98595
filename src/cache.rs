//! The cache facade.
//!
//! Wires the sharded store, the TinyLFU policy, the expiration scheduler,
//! the optional write coalescer, the radix tree (string keys only), and the
//! metrics block into one type.
//!
//! ## Data flow
//!
//! ```text
//!   get ──────────────────────────────► store ──► policy.access ──► metrics
//!
//!   set/delete ──┬── buffered ──► ring ──► consumer ──┐
//!                │                                    ▼
//!                └── synchronous ─────────► policy admit/evict
//!                                                     │
//!                                          store + radix + scheduler
//!                                                     │
//!                                               metrics + callbacks
//!
//!   expiry worker ──► store-side expiry check ──► metrics + on_expire
//! ```
//!
//! Background workers (clock ticker, expiry worker, coalescer consumer) hold
//! weak references to the internals, so dropping the cache tears everything
//! down: [`close`](Cache::close) is called from `Drop` if the caller never
//! does.
//!
//! ## Closed behaviour
//!
//! `close` is idempotent. Afterwards every operation is a no-op returning
//! miss/false; nothing panics. Writes still queued in the coalescer at close
//! are drained and applied before the consumer exits.

use std::any::Any;
use std::hash::{BuildHasher, Hash};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::clock::CachedClock;
use crate::coalesce::WriteCoalescer;
use crate::ds::RadixTree;
use crate::expiry::ExpirationScheduler;
use crate::hash::FnvBuildHasher;
use crate::metrics::{CacheMetrics, MetricsSnapshot};
use crate::policy::TinyLfuPolicy;
use crate::scan::Scanner;
use crate::store::{Entry, ShardedStore};

/// Eviction callback: `(key, value, cost)`.
pub type EvictHandler<K, V> = Box<dyn Fn(K, Arc<V>, i64) + Send + Sync>;
/// Expiration callback: `(key, value)`.
pub type ExpireHandler<K, V> = Box<dyn Fn(K, Arc<V>) + Send + Sync>;
/// Admission-rejection callback: `(key, value)`.
pub type RejectHandler<K, V> = Box<dyn Fn(K, Arc<V>) + Send + Sync>;
/// Value cost estimator.
pub type CostFn<V> = Box<dyn Fn(&V) -> i64 + Send + Sync>;

/// One record for [`Cache::set_many`].
#[derive(Debug, Clone)]
pub struct Item<K, V> {
    pub key: K,
    pub value: V,
    /// Zero means "ask the cost function" (or 1 without one).
    pub cost: i64,
    /// Zero means no expiration (unless a default TTL is configured).
    pub ttl: Duration,
}

/// Callbacks and the cost estimator, as configured on the builder.
pub(crate) struct Hooks<K, V> {
    pub on_evict: Option<EvictHandler<K, V>>,
    pub on_expire: Option<ExpireHandler<K, V>>,
    pub on_reject: Option<RejectHandler<K, V>>,
    pub cost_fn: Option<CostFn<V>>,
}

impl<K, V> Default for Hooks<K, V> {
    fn default() -> Self {
        Self {
            on_evict: None,
            on_expire: None,
            on_reject: None,
            cost_fn: None,
        }
    }
}

/// A pending buffered write.
pub(crate) enum WriteOp<K, V> {
    Set { entry: Entry<K, V>, ttl: Duration },
    Delete { key: K, hash: u64 },
}

/// Shared internals behind the facade.
///
/// Owned by the facade via `Arc`; the expiry worker and coalescer consumer
/// observe it through `Weak` so ownership stays a tree rooted at [`Cache`].
pub(crate) struct CacheCore<K, V, S> {
    pub(crate) store: ShardedStore<K, V, S>,
    pub(crate) policy: TinyLfuPolicy,
    pub(crate) radix: Option<RwLock<RadixTree>>,
    pub(crate) metrics: CacheMetrics,
    pub(crate) hooks: Hooks<K, V>,
    pub(crate) clock: Arc<CachedClock>,
    pub(crate) default_ttl: Duration,
    pub(crate) scheduler: OnceLock<ExpirationScheduler<K>>,
    pub(crate) coalescer: OnceLock<WriteCoalescer<WriteOp<K, V>>>,
    /// Serializes the internal mutation paths. Admission and store publish
    /// must be atomic relative to other writers: otherwise a concurrent
    /// setter can sample and evict a victim whose entry has not landed in
    /// the store yet, leaving it resident but untracked. The coalescer's
    /// single consumer provides this ordering for buffered caches; this lock
    /// provides it for synchronous ones. Reads never touch it.
    pub(crate) write_serial: Mutex<()>,
    pub(crate) closed: AtomicBool,
}

impl<K, V, S> CacheCore<K, V, S>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
    S: BuildHasher + Send + Sync + 'static,
{
    #[inline]
    fn key_as_str(key: &K) -> Option<&str> {
        (key as &dyn Any)
            .downcast_ref::<String>()
            .map(String::as_str)
    }

    fn radix_insert(&self, key: &K, hash: u64) {
        if let (Some(tree), Some(text)) = (&self.radix, Self::key_as_str(key)) {
            tree.write().insert(text, hash);
        }
    }

    fn radix_remove(&self, key: &K) {
        if let (Some(tree), Some(text)) = (&self.radix, Self::key_as_str(key)) {
            tree.write().delete(text);
        }
    }

    fn scheduler(&self) -> &ExpirationScheduler<K> {
        self.scheduler.get().expect("scheduler set at construction")
    }

    /// Applies a set: admission, eviction, store publish, bookkeeping.
    ///
    /// Deliberately ignores the closed flag so writes drained during close
    /// still land.
    pub(crate) fn apply_set(&self, entry: Entry<K, V>, ttl: Duration) -> bool {
        let _serial = self.write_serial.lock();
        let admission = self.policy.add(entry.key_hash, entry.cost);

        // Victims displaced during the admission rounds are already gone
        // from the evictor; mirror that in the store even when the incoming
        // key itself ends up rejected.
        for victim in admission.victims {
            self.evict_by_hash(victim);
        }

        if !admission.admitted {
            self.metrics.inc_rejection();
            if let Some(on_reject) = &self.hooks.on_reject {
                on_reject(entry.key, entry.value);
            }
            return false;
        }

        let key = entry.key.clone();
        let hash = entry.key_hash;
        let cost = entry.cost;

        let previous = self.store.set(entry);
        self.radix_insert(&key, hash);

        if let Some(previous) = previous {
            // Replacement: the old value leaves through the evict callback,
            // but it is not an eviction for metrics purposes.
            if let Some(on_evict) = &self.hooks.on_evict {
                on_evict(previous.key, previous.value, previous.cost);
            }
        }

        if !ttl.is_zero() {
            self.scheduler().schedule(key, ttl);
        }

        self.metrics.inc_set();
        self.metrics.add_cost(cost);
        true
    }

    /// Applies a delete.
    pub(crate) fn apply_delete(&self, key: &K, hash: u64) -> bool {
        let _serial = self.write_serial.lock();
        let Some(_removed) = self.store.delete_by_hash(key, hash) else {
            return false;
        };
        self.policy.remove(hash);
        self.radix_remove(key);
        self.scheduler().unschedule(key);
        self.metrics.inc_delete();
        true
    }

    fn evict_by_hash(&self, hash: u64) {
        let Some(entry) = self.store.take_by_hash(hash) else {
            // The victim may never have landed in the store (in-flight
            // coalesced write); nothing to undo.
            return;
        };
        self.radix_remove(&entry.key);
        self.scheduler().unschedule(&entry.key);
        self.metrics.inc_eviction();
        self.metrics.add_evicted_cost(entry.cost);
        if let Some(on_evict) = &self.hooks.on_evict {
            on_evict(entry.key, entry.value, entry.cost);
        }
    }

    /// Expiry sink: removes each key iff its deadline truly passed.
    pub(crate) fn process_expired(&self, keys: Vec<K>) {
        let _serial = self.write_serial.lock();
        let now = self.clock.now_nanos();
        for key in keys {
            let hash = self.store.key_hash(&key);
            let Some(entry) = self.store.remove_if_expired(&key, hash, now) else {
                // Deleted meanwhile, or re-set with a later deadline.
                continue;
            };
            self.policy.remove(hash);
            self.radix_remove(&key);
            self.metrics.inc_expiration();
            if let Some(on_expire) = &self.hooks.on_expire {
                on_expire(entry.key, entry.value);
            }
        }
    }

    pub(crate) fn apply_batch(&self, batch: Vec<WriteOp<K, V>>) {
        for op in batch {
            match op {
                WriteOp::Set { entry, ttl } => {
                    self.apply_set(entry, ttl);
                }
                WriteOp::Delete { key, hash } => {
                    self.apply_delete(&key, hash);
                }
            }
        }
    }

    fn cost_for(&self, value: &V, requested: i64) -> i64 {
        if requested > 0 {
            return requested;
        }
        match &self.hooks.cost_fn {
            Some(cost_fn) => cost_fn(value).max(1),
            None => 1,
        }
    }

    fn effective_ttl(&self, ttl: Duration) -> Duration {
        if ttl.is_zero() && !self.default_ttl.is_zero() {
            self.default_ttl
        } else {
            ttl
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Concurrent TinyLFU cache with TTL support.
///
/// Built via [`CacheBuilder`](crate::builder::CacheBuilder). Values are
/// returned as `Arc<V>`; the cache keeps ownership while an entry is
/// resident.
///
/// # Example
///
/// ```
/// use lfukit::builder::CacheBuilder;
/// use std::time::Duration;
///
/// let cache = CacheBuilder::<String, i32>::new().try_build().unwrap();
/// assert!(cache.set("answer".to_string(), 42, Duration::ZERO));
/// assert_eq!(cache.get(&"answer".to_string()).as_deref(), Some(&42));
/// cache.close();
/// ```
pub struct Cache<K, V, S = FnvBuildHasher> {
    core: Arc<CacheCore<K, V, S>>,
}

impl<K, V, S> std::fmt::Debug for Cache<K, V, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache").finish_non_exhaustive()
    }
}

impl<K, V, S> Cache<K, V, S>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
    S: BuildHasher + Send + Sync + 'static,
{
    pub(crate) fn from_core(core: Arc<CacheCore<K, V, S>>) -> Self {
        Self { core }
    }

    /// Fetches the value for `key`, recording the access with the policy.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        if self.core.is_closed() {
            return None;
        }
        let hash = self.core.store.key_hash(key);
        match self.core.store.get_by_hash(key, hash) {
            Some(entry) => {
                self.core.policy.access(hash);
                self.core.metrics.inc_hit();
                Some(entry.value)
            }
            None => {
                self.core.metrics.inc_miss();
                None
            }
        }
    }

    /// Stores `value` under `key` with unit (or estimated) cost.
    ///
    /// A zero `ttl` means no expiration unless a default TTL is configured.
    /// Returns `false` when the admission policy rejects the entry, the
    /// coalescer is saturated, or the cache is closed.
    pub fn set(&self, key: K, value: V, ttl: Duration) -> bool {
        self.set_with_cost(key, value, 0, ttl)
    }

    /// Stores `value` with an explicit cost (zero delegates to the cost
    /// function, defaulting to 1).
    pub fn set_with_cost(&self, key: K, value: V, cost: i64, ttl: Duration) -> bool {
        if self.core.is_closed() {
            return false;
        }

        let cost = self.core.cost_for(&value, cost);
        let ttl = self.core.effective_ttl(ttl);
        let expire_at = if ttl.is_zero() {
            0
        } else {
            self.core
                .clock
                .now_nanos()
                .saturating_add(ttl.as_nanos().min(i64::MAX as u128) as i64)
        };

        let hash = self.core.store.key_hash(&key);
        let entry = Entry {
            key,
            value: Arc::new(value),
            key_hash: hash,
            expire_at,
            cost,
        };

        match self.core.coalescer.get() {
            Some(coalescer) => coalescer.push(WriteOp::Set { entry, ttl }),
            None => self.core.apply_set(entry, ttl),
        }
    }

    /// Removes `key`. Returns `false` if it was absent (or, when buffered,
    /// if the delete could not be queued).
    pub fn delete(&self, key: &K) -> bool {
        if self.core.is_closed() {
            return false;
        }
        let hash = self.core.store.key_hash(key);
        match self.core.coalescer.get() {
            Some(coalescer) => coalescer.push(WriteOp::Delete {
                key: key.clone(),
                hash,
            }),
            None => self.core.apply_delete(key, hash),
        }
    }

    /// Returns `true` if `key` is resident and unexpired.
    pub fn has(&self, key: &K) -> bool {
        !self.core.is_closed() && self.core.store.has(key)
    }

    /// Number of resident entries.
    pub fn len(&self) -> usize {
        self.core.store.len()
    }

    /// Returns `true` when no entries are resident.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fetches every present key from `keys` into a map.
    pub fn get_many(&self, keys: &[K]) -> FxHashMap<K, Arc<V>> {
        let mut found = FxHashMap::default();
        for key in keys {
            if let Some(value) = self.get(key) {
                found.insert(key.clone(), value);
            }
        }
        found
    }

    /// Stores every item, returning how many were accepted.
    pub fn set_many(&self, items: Vec<Item<K, V>>) -> usize {
        let mut stored = 0;
        for item in items {
            if self.set_with_cost(item.key, item.value, item.cost, item.ttl) {
                stored += 1;
            }
        }
        stored
    }

    /// Deletes every key, returning how many were removed.
    pub fn delete_many(&self, keys: &[K]) -> usize {
        keys.iter().filter(|key| self.delete(key)).count()
    }

    /// Blocks until all buffered writes issued before this call are applied.
    /// A no-op for unbuffered caches.
    pub fn wait(&self) {
        if self.core.is_closed() {
            return;
        }
        if let Some(coalescer) = self.core.coalescer.get() {
            coalescer.wait();
        }
    }

    /// Removes every entry and resets policy state, radix tree, pending
    /// expirations, and metrics.
    pub fn clear(&self) {
        if self.core.is_closed() {
            return;
        }
        self.wait();
        let _serial = self.core.write_serial.lock();
        self.core.store.clear();
        self.core.policy.clear();
        if let Some(tree) = &self.core.radix {
            tree.write().clear();
        }
        self.core.scheduler().truncate();
        self.core.metrics.reset();
    }

    /// Snapshot of the facade metrics.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.core.metrics.snapshot()
    }

    /// Iterates all entries from `cursor`, `count` at a time.
    pub fn scan(&self, cursor: u64, count: usize) -> Scanner<'_, K, V, S> {
        if self.core.is_closed() {
            return Scanner::empty();
        }
        Scanner::new(self.core.as_ref(), cursor, count, None, None)
    }

    /// Iterates entries whose string keys start with `prefix`.
    ///
    /// Yields nothing for non-string key types.
    pub fn scan_prefix(&self, prefix: &str, cursor: u64, count: usize) -> Scanner<'_, K, V, S> {
        if self.core.is_closed() || self.core.radix.is_none() {
            return Scanner::empty();
        }
        Scanner::new(
            self.core.as_ref(),
            cursor,
            count,
            Some(prefix.to_string()),
            None,
        )
    }

    /// Iterates entries whose string keys match the glob `pattern`.
    ///
    /// A malformed pattern yields a scanner in a terminal error state;
    /// non-string key types yield nothing.
    pub fn scan_match(&self, pattern: &str, cursor: u64, count: usize) -> Scanner<'_, K, V, S> {
        if self.core.is_closed() || self.core.radix.is_none() {
            return Scanner::empty();
        }
        match crate::glob::Pattern::compile(pattern) {
            Ok(compiled) => {
                let prefix = compiled.prefix().to_string();
                Scanner::new(self.core.as_ref(), cursor, count, Some(prefix), Some(compiled))
            }
            Err(error) => Scanner::with_error(error),
        }
    }

    /// Shuts the cache down: drains the coalescer, stops the expiry worker
    /// and the clock ticker, and marks every subsequent operation a no-op.
    /// Idempotent.
    pub fn close(&self) {
        if self.core.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("closing cache");
        if let Some(coalescer) = self.core.coalescer.get() {
            coalescer.close();
        }
        self.core.scheduler().stop();
        self.core.clock.stop();
    }

    /// Drains the cache into a map of all non-expired entries, then closes.
    ///
    /// Buffered writes issued before this call are applied before the
    /// snapshot is taken (the flush barrier guarantees a drain that started
    /// after them has completed), so none are lost. Returns an empty map if
    /// the cache was already closed.
    pub fn close_collect(&self) -> FxHashMap<K, Arc<V>> {
        if self.core.is_closed() {
            return FxHashMap::default();
        }
        self.wait();
        let mut collected = FxHashMap::default();
        for entry in self.core.store.live_entries() {
            collected.insert(entry.key, entry.value);
        }
        self.close();
        collected
    }
}

impl<K, V, S> Drop for Cache<K, V, S> {
    fn drop(&mut self) {
        self.closed_on_drop();
    }
}

impl<K, V, S> Cache<K, V, S> {
    fn closed_on_drop(&self) {
        if self.core.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(coalescer) = self.core.coalescer.get() {
            coalescer.close();
        }
        if let Some(scheduler) = self.core.scheduler.get() {
            scheduler.stop();
        }
        self.core.clock.stop();
    }
}

// =============================================================================
// Tests
// =============================================================================
