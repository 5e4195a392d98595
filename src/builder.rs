//! Cache construction.
//!
//! [`CacheBuilder`] collects options and validates them in
//! [`try_build`](CacheBuilder::try_build), which wires the store, policy,
//! clock, expiration worker, optional coalescer, and (for string keys) the
//! radix tree into a [`Cache`].
//!
//! ## Options
//!
//! | Option | Default | Effect |
//! |---|---|---|
//! | `max_entries` | 0 (unlimited) | hard cap on entry count |
//! | `max_cost` | 0 (unlimited) | hard cap on summed cost |
//! | `num_counters` | 10× max_entries, else 2²⁰ | CM sketch width |
//! | `shard_count` | 1024 | store shards, must be a power of two |
//! | `buffer_items` | 0 (synchronous) | coalescer batch size |
//! | `default_ttl` | none | TTL applied when the caller passes zero |
//! | `poll_interval` | 60 s | expiry worker fallback wait |
//! | `on_evict` / `on_expire` / `on_reject` | none | lifecycle callbacks |
//! | `cost_fn` | cost 1 | value → cost estimator |
//! | `key_hasher` | [`FnvBuildHasher`] | replaces the key hash |
//!
//! A non-power-of-two `shard_count` is a [`ConfigError`]; ring capacity and
//! sketch width round up silently.

use std::hash::{BuildHasher, Hash};
use std::marker::PhantomData;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use crate::cache::{Cache, CacheCore, CostFn, EvictHandler, ExpireHandler, Hooks, RejectHandler};
use crate::clock::CachedClock;
use crate::coalesce::WriteCoalescer;
use crate::ds::RadixTree;
use crate::error::ConfigError;
use crate::expiry::{ExpirationScheduler, DEFAULT_POLL_INTERVAL};
use crate::hash::FnvBuildHasher;
use crate::metrics::CacheMetrics;
use crate::policy::TinyLfuPolicy;
use crate::store::{ShardedStore, DEFAULT_SHARD_COUNT};

/// Idle flush period for the coalescer consumer.
const FLUSH_INTERVAL: Duration = Duration::from_millis(1);

/// Default sketch width when neither counters nor max_entries are set.
const DEFAULT_NUM_COUNTERS: u64 = 1 << 20;

/// Builder for [`Cache`].
pub struct CacheBuilder<K, V, S = FnvBuildHasher> {
    max_entries: i64,
    max_cost: i64,
    num_counters: u64,
    shard_count: usize,
    buffer_items: usize,
    default_ttl: Duration,
    poll_interval: Duration,
    hooks: Hooks<K, V>,
    hasher: S,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V> CacheBuilder<K, V, FnvBuildHasher> {
    /// Starts a builder with defaults: unbounded, 1024 shards, synchronous
    /// writes, FNV/splitmix hashing.
    pub fn new() -> Self {
        Self {
            max_entries: 0,
            max_cost: 0,
            num_counters: 0,
            shard_count: DEFAULT_SHARD_COUNT,
            buffer_items: 0,
            default_ttl: Duration::ZERO,
            poll_interval: DEFAULT_POLL_INTERVAL,
            hooks: Hooks::default(),
            hasher: FnvBuildHasher,
            _marker: PhantomData,
        }
    }
}

impl<K, V> Default for CacheBuilder<K, V, FnvBuildHasher> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S> CacheBuilder<K, V, S> {
    /// Caps the number of resident entries; zero means unlimited.
    pub fn max_entries(mut self, n: i64) -> Self {
        self.max_entries = n.max(0);
        self
    }

    /// Caps the summed cost of resident entries; zero means unlimited.
    pub fn max_cost(mut self, cost: i64) -> Self {
        self.max_cost = cost.max(0);
        self
    }

    /// Overrides the frequency sketch width (rounded up to a power of two).
    pub fn num_counters(mut self, n: u64) -> Self {
        self.num_counters = n;
        self
    }

    /// Sets the store shard count. Must be a power of two.
    pub fn shard_count(mut self, n: usize) -> Self {
        self.shard_count = n;
        self
    }

    /// Enables write coalescing with batches of `n`; zero keeps writes
    /// synchronous.
    pub fn buffer_items(mut self, n: usize) -> Self {
        self.buffer_items = n;
        self
    }

    /// TTL applied when the caller passes a zero duration.
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Fallback wait of the expiry worker when no deadlines are queued.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Called with `(key, value, cost)` when an entry is evicted or replaced.
    pub fn on_evict<F>(mut self, f: F) -> Self
    where
        F: Fn(K, Arc<V>, i64) + Send + Sync + 'static,
    {
        self.hooks.on_evict = Some(Box::new(f) as EvictHandler<K, V>);
        self
    }

    /// Called with `(key, value)` when an entry's TTL removes it.
    pub fn on_expire<F>(mut self, f: F) -> Self
    where
        F: Fn(K, Arc<V>) + Send + Sync + 'static,
    {
        self.hooks.on_expire = Some(Box::new(f) as ExpireHandler<K, V>);
        self
    }

    /// Called with `(key, value)` when admission rejects a set.
    pub fn on_reject<F>(mut self, f: F) -> Self
    where
        F: Fn(K, Arc<V>) + Send + Sync + 'static,
    {
        self.hooks.on_reject = Some(Box::new(f) as RejectHandler<K, V>);
        self
    }

    /// Estimates the cost of a value when the caller passes zero.
    pub fn cost_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&V) -> i64 + Send + Sync + 'static,
    {
        self.hooks.cost_fn = Some(Box::new(f) as CostFn<V>);
        self
    }

    /// Replaces the key hasher.
    pub fn key_hasher<S2>(self, hasher: S2) -> CacheBuilder<K, V, S2> {
        CacheBuilder {
            max_entries: self.max_entries,
            max_cost: self.max_cost,
            num_counters: self.num_counters,
            shard_count: self.shard_count,
            buffer_items: self.buffer_items,
            default_ttl: self.default_ttl,
            poll_interval: self.poll_interval,
            hooks: self.hooks,
            hasher,
            _marker: PhantomData,
        }
    }
}

impl<K, V, S> CacheBuilder<K, V, S>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
    S: BuildHasher + Send + Sync + 'static,
{
    /// Validates the configuration and starts the cache.
    pub fn try_build(self) -> Result<Cache<K, V, S>, ConfigError> {
        let shard_count = if self.shard_count == 0 {
            DEFAULT_SHARD_COUNT
        } else {
            self.shard_count
        };
        if !shard_count.is_power_of_two() {
            return Err(ConfigError::ShardCountNotPowerOfTwo(shard_count));
        }
        if shard_count > 1 << 31 {
            return Err(ConfigError::ShardCountTooLarge(shard_count));
        }

        let num_counters = if self.num_counters > 0 {
            self.num_counters
        } else if self.max_entries > 0 {
            self.max_entries as u64 * 10
        } else {
            DEFAULT_NUM_COUNTERS
        };

        let clock = Arc::new(CachedClock::start());

        let radix = (std::any::TypeId::of::<K>() == std::any::TypeId::of::<String>())
            .then(|| RwLock::new(RadixTree::new()));

        let core = Arc::new(CacheCore {
            store: ShardedStore::new(shard_count, self.hasher, Arc::clone(&clock)),
            policy: TinyLfuPolicy::new(num_counters, self.max_cost, self.max_entries),
            radix,
            metrics: CacheMetrics::new(),
            hooks: self.hooks,
            clock: Arc::clone(&clock),
            default_ttl: self.default_ttl,
            scheduler: OnceLock::new(),
            coalescer: OnceLock::new(),
            write_serial: Mutex::new(()),
            closed: AtomicBool::new(false),
        });

        // Workers observe the core weakly; ownership stays with the facade.
        let expiry_core = Arc::downgrade(&core);
        let scheduler = ExpirationScheduler::start(clock, self.poll_interval, move |keys| {
            if let Some(core) = expiry_core.upgrade() {
                core.process_expired(keys);
            }
        });
        core.scheduler
            .set(scheduler)
            .unwrap_or_else(|_| unreachable!("scheduler installed once"));

        if self.buffer_items > 0 {
            let writer_core = Arc::downgrade(&core);
            let coalescer = WriteCoalescer::start(
                self.buffer_items * 2,
                self.buffer_items,
                FLUSH_INTERVAL,
                move |batch| {
                    if let Some(core) = writer_core.upgrade() {
                        core.apply_batch(batch);
                    }
                },
            );
            core.coalescer
                .set(coalescer)
                .unwrap_or_else(|_| unreachable!("coalescer installed once"));
        }

        Ok(Cache::from_core(core))
    }
}

// =============================================================================
// Tests
// =============================================================================
