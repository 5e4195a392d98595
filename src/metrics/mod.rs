//! Cache-wide metrics.
//!
//! Plain atomic counters bumped from the operation paths, read all at once by
//! [`snapshot`](CacheMetrics::snapshot). Per-shard hit/miss counters live on
//! the store; these are the facade-level aggregates.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Point-in-time view of the counters.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct MetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub rejections: u64,
    pub cost_added: i64,
    pub cost_evicted: i64,
    /// `hits / (hits + misses)`, zero when nothing was read.
    pub hit_ratio: f64,
}

/// Atomic counter block owned by the cache facade.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    rejections: AtomicU64,
    cost_added: AtomicI64,
    cost_evicted: AtomicI64,
}

impl CacheMetrics {
    /// Creates a zeroed counter block.
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn inc_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_expiration(&self) {
        self.expirations.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_rejection(&self) {
        self.rejections.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_cost(&self, cost: i64) {
        self.cost_added.fetch_add(cost, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_evicted_cost(&self, cost: i64) {
        self.cost_evicted.fetch_add(cost, Ordering::Relaxed);
    }

    /// Reads every counter and derives the hit ratio.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_ratio = if total > 0 {
            hits as f64 / total as f64
        } else {
            0.0
        };
        MetricsSnapshot {
            hits,
            misses,
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            rejections: self.rejections.load(Ordering::Relaxed),
            cost_added: self.cost_added.load(Ordering::Relaxed),
            cost_evicted: self.cost_evicted.load(Ordering::Relaxed),
            hit_ratio,
        }
    }

    /// Stores zero into every counter.
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.sets.store(0, Ordering::Relaxed);
        self.deletes.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.expirations.store(0, Ordering::Relaxed);
        self.rejections.store(0, Ordering::Relaxed);
        self.cost_added.store(0, Ordering::Relaxed);
        self.cost_evicted.store(0, Ordering::Relaxed);
    }
}
