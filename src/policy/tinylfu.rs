//! TinyLFU admission: doorkeeper + Count-Min sketch + periodic aging.
//!
//! Every access funnels through [`increment`](TinyLfu::increment), which is
//! entirely lock-free: a doorkeeper probe, at most one sketch bump, and one
//! atomic counter add. When the counter crosses the reset threshold, exactly
//! one thread wins an optimistic compare-and-swap and performs the aging pass
//! (halve the sketch, clear the doorkeeper); the rest keep counting. Slight
//! over-counting across the boundary is accepted; the policy is approximate
//! by construction.
//!
//! [`estimate`](TinyLfu::estimate) adds one to the sketch value when the
//! doorkeeper knows the key, crediting the first sighting the sketch never
//! saw.

use std::sync::atomic::{AtomicU64, Ordering};

use super::doorkeeper::Doorkeeper;
use super::sketch::CmSketch;

/// Doorkeeper sizing relative to the sketch width.
const DOORKEEPER_DIVISOR: u64 = 10;

/// Doorkeeper false-positive target.
const DOORKEEPER_FP_RATE: f64 = 0.01;

/// Lock-free TinyLFU frequency tracker and admission filter.
#[derive(Debug)]
pub struct TinyLfu {
    freq: CmSketch,
    door: Doorkeeper,
    increments: AtomicU64,
    reset_at: u64,
}

impl TinyLfu {
    /// Creates a tracker with `num_counters` sketch counters per row.
    ///
    /// The aging threshold equals the rounded sketch width; the doorkeeper is
    /// sized for a tenth of the counters at ~1% false positives.
    pub fn new(num_counters: u64) -> Self {
        let freq = CmSketch::new(num_counters);
        let width = freq.width();
        Self {
            freq,
            door: Doorkeeper::new(width / DOORKEEPER_DIVISOR, DOORKEEPER_FP_RATE),
            increments: AtomicU64::new(0),
            reset_at: width,
        }
    }

    /// Records one access to `hash`. Lock-free.
    pub fn increment(&self, hash: u64) {
        // First sighting stops at the doorkeeper; repeats reach the sketch.
        if self.door.add(hash) {
            self.freq.increment(hash);
        }

        let count = self.increments.fetch_add(1, Ordering::Relaxed) + 1;
        if count >= self.reset_at {
            // One winner ages the state; losers raced past the threshold and
            // simply keep counting until the next crossing.
            if self
                .increments
                .compare_exchange(count, 0, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                self.freq.reset();
                self.door.reset();
            }
        }
    }

    /// Estimated access frequency of `hash`.
    pub fn estimate(&self, hash: u64) -> i64 {
        let mut estimate = self.freq.estimate(hash);
        if self.door.contains(hash) {
            estimate += 1;
        }
        estimate
    }

    /// Should `incoming` displace `victim`? Ties admit the incoming key so
    /// new entries can establish themselves.
    pub fn admit(&self, incoming: u64, victim: u64) -> bool {
        self.estimate(incoming) >= self.estimate(victim)
    }

    /// Accesses recorded since the last aging reset.
    pub fn increments(&self) -> u64 {
        self.increments.load(Ordering::Relaxed)
    }

    /// Doorkeeper saturation, for monitoring.
    pub fn fill_ratio(&self) -> f64 {
        self.door.fill_ratio()
    }

    /// Forgets everything: counters, doorkeeper, and the increment count.
    pub fn clear(&self) {
        self.freq.clear();
        self.door.reset();
        self.increments.store(0, Ordering::Relaxed);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_is_stable_without_increments() {
        let lfu = TinyLfu::new(1 << 12);
        let h = 0xabcd;
        assert_eq!(lfu.estimate(h), lfu.estimate(h));
        assert_eq!(lfu.estimate(h), 0);
    }

    #[test]
    fn first_access_counts_via_doorkeeper() {
        let lfu = TinyLfu::new(1 << 12);
        let h = 77;
        lfu.increment(h);
        // Sketch unbumped, doorkeeper contributes the +1.
        assert_eq!(lfu.estimate(h), 1);
        lfu.increment(h);
        assert_eq!(lfu.estimate(h), 2);
    }

    #[test]
    fn admit_is_reflexive() {
        let lfu = TinyLfu::new(1 << 12);
        assert!(lfu.admit(5, 5));
        lfu.increment(5);
        assert!(lfu.admit(5, 5));
    }

    #[test]
    fn admit_prefers_hotter_incoming_and_ties() {
        let lfu = TinyLfu::new(1 << 12);
        let (hot, cold, fresh) = (1, 2, 3);
        for _ in 0..10 {
            lfu.increment(hot);
        }
        lfu.increment(cold);

        assert!(lfu.admit(hot, cold));
        assert!(!lfu.admit(fresh, hot));
        // Equal estimates favor the incoming key.
        assert!(lfu.admit(cold, cold));
    }

    #[test]
    fn threshold_crossing_resets_counter_and_doorkeeper() {
        // Small sketch so the threshold is reachable quickly.
        let lfu = TinyLfu::new(64);
        assert_eq!(lfu.increments(), 0);
        for i in 0..64u64 {
            lfu.increment(i);
        }
        // The 64th increment crossed the threshold and reset.
        assert_eq!(lfu.increments(), 0);
        // Doorkeeper was cleared with it.
        assert_eq!(lfu.estimate(0), 0);
    }

    #[test]
    fn aging_halves_hot_keys() {
        let lfu = TinyLfu::new(256);
        let hot = 9;
        for _ in 0..100 {
            lfu.increment(hot);
        }
        let before = lfu.estimate(hot);
        // Drive the counter over the threshold with distinct keys.
        for i in 1000..1256u64 {
            lfu.increment(i);
        }
        let after = lfu.estimate(hot);
        assert!(
            after <= before / 2 + 1,
            "estimate went {before} -> {after}, expected roughly half"
        );
    }

    #[test]
    fn clear_forgets_history() {
        let lfu = TinyLfu::new(1 << 10);
        for _ in 0..5 {
            lfu.increment(123);
        }
        lfu.clear();
        assert_eq!(lfu.estimate(123), 0);
        assert_eq!(lfu.increments(), 0);
    }

    #[test]
    fn concurrent_increments_preserve_relative_order() {
        use std::sync::Arc;
        let lfu = Arc::new(TinyLfu::new(1 << 16));
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let lfu = Arc::clone(&lfu);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        lfu.increment(1); // hot
                    }
                    lfu.increment(2); // cold
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert!(lfu.estimate(1) > lfu.estimate(2));
    }
}
