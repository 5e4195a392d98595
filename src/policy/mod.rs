//! Admission and eviction policy.
//!
//! The composite joins the lock-free TinyLFU admitter with the mutex-guarded
//! sampled-LFU evictor:
//!
//! ```text
//!                 ┌──────────────────────────────────────────┐
//!                 │              TinyLfuPolicy               │
//!                 │                                          │
//!   access(h) ───►│  TinyLfu (lock-free)                     │
//!                 │    doorkeeper + CM sketch + aging        │
//!                 │                                          │
//!   add(h, c) ───►│  Mutex<SampledLfu>                       │
//!                 │    cost map + totals + random sampling   │
//!                 └──────────────────────────────────────────┘
//! ```
//!
//! `access` never takes the mutex, so read-heavy workloads scale across
//! cores; only writes serialize on the evictor.
//!
//! ## Admission protocol
//!
//! `add` runs eviction rounds while the entry would overshoot a limit: draw a
//! sample, pick the sample's coldest resident, and ask TinyLFU whether the
//! incoming key may displace it. The first round the incoming key loses, it
//! is **rejected**: a key too cold to beat the weakest of five random
//! residents is not worth storing. Victims already displaced in earlier
//! rounds stay evicted; the store removes them either way.

pub mod doorkeeper;
pub mod sampled;
pub mod sketch;
pub mod tinylfu;

use parking_lot::Mutex;

pub use doorkeeper::Doorkeeper;
pub use sampled::{SampledLfu, SAMPLE_SIZE};
pub use sketch::CmSketch;
pub use tinylfu::TinyLfu;

/// Outcome of [`TinyLfuPolicy::add`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    /// Key hashes displaced to make room. Already untracked by the evictor;
    /// the caller removes them from the store.
    pub victims: Vec<u64>,
    /// Whether the incoming key was admitted.
    pub admitted: bool,
}

/// TinyLFU admission + sampled-LFU eviction, composed.
#[derive(Debug)]
pub struct TinyLfuPolicy {
    admit: TinyLfu,
    evict: Mutex<SampledLfu>,
}

impl TinyLfuPolicy {
    /// Creates a policy with `num_counters` sketch counters and the given
    /// cost/entry limits (zero = unbounded).
    pub fn new(num_counters: u64, max_cost: i64, max_entries: i64) -> Self {
        Self {
            admit: TinyLfu::new(num_counters),
            evict: Mutex::new(SampledLfu::new(max_cost, max_entries)),
        }
    }

    /// Records a read access. Lock-free.
    #[inline]
    pub fn access(&self, hash: u64) {
        self.admit.increment(hash);
    }

    /// Offers `hash` with `cost` for residency.
    ///
    /// Returns the victims to remove and whether the key was admitted. An
    /// already-tracked hash is a cost update and always succeeds.
    pub fn add(&self, hash: u64, cost: i64) -> Admission {
        self.admit.increment(hash);

        let mut evict = self.evict.lock();

        if evict.tracked(hash) {
            evict.update(hash, cost);
            return Admission {
                victims: Vec::new(),
                admitted: true,
            };
        }

        let mut victims = Vec::new();
        while evict.would_exceed(cost) {
            let sample = evict.sample();
            if sample.is_empty() {
                break;
            }

            let victim = sample
                .into_iter()
                .min_by_key(|&candidate| self.admit.estimate(candidate))
                .expect("non-empty sample");

            if !self.admit.admit(hash, victim) {
                // Too cold to displace the weakest sampled resident.
                return Admission {
                    victims,
                    admitted: false,
                };
            }

            evict.remove(victim);
            victims.push(victim);
        }

        evict.add(hash, cost);
        Admission {
            victims,
            admitted: true,
        }
    }

    /// Stops tracking `hash` (deleted or expired entry).
    pub fn remove(&self, hash: u64) {
        self.evict.lock().remove(hash);
    }

    /// Updates the cost of a tracked hash.
    pub fn update(&self, hash: u64, cost: i64) {
        self.evict.lock().update(hash, cost);
    }

    /// Returns `true` if the evictor tracks `hash`.
    pub fn tracked(&self, hash: u64) -> bool {
        self.evict.lock().tracked(hash)
    }

    /// Estimated frequency of `hash`.
    pub fn estimate(&self, hash: u64) -> i64 {
        self.admit.estimate(hash)
    }

    /// Sum of tracked costs.
    pub fn used_cost(&self) -> i64 {
        self.evict.lock().used_cost()
    }

    /// Number of tracked entries.
    pub fn entries(&self) -> i64 {
        self.evict.lock().entries()
    }

    /// Doorkeeper saturation, for monitoring.
    pub fn fill_ratio(&self) -> f64 {
        self.admit.fill_ratio()
    }

    /// Accesses recorded since the last aging reset.
    pub fn increments(&self) -> u64 {
        self.admit.increments()
    }

    /// Resets admission history and eviction tracking.
    pub fn clear(&self) {
        let mut evict = self.evict.lock();
        self.admit.clear();
        evict.clear();
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbounded_policy_admits_everything() {
        let policy = TinyLfuPolicy::new(1 << 12, 0, 0);
        for h in 0..100 {
            let admission = policy.add(h, 1);
            assert!(admission.admitted);
            assert!(admission.victims.is_empty());
        }
        assert_eq!(policy.entries(), 100);
    }

    #[test]
    fn readd_updates_cost_in_place() {
        let policy = TinyLfuPolicy::new(1 << 12, 100, 0);
        assert!(policy.add(1, 10).admitted);
        let again = policy.add(1, 30);
        assert!(again.admitted);
        assert!(again.victims.is_empty());
        assert_eq!(policy.used_cost(), 30);
        assert_eq!(policy.entries(), 1);
    }

    #[test]
    fn full_cache_evicts_exactly_one_equal_victim_per_add() {
        let policy = TinyLfuPolicy::new(1 << 12, 0, 3);
        for h in 0..3 {
            assert!(policy.add(h, 1).admitted);
        }
        // All residents have equal (zero-ish) frequency; a new key with one
        // access ties and displaces exactly one of them.
        let admission = policy.add(99, 1);
        assert!(admission.admitted);
        assert_eq!(admission.victims.len(), 1);
        assert_eq!(policy.entries(), 3);
    }

    #[test]
    fn cold_incoming_is_rejected_against_hot_residents() {
        let policy = TinyLfuPolicy::new(1 << 12, 0, 2);
        assert!(policy.add(1, 1).admitted);
        assert!(policy.add(2, 1).admitted);
        for _ in 0..50 {
            policy.access(1);
            policy.access(2);
        }

        let admission = policy.add(3, 1);
        assert!(!admission.admitted);
        assert!(admission.victims.is_empty());
        assert_eq!(policy.entries(), 2);
        assert!(policy.tracked(1));
        assert!(policy.tracked(2));
        assert!(!policy.tracked(3));
    }

    #[test]
    fn hot_incoming_displaces_cold_resident() {
        let policy = TinyLfuPolicy::new(1 << 12, 100, 0);
        assert!(policy.add(1, 60).admitted);
        assert!(policy.add(2, 40).admitted);
        for _ in 0..10 {
            policy.access(1);
        }

        // Key 3 is hotter than resident 2; it must get in, and the sampled
        // victim can only come from {1, 2}.
        for _ in 0..20 {
            policy.access(3);
        }
        let admission = policy.add(3, 50);
        assert!(admission.admitted);
        assert!(!admission.victims.is_empty());
        assert!(policy.tracked(3));
    }

    #[test]
    fn cost_eviction_frees_enough_room() {
        let policy = TinyLfuPolicy::new(1 << 12, 100, 0);
        assert!(policy.add(1, 40).admitted);
        assert!(policy.add(2, 40).admitted);
        let admission = policy.add(3, 40);
        assert!(admission.admitted);
        assert_eq!(admission.victims.len(), 1);
        assert!(policy.used_cost() <= 100);
    }

    #[test]
    fn estimate_is_stable_without_access() {
        let policy = TinyLfuPolicy::new(1 << 12, 0, 0);
        let h = 0x51ab;
        assert_eq!(policy.estimate(h), policy.estimate(h));
    }

    #[test]
    fn remove_untracks_and_releases_cost() {
        let policy = TinyLfuPolicy::new(1 << 12, 0, 0);
        policy.add(5, 25);
        policy.remove(5);
        assert!(!policy.tracked(5));
        assert_eq!(policy.used_cost(), 0);
        // Removing again is a no-op.
        policy.remove(5);
    }

    #[test]
    fn clear_resets_admission_and_eviction() {
        let policy = TinyLfuPolicy::new(1 << 12, 0, 0);
        for _ in 0..10 {
            policy.access(1);
        }
        policy.add(1, 1);
        policy.clear();
        assert_eq!(policy.entries(), 0);
        assert_eq!(policy.estimate(1), 0);
        assert_eq!(policy.increments(), 0);
    }
}
