//! Sampled-LFU eviction bookkeeping.
//!
//! Tracks `key hash -> cost` for every resident entry plus running totals, so
//! the composite policy can answer two questions: does adding this entry
//! exceed a limit, and which residents should be considered as victims?
//! Victims come from a small random sample (reservoir over the map) rather
//! than a fully ordered structure; the caller picks the coldest of the sample
//! via the TinyLFU estimate.
//!
//! Not internally synchronized; the composite policy holds it behind a
//! mutex. The RNG is a XorShift64 seeded at construction, which keeps
//! sampling deterministic under test and free of external dependencies.

use rustc_hash::FxHashMap;

/// Victim candidates drawn per eviction round.
pub const SAMPLE_SIZE: usize = 5;

/// Cost accounting and random sampling for the evictor.
#[derive(Debug)]
pub struct SampledLfu {
    costs: FxHashMap<u64, i64>,
    max_cost: i64,
    used_cost: i64,
    max_entries: i64,
    rng_state: u64,
}

impl SampledLfu {
    /// Creates an evictor with the given limits. Zero means unbounded.
    pub fn new(max_cost: i64, max_entries: i64) -> Self {
        Self {
            costs: FxHashMap::default(),
            max_cost,
            used_cost: 0,
            max_entries,
            rng_state: (0x9e3779b97f4a7c15u64 ^ (max_cost as u64).wrapping_add(max_entries as u64))
                .max(1),
        }
    }

    #[inline]
    fn next_random(state: &mut u64) -> u64 {
        // XorShift64; the constructor forces a nonzero seed.
        let mut x = *state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        *state = x;
        x
    }

    /// Starts tracking `hash` with `cost`, or updates the cost if tracked.
    pub fn add(&mut self, hash: u64, cost: i64) {
        match self.costs.insert(hash, cost) {
            Some(previous) => self.used_cost += cost - previous,
            None => self.used_cost += cost,
        }
    }

    /// Updates the cost of `hash` if it is tracked.
    pub fn update(&mut self, hash: u64, cost: i64) {
        if let Some(slot) = self.costs.get_mut(&hash) {
            self.used_cost += cost - *slot;
            *slot = cost;
        }
    }

    /// Stops tracking `hash`, returning its cost.
    pub fn remove(&mut self, hash: u64) -> Option<i64> {
        let cost = self.costs.remove(&hash)?;
        self.used_cost -= cost;
        Some(cost)
    }

    /// Returns `true` if `hash` is tracked.
    pub fn tracked(&self, hash: u64) -> bool {
        self.costs.contains_key(&hash)
    }

    /// Cost recorded for `hash`, zero when untracked.
    pub fn cost_of(&self, hash: u64) -> i64 {
        self.costs.get(&hash).copied().unwrap_or(0)
    }

    /// Sum of tracked costs.
    pub fn used_cost(&self) -> i64 {
        self.used_cost
    }

    /// Number of tracked entries.
    pub fn entries(&self) -> i64 {
        self.costs.len() as i64
    }

    /// Would admitting an entry of `incoming_cost` overshoot either limit?
    ///
    /// Counts the incoming entry itself, so a full-but-not-over cache still
    /// triggers an eviction round before growing past its bounds.
    pub fn would_exceed(&self, incoming_cost: i64) -> bool {
        if self.max_cost > 0 && self.used_cost + incoming_cost > self.max_cost {
            return true;
        }
        if self.max_entries > 0 && self.entries() + 1 > self.max_entries {
            return true;
        }
        false
    }

    /// Draws up to [`SAMPLE_SIZE`] tracked hashes uniformly at random.
    ///
    /// Reservoir sampling over the map iterator, so the cost stays O(n) with
    /// O(1) extra space no matter how large the map grows.
    pub fn sample(&mut self) -> Vec<u64> {
        if self.costs.is_empty() {
            return Vec::new();
        }
        let want = SAMPLE_SIZE.min(self.costs.len());
        let mut reservoir: Vec<u64> = Vec::with_capacity(want);
        let mut state = self.rng_state;
        for (seen, &hash) in self.costs.keys().enumerate() {
            if seen < want {
                reservoir.push(hash);
            } else {
                let j = (Self::next_random(&mut state) % (seen as u64 + 1)) as usize;
                if j < want {
                    reservoir[j] = hash;
                }
            }
        }
        self.rng_state = state;
        reservoir
    }

    /// Forgets every tracked entry.
    pub fn clear(&mut self) {
        self.costs.clear();
        self.used_cost = 0;
    }
}

// =============================================================================
// Tests
// =============================================================================
