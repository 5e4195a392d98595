//! Lock-free bloom filter acting as the TinyLFU doorkeeper.
//!
//! One-hit wonders dominate most cache workloads; letting them into the
//! frequency sketch wastes counters on keys that never return. The doorkeeper
//! absorbs the first sighting of each key: only keys it has already seen get
//! their sketch counters bumped.
//!
//! Bits live in a flat array of `AtomicU64` words. `k` probe positions come
//! from enhanced double hashing (`h1 + i*h2 + i^2`), which avoids the probe
//! clustering plain double hashing suffers when `h2` is small.
//!
//! The filter is cleared on every aging reset, so "seen before" always means
//! "seen within the current aging window".

use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free bloom filter over a fixed bit array.
#[derive(Debug)]
pub struct Doorkeeper {
    words: Box<[AtomicU64]>,
    num_bits: u64,
    num_hashes: usize,
}

impl Doorkeeper {
    /// Sizes the filter for `expected` items at false-positive rate `fp_rate`.
    ///
    /// Out-of-range arguments fall back to 10 000 items at 1%. The bit count
    /// follows `m = -n ln p / (ln 2)^2`, rounded up to a multiple of 64; the
    /// probe count `k = (m / n) ln 2` is clamped to `[1, 16]`.
    pub fn new(expected: u64, fp_rate: f64) -> Self {
        let expected = if expected == 0 { 10_000 } else { expected };
        let fp_rate = if fp_rate <= 0.0 || fp_rate >= 1.0 {
            0.01
        } else {
            fp_rate
        };

        let ln2_sq = std::f64::consts::LN_2 * std::f64::consts::LN_2;
        let raw_bits = (-(expected as f64) * fp_rate.ln() / ln2_sq).ceil() as u64;
        let num_bits = raw_bits.max(64).div_ceil(64) * 64;
        let num_hashes = ((num_bits as f64 / expected as f64) * std::f64::consts::LN_2) as usize;
        let num_hashes = num_hashes.clamp(1, 16);

        Self {
            words: (0..num_bits / 64).map(|_| AtomicU64::new(0)).collect(),
            num_bits,
            num_hashes,
        }
    }

    /// Bit array size.
    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    /// Probe count.
    pub fn num_hashes(&self) -> usize {
        self.num_hashes
    }

    #[inline]
    fn bit_index(&self, hash: u64, probe: u64) -> u64 {
        let h1 = hash;
        let h2 = hash.rotate_right(32);
        // Enhanced double hashing: the quadratic term keeps probes from
        // collapsing onto a short cycle when h2 shares factors with num_bits.
        h1.wrapping_add(probe.wrapping_mul(h2))
            .wrapping_add(probe.wrapping_mul(probe))
            % self.num_bits
    }

    /// Sets the `k` bits for `hash`. Returns `true` if every bit was already
    /// set (the key was probably seen before).
    pub fn add(&self, hash: u64) -> bool {
        let mut already_present = true;
        for probe in 0..self.num_hashes as u64 {
            let idx = self.bit_index(hash, probe);
            let word = &self.words[(idx / 64) as usize];
            let mask = 1u64 << (idx % 64);
            let previous = word.fetch_or(mask, Ordering::Relaxed);
            if previous & mask == 0 {
                already_present = false;
            }
        }
        already_present
    }

    /// Returns `true` if all `k` bits for `hash` are set.
    pub fn contains(&self, hash: u64) -> bool {
        (0..self.num_hashes as u64).all(|probe| {
            let idx = self.bit_index(hash, probe);
            let mask = 1u64 << (idx % 64);
            self.words[(idx / 64) as usize].load(Ordering::Relaxed) & mask != 0
        })
    }

    /// Clears every bit.
    pub fn reset(&self) {
        for word in self.words.iter() {
            word.store(0, Ordering::Relaxed);
        }
    }

    /// Fraction of set bits, for monitoring filter saturation.
    pub fn fill_ratio(&self) -> f64 {
        let set: u64 = self
            .words
            .iter()
            .map(|w| u64::from(w.load(Ordering::Relaxed).count_ones()))
            .sum();
        set as f64 / self.num_bits as f64
    }
}

// =============================================================================
// Tests
// =============================================================================
