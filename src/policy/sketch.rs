//! Lock-free Count-Min sketch with 8-bit saturating counters.
//!
//! Frequency estimation for the TinyLFU admitter. Four rows of `W` counters
//! (W a power of two); each counter is one byte, packed four to an `AtomicU32`
//! word so increments are a CAS on the containing word.
//!
//! ## Architecture
//!
//! ```text
//!   key hash ──┬── fmix64(h ^ seed[0]) & (W-1) ──► row 0 ── byte in word
//!              ├── fmix64(h ^ seed[1]) & (W-1) ──► row 1 ── byte in word
//!              ├── fmix64(h ^ seed[2]) & (W-1) ──► row 2 ── byte in word
//!              └── fmix64(h ^ seed[3]) & (W-1) ──► row 3 ── byte in word
//!
//!   increment: CAS loop bumping one byte, saturating at 255
//!   estimate:  min of the four counters (classic CM property)
//!   reset:     every byte >>= 1, per-word CAS (aging)
//! ```
//!
//! Counters only over-approximate: hash collisions inflate individual rows,
//! and taking the minimum across rows bounds the damage. Saturation at 255
//! holds until the next aging reset halves the table.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::hash::{fmix64, splitmix64};

/// Number of sketch rows.
const DEPTH: usize = 4;

/// Default counter width when none is configured (~1M counters per row).
pub const DEFAULT_WIDTH: u64 = 1 << 20;

/// Lock-free Count-Min sketch.
#[derive(Debug)]
pub struct CmSketch {
    rows: [Box<[AtomicU32]>; DEPTH],
    seeds: [u64; DEPTH],
    mask: u64,
    width: u64,
}

impl CmSketch {
    /// Creates a sketch with at least `width` counters per row.
    ///
    /// Width is rounded up to a power of two; zero selects
    /// [`DEFAULT_WIDTH`].
    pub fn new(width: u64) -> Self {
        let width = if width == 0 { DEFAULT_WIDTH } else { width }.next_power_of_two();
        // Four 8-bit counters per u32 word.
        let words = (width as usize).div_ceil(4);
        let rows = std::array::from_fn(|_| {
            (0..words)
                .map(|_| AtomicU32::new(0))
                .collect::<Box<[AtomicU32]>>()
        });
        let seeds = std::array::from_fn(|row| splitmix64(0x6c62272e07bb0142 ^ (row as u64 + 1)));
        Self {
            rows,
            seeds,
            mask: width - 1,
            width,
        }
    }

    /// Counter count per row (after rounding).
    pub fn width(&self) -> u64 {
        self.width
    }

    #[inline]
    fn index(&self, hash: u64, row: usize) -> u64 {
        fmix64(hash ^ self.seeds[row]) & self.mask
    }

    /// Bumps the counter for `hash` in every row, saturating at 255.
    pub fn increment(&self, hash: u64) {
        for row in 0..DEPTH {
            let idx = self.index(hash, row);
            self.increment_at(row, idx);
        }
    }

    fn increment_at(&self, row: usize, idx: u64) {
        let word = &self.rows[row][(idx / 4) as usize];
        let shift = (idx % 4) * 8;
        let mut current = word.load(Ordering::Relaxed);
        loop {
            let counter = (current >> shift) & 0xff;
            if counter >= 255 {
                return;
            }
            let next = (current & !(0xff << shift)) | ((counter + 1) << shift);
            match word.compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    /// Estimated frequency of `hash`: the minimum counter across rows.
    pub fn estimate(&self, hash: u64) -> i64 {
        let mut min = 255u32;
        for row in 0..DEPTH {
            let idx = self.index(hash, row);
            let word = self.rows[row][(idx / 4) as usize].load(Ordering::Relaxed);
            let counter = (word >> ((idx % 4) * 8)) & 0xff;
            min = min.min(counter);
        }
        i64::from(min)
    }

    /// Ages the sketch: every counter is halved (shifted right one bit).
    pub fn reset(&self) {
        for row in &self.rows {
            for word in row.iter() {
                let mut current = word.load(Ordering::Relaxed);
                loop {
                    // Halve all four packed bytes in one shot: shift the word
                    // right and clear the bit that leaked in from the
                    // neighbouring byte.
                    let halved = (current >> 1) & 0x7f7f7f7f;
                    match word.compare_exchange_weak(
                        current,
                        halved,
                        Ordering::Relaxed,
                        Ordering::Relaxed,
                    ) {
                        Ok(_) => break,
                        Err(observed) => current = observed,
                    }
                }
            }
        }
    }

    /// Zeroes every counter.
    pub fn clear(&self) {
        for row in &self.rows {
            for word in row.iter() {
                word.store(0, Ordering::Relaxed);
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
