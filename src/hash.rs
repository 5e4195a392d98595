//! Key hashing for shard selection and the frequency sketch.
//!
//! Every key is reduced to a stable 64-bit hash that serves three masters:
//! the store uses the low bits to pick a shard, the policy feeds it through
//! per-row finalizers into the Count-Min sketch, and the radix tree stores it
//! alongside string keys. The hash must therefore be deterministic within a
//! cache instance and spread its low bits well.
//!
//! ## Architecture
//!
//! ```text
//!   Key ── std::hash::Hash ──► FnvHasher
//!                                 │
//!            byte slices ─────────┤  FNV-1a accumulation
//!            integer writes ──────┤  splitmix64 finalizer, combined
//!                                 ▼
//!                              u64 hash ──► hash & (shards-1)   (store)
//!                                      └──► fmix64(hash ^ seed) (sketch rows)
//! ```
//!
//! Strings hash as FNV-1a over their bytes; integer keys go through the
//! splitmix64 finalizer so sequential ids do not cluster into neighbouring
//! shards. A caller-supplied [`BuildHasher`] on the builder replaces
//! [`FnvBuildHasher`] wholesale.

use std::hash::{BuildHasher, Hasher};

const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

/// Finalizer from the splitmix64 generator.
///
/// Bijective, cheap, and strong enough to break up arithmetic key sequences.
#[inline]
pub fn splitmix64(mut x: u64) -> u64 {
    x ^= x >> 30;
    x = x.wrapping_mul(0xbf58476d1ce4e5b9);
    x ^= x >> 27;
    x = x.wrapping_mul(0x94d049bb133111eb);
    x ^= x >> 31;
    x
}

/// MurmurHash3 64-bit finalizer.
///
/// Used to derive per-row sketch indexes from a key hash and a row seed.
#[inline]
pub fn fmix64(mut h: u64) -> u64 {
    h ^= h >> 33;
    h = h.wrapping_mul(0xff51afd7ed558ccd);
    h ^= h >> 33;
    h = h.wrapping_mul(0xc4ceb9fe1a85ec53);
    h ^= h >> 33;
    h
}

/// Combines two hashes (boost-style `hash_combine`).
#[inline]
pub fn combine(h1: u64, h2: u64) -> u64 {
    h1 ^ h2
        .wrapping_add(0x9e3779b97f4a7c15)
        .wrapping_add(h1 << 12)
        .wrapping_add(h1 >> 4)
}

/// Streaming hasher: FNV-1a for bytes, splitmix64 for integer writes.
///
/// Deterministic across runs (no per-process seeding), which keeps shard
/// assignment and sketch indexes stable for a given key.
#[derive(Debug, Clone)]
pub struct FnvHasher {
    state: u64,
    written: bool,
}

impl FnvHasher {
    /// Creates a hasher in its initial state.
    #[inline]
    pub fn new() -> Self {
        Self {
            state: FNV_OFFSET,
            written: false,
        }
    }

    #[inline]
    fn mix_int(&mut self, v: u64) {
        let mixed = splitmix64(v);
        self.state = if self.written {
            combine(self.state, mixed)
        } else {
            mixed
        };
        self.written = true;
    }
}

impl Default for FnvHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl Hasher for FnvHasher {
    #[inline]
    fn finish(&self) -> u64 {
        self.state
    }

    #[inline]
    fn write(&mut self, bytes: &[u8]) {
        let mut h = if self.written { self.state } else { FNV_OFFSET };
        for &b in bytes {
            h ^= u64::from(b);
            h = h.wrapping_mul(FNV_PRIME);
        }
        self.state = h;
        self.written = true;
    }

    #[inline]
    fn write_u32(&mut self, i: u32) {
        self.mix_int(u64::from(i));
    }

    #[inline]
    fn write_u64(&mut self, i: u64) {
        self.mix_int(i);
    }

    #[inline]
    fn write_usize(&mut self, i: usize) {
        self.mix_int(i as u64);
    }

    #[inline]
    fn write_i32(&mut self, i: i32) {
        self.mix_int(i as u32 as u64);
    }

    #[inline]
    fn write_i64(&mut self, i: i64) {
        self.mix_int(i as u64);
    }

    #[inline]
    fn write_u128(&mut self, i: u128) {
        self.mix_int(i as u64);
        self.mix_int((i >> 64) as u64);
    }
}

/// Default [`BuildHasher`] for cache keys.
///
/// Stateless; every hasher it yields produces identical output for identical
/// input, unlike `RandomState`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FnvBuildHasher;

impl BuildHasher for FnvBuildHasher {
    type Hasher = FnvHasher;

    #[inline]
    fn build_hasher(&self) -> FnvHasher {
        FnvHasher::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::hash::BuildHasher;

    #[test]
    fn string_hash_is_deterministic() {
        let b = FnvBuildHasher;
        assert_eq!(b.hash_one("user:1:name"), b.hash_one("user:1:name"));
        assert_ne!(b.hash_one("user:1:name"), b.hash_one("user:2:name"));
    }

    #[test]
    fn integer_hash_uses_splitmix_finalizer() {
        // A raw u64 write must round-trip through splitmix64 exactly.
        let b = FnvBuildHasher;
        assert_eq!(b.hash_one(42u64), splitmix64(42));
        assert_eq!(b.hash_one(0u64), splitmix64(0));
    }

    #[test]
    fn sequential_integers_do_not_cluster_low_bits() {
        let b = FnvBuildHasher;
        let mask = 1023u64;
        let mut seen = std::collections::HashSet::new();
        for i in 0u64..512 {
            seen.insert(b.hash_one(i) & mask);
        }
        // With 1024 buckets and 512 sequential keys, a clustering hash
        // would reuse a handful of buckets; splitmix spreads them widely.
        assert!(seen.len() > 300, "low bits clustered: {} buckets", seen.len());
    }

    #[test]
    fn splitmix_is_bijective_on_samples() {
        let mut outputs = std::collections::HashSet::new();
        for i in 0u64..10_000 {
            outputs.insert(splitmix64(i));
        }
        assert_eq!(outputs.len(), 10_000);
    }

    #[test]
    fn fmix_spreads_seed_variations() {
        let h = FnvBuildHasher.hash_one("key");
        assert_ne!(fmix64(h ^ 1), fmix64(h ^ 2));
    }

    #[test]
    fn empty_bytes_hash_to_fnv_offset_basis() {
        let mut h = FnvHasher::new();
        h.write(&[]);
        assert_eq!(h.finish(), 0xcbf29ce484222325);
    }
}
