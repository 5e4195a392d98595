//! Bounded lock-free MPSC ring buffer.
//!
//! Backs the write coalescer: many caller threads push pending set/delete
//! records, one consumer drains them into batches. Slots carry sequence
//! numbers (Vyukov's bounded queue) so producers and the consumer agree on
//! slot ownership without locks.
//!
//! ## Architecture
//!
//! ```text
//!            producers (CAS on tail)            consumer (CAS on head)
//!                 │                                    │
//!                 ▼                                    ▼
//!   ┌──────┬──────┬──────┬──────┬──────┬──────┬──────┬──────┐
//!   │ seq=8│ seq=1│ seq=2│ seq=3│ ...                       │  capacity 2^k
//!   └──────┴──────┴──────┴──────┴──────┴──────┴──────┴──────┘
//!      │
//!      └── slot.seq == tail      → slot free, producer may claim
//!          slot.seq == pos + 1   → slot filled, consumer may claim
//!          otherwise             → queue full / empty at this position
//! ```
//!
//! A push observing `seq < tail` reports the queue full instead of spinning;
//! backpressure handling (flush-and-retry) lives in the coalescer, not here.
//!
//! ## Ordering
//!
//! In a single-producer single-consumer run, pops observe pushes in FIFO
//! order. With multiple producers, per-producer order is preserved; the
//! interleaving between producers is whatever the tail CAS race yields.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counter padded to a cache line so head and tail do not false-share.
#[repr(align(64))]
#[derive(Debug)]
struct PaddedCounter(AtomicU64);

#[derive(Debug)]
struct Slot<T> {
    seq: AtomicU64,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// Bounded multi-producer single-consumer queue.
///
/// Capacity is rounded up to the next power of two (minimum 2). All methods
/// take `&self`; the structure is safe to share across threads as long as
/// only one thread pops at a time, which the coalescer guarantees by owning
/// the single consumer.
#[derive(Debug)]
pub struct MpscRing<T> {
    slots: Box<[Slot<T>]>,
    mask: u64,
    head: PaddedCounter,
    tail: PaddedCounter,
}

// Values move through UnsafeCell slots guarded by the seq protocol: a slot is
// written only by the producer that won the tail CAS and read only by the
// consumer that won the head CAS.
unsafe impl<T: Send> Send for MpscRing<T> {}
unsafe impl<T: Send> Sync for MpscRing<T> {}

impl<T> MpscRing<T> {
    /// Creates a ring with at least `capacity` slots.
    pub fn with_capacity(capacity: usize) -> Self {
        let cap = capacity.max(2).next_power_of_two();
        let slots: Box<[Slot<T>]> = (0..cap)
            .map(|i| Slot {
                seq: AtomicU64::new(i as u64),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect();
        Self {
            slots,
            mask: (cap - 1) as u64,
            head: PaddedCounter(AtomicU64::new(0)),
            tail: PaddedCounter(AtomicU64::new(0)),
        }
    }

    /// Attempts to enqueue `value`.
    ///
    /// Returns `Err(value)` when the ring is full so the caller can decide
    /// whether to flush, retry, or drop.
    pub fn push(&self, value: T) -> Result<(), T> {
        let mut tail = self.tail.0.load(Ordering::Relaxed);
        loop {
            let slot = &self.slots[(tail & self.mask) as usize];
            let seq = slot.seq.load(Ordering::Acquire);
            let dif = seq as i64 - tail as i64;
            if dif == 0 {
                match self.tail.0.compare_exchange_weak(
                    tail,
                    tail.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        unsafe { (*slot.value.get()).write(value) };
                        slot.seq.store(tail.wrapping_add(1), Ordering::Release);
                        return Ok(());
                    }
                    Err(current) => tail = current,
                }
            } else if dif < 0 {
                return Err(value);
            } else {
                tail = self.tail.0.load(Ordering::Relaxed);
            }
        }
    }

    /// Dequeues the oldest value, or `None` when the ring is empty.
    pub fn pop(&self) -> Option<T> {
        let mut head = self.head.0.load(Ordering::Relaxed);
        loop {
            let slot = &self.slots[(head & self.mask) as usize];
            let seq = slot.seq.load(Ordering::Acquire);
            let dif = seq as i64 - head.wrapping_add(1) as i64;
            if dif == 0 {
                match self.head.0.compare_exchange_weak(
                    head,
                    head.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        let value = unsafe { (*slot.value.get()).assume_init_read() };
                        slot.seq
                            .store(head.wrapping_add(self.slots.len() as u64), Ordering::Release);
                        return Some(value);
                    }
                    Err(current) => head = current,
                }
            } else if dif < 0 {
                return None;
            } else {
                head = self.head.0.load(Ordering::Relaxed);
            }
        }
    }

    /// Approximate number of queued items.
    ///
    /// Exact only when producers and the consumer are quiescent.
    pub fn len(&self) -> usize {
        let tail = self.tail.0.load(Ordering::Relaxed);
        let head = self.head.0.load(Ordering::Relaxed);
        tail.wrapping_sub(head) as usize
    }

    /// Returns `true` when no items are queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Slot count after power-of-two rounding.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

impl<T> Drop for MpscRing<T> {
    fn drop(&mut self) {
        // Drain undelivered values so their destructors run.
        while self.pop().is_some() {}
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn capacity_rounds_up_to_power_of_two() {
        let ring: MpscRing<u32> = MpscRing::with_capacity(100);
        assert_eq!(ring.capacity(), 128);
        let tiny: MpscRing<u32> = MpscRing::with_capacity(0);
        assert_eq!(tiny.capacity(), 2);
    }

    #[test]
    fn spsc_pops_in_fifo_order() {
        let ring = MpscRing::with_capacity(8);
        for i in 0..8 {
            ring.push(i).unwrap();
        }
        for i in 0..8 {
            assert_eq!(ring.pop(), Some(i));
        }
        assert_eq!(ring.pop(), None);
    }

    #[test]
    fn push_to_full_ring_returns_value() {
        let ring = MpscRing::with_capacity(4);
        for i in 0..4 {
            ring.push(i).unwrap();
        }
        assert_eq!(ring.push(99), Err(99));
        assert_eq!(ring.len(), 4);
    }

    #[test]
    fn ring_survives_wraparound() {
        let ring = MpscRing::with_capacity(4);
        for round in 0..100u64 {
            ring.push(round).unwrap();
            assert_eq!(ring.pop(), Some(round));
        }
        assert!(ring.is_empty());
    }

    #[test]
    fn interleaved_push_pop_keeps_order() {
        let ring = MpscRing::with_capacity(4);
        ring.push(1).unwrap();
        ring.push(2).unwrap();
        assert_eq!(ring.pop(), Some(1));
        ring.push(3).unwrap();
        ring.push(4).unwrap();
        ring.push(5).unwrap();
        assert_eq!(ring.pop(), Some(2));
        assert_eq!(ring.pop(), Some(3));
        assert_eq!(ring.pop(), Some(4));
        assert_eq!(ring.pop(), Some(5));
    }

    #[test]
    fn drop_releases_undelivered_values() {
        let marker = Arc::new(());
        {
            let ring = MpscRing::with_capacity(8);
            for _ in 0..5 {
                ring.push(Arc::clone(&marker)).unwrap();
            }
            assert_eq!(Arc::strong_count(&marker), 6);
        }
        assert_eq!(Arc::strong_count(&marker), 1);
    }

    #[test]
    fn concurrent_producers_deliver_every_item() {
        const PRODUCERS: usize = 4;
        const PER_PRODUCER: usize = 1_000;

        let ring = Arc::new(MpscRing::with_capacity(64));
        let mut handles = Vec::new();
        for p in 0..PRODUCERS {
            let ring = Arc::clone(&ring);
            handles.push(std::thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    let item = (p * PER_PRODUCER + i) as u64;
                    loop {
                        if ring.push(item).is_ok() {
                            break;
                        }
                        std::thread::yield_now();
                    }
                }
            }));
        }

        let consumer = {
            let ring = Arc::clone(&ring);
            std::thread::spawn(move || {
                let mut seen = Vec::with_capacity(PRODUCERS * PER_PRODUCER);
                while seen.len() < PRODUCERS * PER_PRODUCER {
                    match ring.pop() {
                        Some(item) => seen.push(item),
                        None => std::thread::yield_now(),
                    }
                }
                seen
            })
        };

        for handle in handles {
            handle.join().unwrap();
        }
        let mut seen = consumer.join().unwrap();
        seen.sort_unstable();
        let expected: Vec<u64> = (0..(PRODUCERS * PER_PRODUCER) as u64).collect();
        assert_eq!(seen, expected);
    }
}
