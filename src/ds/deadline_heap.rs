//! Lazy min-heap of expiration deadlines.
//!
//! The expiration worker needs three things cheaply: the earliest deadline,
//! all keys due at a given instant, and O(1) reschedule/cancel. Instead of a
//! slot-indexed heap with in-place repair, rescheduling pushes a fresh heap
//! entry and the `deadlines` map stays authoritative; pops skip entries whose
//! deadline no longer matches the map.
//!
//! ```text
//!   deadlines (authoritative)        heap (may hold stale entries)
//!   ┌─────────┬────────────┐
//!   │ "sess"  │ t+500ms    │        min: ("sess", t+200ms, stale)
//!   │ "token" │ t+60s      │             ("sess", t+500ms)
//!   └─────────┴────────────┘             ("token", t+60s)
//! ```
//!
//! Stale growth is bounded by [`maybe_rebuild`](DeadlineHeap::maybe_rebuild),
//! which reconstructs the heap from the map once it exceeds a multiple of the
//! live key count.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::hash::Hash;

use rustc_hash::FxHashMap;

#[derive(Debug)]
struct HeapSlot<K> {
    deadline: i64,
    seq: u64,
    key: K,
}

impl<K> PartialEq for HeapSlot<K> {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl<K> Eq for HeapSlot<K> {}

impl<K> PartialOrd for HeapSlot<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K> Ord for HeapSlot<K> {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.deadline.cmp(&other.deadline) {
            Ordering::Equal => self.seq.cmp(&other.seq),
            ordering => ordering,
        }
    }
}

/// Min-heap keyed by absolute deadline (Unix nanoseconds) with lazy deletion.
#[derive(Debug)]
pub struct DeadlineHeap<K> {
    deadlines: FxHashMap<K, i64>,
    heap: BinaryHeap<Reverse<HeapSlot<K>>>,
    seq: u64,
}

impl<K> DeadlineHeap<K>
where
    K: Eq + Hash + Clone,
{
    /// Creates an empty heap.
    pub fn new() -> Self {
        Self {
            deadlines: FxHashMap::default(),
            heap: BinaryHeap::new(),
            seq: 0,
        }
    }

    /// Number of live (scheduled, uncancelled) keys.
    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    /// Returns `true` when nothing is scheduled.
    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }

    /// Schedules or reschedules `key`, returning the previous deadline.
    pub fn schedule(&mut self, key: K, deadline: i64) -> Option<i64> {
        let previous = self.deadlines.insert(key.clone(), deadline);
        self.heap.push(Reverse(HeapSlot {
            deadline,
            seq: self.seq,
            key,
        }));
        self.seq = self.seq.wrapping_add(1);
        previous
    }

    /// Cancels `key`, returning its deadline if it was scheduled.
    ///
    /// The heap entry becomes stale and is skipped on a later pop.
    pub fn cancel(&mut self, key: &K) -> Option<i64> {
        self.deadlines.remove(key)
    }

    /// Earliest live deadline, discarding stale heap tops along the way.
    pub fn earliest(&mut self) -> Option<i64> {
        loop {
            let top = self.heap.peek()?;
            let Reverse(slot) = top;
            match self.deadlines.get(&slot.key) {
                Some(&deadline) if deadline == slot.deadline => return Some(deadline),
                _ => {
                    self.heap.pop();
                }
            }
        }
    }

    /// Pops every key whose deadline is `<= now`, removing it from tracking.
    pub fn pop_due(&mut self, now: i64) -> Vec<K> {
        let mut due = Vec::new();
        while let Some(Reverse(slot)) = self.heap.peek() {
            match self.deadlines.get(&slot.key) {
                Some(&deadline) if deadline == slot.deadline => {
                    if deadline > now {
                        break;
                    }
                    let Reverse(slot) = self.heap.pop().expect("peeked entry");
                    self.deadlines.remove(&slot.key);
                    due.push(slot.key);
                }
                _ => {
                    self.heap.pop();
                }
            }
        }
        due
    }

    /// Drops every scheduled deadline.
    pub fn clear(&mut self) {
        self.deadlines.clear();
        self.heap.clear();
    }

    /// Rebuilds the heap from the map when stale entries dominate.
    pub fn maybe_rebuild(&mut self, factor: usize) {
        let factor = factor.max(1);
        if self.heap.len() <= self.deadlines.len().saturating_mul(factor) {
            return;
        }
        self.heap.clear();
        let entries: Vec<(K, i64)> = self
            .deadlines
            .iter()
            .map(|(key, &deadline)| (key.clone(), deadline))
            .collect();
        for (key, deadline) in entries {
            self.heap.push(Reverse(HeapSlot {
                deadline,
                seq: self.seq,
                key,
            }));
            self.seq = self.seq.wrapping_add(1);
        }
    }
}

impl<K> Default for DeadlineHeap<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pop_due_returns_keys_in_deadline_order() {
        let mut heap = DeadlineHeap::new();
        heap.schedule("b", 20);
        heap.schedule("a", 10);
        heap.schedule("c", 30);

        assert_eq!(heap.pop_due(25), vec!["a", "b"]);
        assert_eq!(heap.len(), 1);
        assert_eq!(heap.earliest(), Some(30));
    }

    #[test]
    fn reschedule_supersedes_old_deadline() {
        let mut heap = DeadlineHeap::new();
        assert_eq!(heap.schedule("k", 10), None);
        assert_eq!(heap.schedule("k", 100), Some(10));

        // The t=10 heap entry is stale and must not fire.
        assert!(heap.pop_due(50).is_empty());
        assert_eq!(heap.earliest(), Some(100));
        assert_eq!(heap.pop_due(100), vec!["k"]);
        assert!(heap.is_empty());
    }

    #[test]
    fn cancel_prevents_expiry() {
        let mut heap = DeadlineHeap::new();
        heap.schedule("gone", 10);
        heap.schedule("kept", 20);
        assert_eq!(heap.cancel(&"gone"), Some(10));
        assert_eq!(heap.cancel(&"gone"), None);

        assert_eq!(heap.pop_due(100), vec!["kept"]);
    }

    #[test]
    fn earliest_skips_stale_tops() {
        let mut heap = DeadlineHeap::new();
        heap.schedule("a", 5);
        heap.schedule("a", 50);
        heap.schedule("b", 40);
        assert_eq!(heap.earliest(), Some(40));
    }

    #[test]
    fn clear_empties_everything() {
        let mut heap = DeadlineHeap::new();
        heap.schedule("a", 1);
        heap.schedule("b", 2);
        heap.clear();
        assert!(heap.is_empty());
        assert_eq!(heap.earliest(), None);
        assert!(heap.pop_due(i64::MAX).is_empty());
    }

    #[test]
    fn rebuild_drops_stale_entries() {
        let mut heap = DeadlineHeap::new();
        for deadline in [5, 4, 3, 2] {
            heap.schedule("churn", deadline);
        }
        heap.schedule("other", 10);
        assert!(heap.heap_len_for_tests() > heap.len());

        heap.maybe_rebuild(1);
        assert_eq!(heap.heap_len_for_tests(), heap.len());
        assert_eq!(heap.pop_due(10), vec!["churn", "other"]);
    }

    #[test]
    fn ties_pop_in_schedule_order() {
        let mut heap = DeadlineHeap::new();
        heap.schedule("first", 7);
        heap.schedule("second", 7);
        heap.schedule("third", 7);
        assert_eq!(heap.pop_due(7), vec!["first", "second", "third"]);
    }

    impl<K: Eq + Hash + Clone> DeadlineHeap<K> {
        fn heap_len_for_tests(&self) -> usize {
            self.heap.len()
        }
    }
}
