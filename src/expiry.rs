//! Expiration scheduling.
//!
//! One worker thread and one heap drive all TTL removals; there are no
//! per-entry timers. Sets with a TTL register a deadline; the worker sleeps
//! until the earliest deadline (or a fallback poll interval when idle), pops
//! everything due, and hands the batch to the sink, which performs the
//! store-side expiry check under the shard lock.
//!
//! ## Worker loop
//!
//! ```text
//!        ┌───────────────────────────────────────────────┐
//!        ▼                                               │
//!   compute delay to earliest deadline                   │
//!        │                                               │
//!        ├── due now ──► pop_due(now) ──► sink(keys) ────┤
//!        │                                               │
//!        └── not due ──► condvar wait:                   │
//!                          · timeout (delay or poll)  ───┤
//!                          · wake (earlier deadline)  ───┤
//!                          · stop                     ──► return
//! ```
//!
//! The scheduler never reports errors: a record naming a key that was
//! deleted or re-set with a later TTL is simply rejected by the store-side
//! check, so processing order does not matter. Clock skew over-sleep is
//! bounded by the fallback interval.

use std::hash::Hash;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::trace;

use crate::clock::CachedClock;
use crate::ds::DeadlineHeap;

/// Fallback wait when no deadlines are scheduled.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Stale heap entries tolerated per live key before a rebuild.
const REBUILD_FACTOR: usize = 8;

struct WorkerState<K> {
    heap: DeadlineHeap<K>,
    stopped: bool,
}

struct Shared<K> {
    state: Mutex<WorkerState<K>>,
    wake: Condvar,
    clock: Arc<CachedClock>,
    poll_interval: Duration,
}

/// Heap-based TTL scheduler with a single worker thread.
pub struct ExpirationScheduler<K> {
    shared: Arc<Shared<K>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<K> ExpirationScheduler<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    /// Starts the scheduler. `sink` receives batches of due keys and is
    /// expected to apply the store-side expiry check per key.
    pub fn start<F>(clock: Arc<CachedClock>, poll_interval: Duration, sink: F) -> Self
    where
        F: Fn(Vec<K>) + Send + 'static,
    {
        let poll_interval = if poll_interval.is_zero() {
            DEFAULT_POLL_INTERVAL
        } else {
            poll_interval
        };
        let shared = Arc::new(Shared {
            state: Mutex::new(WorkerState {
                heap: DeadlineHeap::new(),
                stopped: false,
            }),
            wake: Condvar::new(),
            clock,
            poll_interval,
        });

        let worker_shared = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name("lfukit-expiry".into())
            .spawn(move || Self::run(&worker_shared, sink))
            .expect("spawn expiry worker");

        Self {
            shared,
            worker: Mutex::new(Some(handle)),
        }
    }

    fn run<F>(shared: &Shared<K>, sink: F)
    where
        F: Fn(Vec<K>),
    {
        loop {
            let mut state = shared.state.lock();
            if state.stopped {
                return;
            }

            let now = shared.clock.now_nanos();
            let wait = match state.heap.earliest() {
                Some(deadline) if deadline <= now => {
                    let due = state.heap.pop_due(now);
                    state.heap.maybe_rebuild(REBUILD_FACTOR);
                    drop(state);
                    if !due.is_empty() {
                        trace!(count = due.len(), "processing due expirations");
                        sink(due);
                    }
                    continue;
                }
                Some(deadline) => {
                    Duration::from_nanos((deadline - now) as u64).min(shared.poll_interval)
                }
                None => shared.poll_interval,
            };

            // Wakes early when a new earliest deadline arrives or on stop;
            // spurious wakeups just recompute the delay.
            let _ = shared.wake.wait_for(&mut state, wait);
        }
    }

    /// Schedules `key` to expire `ttl` from now. Zero and negative-like
    /// durations are a no-op.
    pub fn schedule(&self, key: K, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        let deadline = self
            .shared
            .clock
            .now_nanos()
            .saturating_add(ttl.as_nanos().min(i64::MAX as u128) as i64);

        let mut state = self.shared.state.lock();
        let previous_earliest = state.heap.earliest();
        state.heap.schedule(key, deadline);
        // Only a new front-of-queue deadline moves the worker's wake time.
        if previous_earliest.map_or(true, |earliest| deadline < earliest) {
            self.shared.wake.notify_one();
        }
    }

    /// Drops the pending record for `key`, if any.
    pub fn unschedule(&self, key: &K) {
        self.shared.state.lock().heap.cancel(key);
    }

    /// Drops every pending record.
    pub fn truncate(&self) {
        self.shared.state.lock().heap.clear();
    }

    /// Number of pending expiration records.
    pub fn pending(&self) -> usize {
        self.shared.state.lock().heap.len()
    }
}

impl<K> ExpirationScheduler<K> {
    /// Stops and joins the worker. Idempotent.
    pub fn stop(&self) {
        {
            let mut state = self.shared.state.lock();
            state.stopped = true;
            self.shared.wake.notify_all();
        }
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

impl<K> Drop for ExpirationScheduler<K> {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.stopped = true;
            self.shared.wake.notify_all();
        }
        if let Some(handle) = self.worker.get_mut().take() {
            let _ = handle.join();
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
