//! Write coalescing.
//!
//! Buffered sets and deletes land in the MPSC ring; a single consumer thread
//! drains them into batches and hands each batch to the applier (the cache's
//! internal apply path). Batches close when they reach the configured size,
//! when the flush timer elapses, or when a caller requests a flush.
//!
//! ## Backpressure
//!
//! A push into a full ring requests a flush and spins briefly (≤100
//! attempts) for space. If the ring is still full, the push fails and the
//! caller's set/delete reports "not stored": the writer outran the applier
//! and must either retry or run unbuffered.
//!
//! ## The wait barrier
//!
//! [`wait`](WriteCoalescer::wait) blocks until the consumer completes a
//! drain-to-empty cycle that began after the call, so every write pushed
//! before `wait` is applied when it returns. Flush requests carry a
//! generation: each request bumps `requested`, the consumer captures
//! `requested` under the signal mutex *before* it starts draining and
//! publishes the captured value as `served` only *after* the drain runs the
//! ring empty. A waiter therefore cannot be released by a drain that was
//! already in flight when it asked; only a cycle whose capture observed the
//! waiter's generation (and hence started after its pushes landed) can
//! satisfy it.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::ds::MpscRing;

/// Spin budget for a push into a full ring.
const PUSH_RETRY_BUDGET: usize = 100;

struct Signal {
    stopped: bool,
    /// Flush-request generation. Bumped by every flush request, including
    /// the implicit ones from `push`.
    requested: u64,
    /// Highest generation known to be fully applied: the consumer captures
    /// `requested` before a drain and stores the captured value here after
    /// the drain ran the ring empty.
    served: u64,
}

struct Shared<T> {
    ring: MpscRing<T>,
    signal: Mutex<Signal>,
    wake: Condvar,
    batch_size: usize,
}

/// Batches ring traffic into an applier on a dedicated consumer thread.
pub struct WriteCoalescer<T> {
    shared: Arc<Shared<T>>,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Send + 'static> WriteCoalescer<T> {
    /// Starts a coalescer.
    ///
    /// `capacity` is the ring size (rounded up to a power of two),
    /// `batch_size` the largest batch handed to `applier`, `flush_interval`
    /// the idle flush timer.
    pub fn start<F>(
        capacity: usize,
        batch_size: usize,
        flush_interval: Duration,
        applier: F,
    ) -> Self
    where
        F: Fn(Vec<T>) + Send + 'static,
    {
        let shared = Arc::new(Shared {
            ring: MpscRing::with_capacity(capacity),
            signal: Mutex::new(Signal {
                stopped: false,
                requested: 0,
                served: 0,
            }),
            wake: Condvar::new(),
            batch_size: batch_size.max(1),
        });

        let consumer_shared = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name("lfukit-writer".into())
            .spawn(move || Self::run(&consumer_shared, flush_interval, applier))
            .expect("spawn coalescer consumer");

        Self {
            shared,
            consumer: Mutex::new(Some(handle)),
        }
    }

    fn run<F>(shared: &Shared<T>, flush_interval: Duration, applier: F)
    where
        F: Fn(Vec<T>),
    {
        loop {
            // Capture the request generation before draining; a drain can
            // only be credited for requests it observed at this point.
            let (stopping, serving) = {
                let mut signal = shared.signal.lock();
                while signal.served == signal.requested && !signal.stopped {
                    if shared.wake.wait_for(&mut signal, flush_interval).timed_out() {
                        break;
                    }
                }
                (signal.stopped, signal.requested)
            };

            Self::drain_to_empty(shared, &applier);

            {
                let mut signal = shared.signal.lock();
                if serving > signal.served {
                    signal.served = serving;
                }
                shared.wake.notify_all();
            }

            if stopping {
                debug!("coalescer consumer stopped");
                return;
            }
        }
    }

    fn drain_to_empty<F>(shared: &Shared<T>, applier: &F)
    where
        F: Fn(Vec<T>),
    {
        loop {
            let mut batch = Vec::with_capacity(shared.batch_size);
            while batch.len() < shared.batch_size {
                match shared.ring.pop() {
                    Some(item) => batch.push(item),
                    None => break,
                }
            }
            if batch.is_empty() {
                return;
            }
            trace!(len = batch.len(), "applying write batch");
            applier(batch);
        }
    }
}

impl<T> WriteCoalescer<T> {
    /// Enqueues `item` for the consumer.
    ///
    /// Returns `false` when the ring stayed full through the retry budget;
    /// the item is dropped and the caller should report "not stored".
    pub fn push(&self, item: T) -> bool {
        let mut item = match self.shared.ring.push(item) {
            Ok(()) => {
                if self.shared.ring.len() >= self.shared.batch_size {
                    self.request_flush();
                }
                return true;
            }
            Err(item) => item,
        };

        self.request_flush();
        for _ in 0..PUSH_RETRY_BUDGET {
            match self.shared.ring.push(item) {
                Ok(()) => return true,
                Err(rejected) => item = rejected,
            }
            std::hint::spin_loop();
        }
        false
    }

    /// Opens a new flush generation and wakes the consumer.
    fn request_flush(&self) {
        let mut signal = self.shared.signal.lock();
        signal.requested += 1;
        self.shared.wake.notify_all();
    }

    /// Requests an asynchronous flush and returns immediately.
    pub fn flush(&self) {
        self.request_flush();
    }

    /// Blocks until everything pushed before this call has been applied.
    pub fn wait(&self) {
        let mut signal = self.shared.signal.lock();
        signal.requested += 1;
        let target = signal.requested;
        self.shared.wake.notify_all();
        // served reaches target only via a drain whose capture saw this
        // generation, i.e. one that started after our pushes were in the
        // ring. A drain already in flight publishes an older generation and
        // leaves us waiting.
        while signal.served < target && !signal.stopped {
            self.shared.wake.wait(&mut signal);
        }
    }

    /// Pending item count (approximate).
    pub fn pending(&self) -> usize {
        self.shared.ring.len()
    }

    /// Stops the consumer, draining the ring once more. Idempotent.
    pub fn close(&self) {
        {
            let mut signal = self.shared.signal.lock();
            signal.stopped = true;
            self.shared.wake.notify_all();
        }
        if let Some(handle) = self.consumer.lock().take() {
            let _ = handle.join();
        }
    }
}

impl<T> Drop for WriteCoalescer<T> {
    fn drop(&mut self) {
        {
            let mut signal = self.shared.signal.lock();
            signal.stopped = true;
            self.shared.wake.notify_all();
        }
        if let Some(handle) = self.consumer.get_mut().take() {
            let _ = handle.join();
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
