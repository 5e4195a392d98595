//! Cached monotonic clock.
//!
//! Expiration checks happen on every `get`, so the cache never asks the OS
//! for the time on a hot path. A single low-frequency ticker thread refreshes
//! an atomic holding Unix nanoseconds roughly every millisecond; readers do a
//! relaxed load. Staleness is bounded by the refresh period, which TTL
//! semantics tolerate (an entry may outlive its deadline by up to one tick).
//!
//! The ticker is instance-scoped: each [`CachedClock`] owns its refresher and
//! joins it on [`stop`](CachedClock::stop), so dropping a cache leaves no
//! stray threads behind.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

/// Default refresh period for the ticker thread.
const REFRESH_PERIOD: Duration = Duration::from_millis(1);

fn system_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

#[derive(Debug)]
struct ClockShared {
    nanos: AtomicI64,
    stopped: AtomicBool,
}

/// Process-time source refreshed by a background ticker.
///
/// `now_nanos()` is wait-free; the returned value may lag real time by up to
/// the refresh period and never decreases while the ticker runs.
#[derive(Debug)]
pub struct CachedClock {
    shared: Arc<ClockShared>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl CachedClock {
    /// Starts a clock with the default ~1ms refresh period.
    pub fn start() -> Self {
        Self::with_period(REFRESH_PERIOD)
    }

    /// Starts a clock refreshing every `period`.
    pub fn with_period(period: Duration) -> Self {
        let shared = Arc::new(ClockShared {
            nanos: AtomicI64::new(system_nanos()),
            stopped: AtomicBool::new(false),
        });

        let worker = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name("lfukit-clock".into())
            .spawn(move || {
                while !worker.stopped.load(Ordering::Acquire) {
                    worker.nanos.store(system_nanos(), Ordering::Release);
                    std::thread::sleep(period);
                }
            })
            .expect("spawn clock ticker");

        Self {
            shared,
            ticker: Mutex::new(Some(handle)),
        }
    }

    /// Returns the cached Unix time in nanoseconds.
    #[inline]
    pub fn now_nanos(&self) -> i64 {
        self.shared.nanos.load(Ordering::Acquire)
    }

    /// Stops and joins the ticker. Idempotent; `now_nanos` keeps returning
    /// the last refreshed value afterwards.
    pub fn stop(&self) {
        self.shared.stopped.store(true, Ordering::Release);
        if let Some(handle) = self.ticker.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CachedClock {
    fn drop(&mut self) {
        self.stop();
    }
}
