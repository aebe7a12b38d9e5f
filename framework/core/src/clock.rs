use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::shutdown::ShutdownHandle;

/// Longest a [Clock::sleep_unless_shutdown] goes without checking for an abort.
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Source of monotonic time and the only way virtual users are allowed to pause.
///
/// Every suspension point in a virtual user (startup jitter, pacing between requests, the pause at
/// the end of an iteration) goes through a clock so that tests can swap in a [ManualClock].
pub trait Clock: Debug + Send + Sync + 'static {
    /// Time elapsed since the clock was created. Never decreases.
    fn now(&self) -> Duration;

    /// Block the calling thread for `duration`.
    fn sleep(&self, duration: Duration);

    /// Like [Clock::sleep] but wakes up early once `shutdown` has been triggered.
    ///
    /// Returns `false` if the sleep was cut short.
    fn sleep_unless_shutdown(&self, duration: Duration, shutdown: &ShutdownHandle) -> bool {
        let deadline = self.now() + duration;
        loop {
            if shutdown.is_shutdown() {
                return false;
            }

            let now = self.now();
            if now >= deadline {
                return true;
            }
            self.sleep((deadline - now).min(SHUTDOWN_POLL_INTERVAL));
        }
    }
}

/// Wall clock backed by [Instant] and [std::thread::sleep].
#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

/// Clock for tests. Time only moves when something sleeps or calls [ManualClock::advance], and
/// sleeping returns immediately.
///
/// Every sleep is recorded so tests can assert on pacing.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_nanos: AtomicU64,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, duration: Duration) {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.now_nanos.fetch_add(nanos, Ordering::SeqCst);
    }

    /// All sleeps requested so far, in the order they were requested.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.now_nanos.load(Ordering::SeqCst))
    }

    fn sleep(&self, duration: Duration) {
        self.sleeps.lock().push(duration);
        self.advance(duration);
    }

    fn sleep_unless_shutdown(&self, duration: Duration, shutdown: &ShutdownHandle) -> bool {
        if shutdown.is_shutdown() {
            return false;
        }
        self.sleep(duration);
        true
    }
}
