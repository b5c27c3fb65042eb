//! Clock abstractions used by the rate limiter, quota tracker, and cache.
//!
//! All time-based components read the clock through this trait so tests can
//! drive time explicitly instead of sleeping. The clock reports wall time as
//! a `Duration` since the Unix epoch because upstream quota windows reset at
//! epoch timestamps.

use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Clock abstraction so timing can be faked in tests.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current time as a duration since the Unix epoch.
    fn now(&self) -> Duration;

    /// Current time in whole seconds since the Unix epoch.
    fn now_epoch_secs(&self) -> u64 {
        self.now().as_secs()
    }
}

/// Production clock backed by `SystemTime::now()`.
///
/// Notes: subject to wall-clock adjustments; elapsed-time math in callers
/// saturates at zero rather than going negative if the clock steps backwards.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default()
    }
}

/// Test clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Duration>,
}

impl ManualClock {
    /// Start the clock at an arbitrary epoch offset.
    pub fn starting_at(now: Duration) -> Self {
        Self { now: Mutex::new(now) }
    }

    /// Advance the clock by `delta`.
    pub fn advance(&self, delta: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += delta;
    }

    /// Jump the clock to an absolute epoch offset.
    pub fn set(&self, now: Duration) {
        *self.now.lock().unwrap() = now;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        // Non-zero start so "no time has passed yet" is distinguishable from epoch zero.
        Self::starting_at(Duration::from_secs(1_700_000_000))
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock().unwrap()
    }
}
