//! Per-client-identity throttling: burst bucket plus rolling-hour window.
//!
//! Each client identity owns a [`TokenBucket`] sized from the configured
//! burst and per-minute rate, and a time-ordered window of accepted-call
//! timestamps enforcing the hourly ceiling. Records are created lazily on
//! first use and reclaimed only by [`ClientRateLimiter::reset`]; old
//! timestamps are evicted on access, never by a background sweeper.
//!
//! The hourly ceiling is checked *before* a bucket token is consumed, so a
//! call the hour window will reject never burns burst capacity.

use crate::clock::{Clock, SystemClock};
use crate::dynamic::DynamicConfig;
use crate::error::ThrottleScope;
use crate::gate::bucket::TokenBucket;
use crate::gate::Decision;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Length of the sliding window backing the hourly ceiling.
pub const HOUR_WINDOW: Duration = Duration::from_secs(3600);

/// Hard cap on stored timestamps per client, bounding memory regardless of
/// the configured hourly limit.
const WINDOW_MAX_SAMPLES: usize = 1000;

/// Local throttling policy for one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimits {
    /// Sustained rate; refills the burst bucket at `requests_per_minute / 60`
    /// tokens per second.
    pub requests_per_minute: u32,
    /// Rolling-hour ceiling on accepted calls.
    pub requests_per_hour: u32,
    /// Burst bucket capacity.
    pub burst_size: u32,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self { requests_per_minute: 60, requests_per_hour: 600, burst_size: 10 }
    }
}

/// Read-only remaining-quota projection for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct QuotaUsage {
    pub minute_remaining: u32,
    pub hour_remaining: u32,
    pub burst_remaining: u32,
}

#[derive(Debug)]
struct ClientRecord {
    bucket: TokenBucket,
    // Accepted-call timestamps, oldest first, bounded to the trailing hour.
    window: VecDeque<Duration>,
}

impl ClientRecord {
    fn new(limits: &RateLimits, now: Duration) -> Self {
        let refill = f64::from(limits.requests_per_minute) / 60.0;
        Self {
            bucket: TokenBucket::new(limits.burst_size, refill, now),
            window: VecDeque::new(),
        }
    }

    fn prune(&mut self, now: Duration) {
        let horizon = now.saturating_sub(HOUR_WINDOW);
        while self.window.front().is_some_and(|&t| t <= horizon) {
            self.window.pop_front();
        }
    }

    fn record_accept(&mut self, now: Duration) {
        if self.window.len() == WINDOW_MAX_SAMPLES {
            self.window.pop_front();
        }
        self.window.push_back(now);
    }

    fn hourly_wait(&self, now: Duration) -> Duration {
        match self.window.front() {
            Some(&oldest) => HOUR_WINDOW.saturating_sub(now.saturating_sub(oldest)),
            None => Duration::ZERO,
        }
    }
}

/// Per-client throttling combining a burst bucket with an hourly window.
///
/// The client map sits behind a single mutex so lookups stay atomic with
/// insertion, eviction, and reset; every public method is non-blocking and
/// returns before any waiting would happen.
#[derive(Debug)]
pub struct ClientRateLimiter {
    limits: DynamicConfig<RateLimits>,
    clock: Arc<dyn Clock>,
    clients: Mutex<HashMap<String, ClientRecord>>,
}

impl ClientRateLimiter {
    pub fn new(limits: RateLimits) -> Self {
        Self::with_clock(limits, Arc::new(SystemClock))
    }

    pub fn with_clock(limits: RateLimits, clock: Arc<dyn Clock>) -> Self {
        Self {
            limits: DynamicConfig::new(limits),
            clock,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Handle for retuning limits at runtime. New limits apply immediately
    /// to hourly checks and to newly-seen identities; an existing identity's
    /// bucket geometry is rebuilt by [`reset`](Self::reset).
    pub fn limits(&self) -> DynamicConfig<RateLimits> {
        self.limits.clone()
    }

    /// Admit or deny one call for `client`, recording it if admitted.
    pub fn check_and_record(&self, client: &str) -> Decision {
        let limits = self.limits.get();
        let now = self.clock.now();
        let mut clients = self.clients.lock().unwrap();
        let record = clients
            .entry(client.to_string())
            .or_insert_with(|| ClientRecord::new(&limits, now));

        record.prune(now);

        // Hourly ceiling first: rejecting here must not consume burst.
        if record.window.len() >= limits.requests_per_hour as usize {
            let wait = record.hourly_wait(now);
            tracing::debug!(client, wait_secs = wait.as_secs(), "hourly ceiling reached");
            return Decision::Denied { wait, scope: ThrottleScope::LocalHourly };
        }

        if !record.bucket.consume(1, now) {
            let wait = record.bucket.time_until_next(now);
            tracing::debug!(client, wait_ms = wait.as_millis() as u64, "burst bucket empty");
            return Decision::Denied { wait, scope: ThrottleScope::LocalBurst };
        }

        record.record_accept(now);
        let hour_remaining =
            (limits.requests_per_hour as usize).saturating_sub(record.window.len()) as u64;
        Decision::Allowed { remaining: Some(hour_remaining) }
    }

    /// Remaining quota for diagnostics. Never consumes a token and never
    /// creates a record for an unseen identity.
    pub fn remaining_quota(&self, client: &str) -> QuotaUsage {
        let limits = self.limits.get();
        let now = self.clock.now();
        let mut clients = self.clients.lock().unwrap();

        let Some(record) = clients.get_mut(client) else {
            return QuotaUsage {
                minute_remaining: limits.requests_per_minute,
                hour_remaining: limits.requests_per_hour,
                burst_remaining: limits.burst_size,
            };
        };

        record.prune(now);
        let minute_horizon = now.saturating_sub(Duration::from_secs(60));
        let minute_used = record.window.iter().filter(|&&t| t > minute_horizon).count();
        QuotaUsage {
            minute_remaining: limits.requests_per_minute.saturating_sub(minute_used as u32),
            hour_remaining: limits
                .requests_per_hour
                .saturating_sub(record.window.len() as u32),
            burst_remaining: record.bucket.available(now).floor() as u32,
        }
    }

    /// Non-consuming probe: the wait this client would be told if it called
    /// [`check_and_record`](Self::check_and_record) right now, or `None` if
    /// the call would be admitted.
    pub fn would_wait(&self, client: &str) -> Option<Duration> {
        let limits = self.limits.get();
        let now = self.clock.now();
        let mut clients = self.clients.lock().unwrap();
        let record = clients.get_mut(client)?;

        record.prune(now);
        if record.window.len() >= limits.requests_per_hour as usize {
            return Some(record.hourly_wait(now));
        }
        if record.bucket.available(now) < 1.0 {
            return Some(record.bucket.time_until_next(now));
        }
        None
    }

    /// Delete all tracked state for an identity.
    pub fn reset(&self, client: &str) {
        self.clients.lock().unwrap().remove(client);
    }
}
