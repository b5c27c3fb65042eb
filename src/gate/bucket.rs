//! Leaky token bucket, the per-client burst primitive.
//!
//! The bucket holds no lock and reads no clock of its own: the owner
//! ([`ClientRateLimiter`](crate::gate::ClientRateLimiter)) synchronizes
//! access and passes the current time in. Refill is lazy on access; there is
//! no background timer.

use std::time::Duration;

/// Capped, continuously-refilling count of permits.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    tokens: f64,
    last_refill: Duration,
}

impl TokenBucket {
    /// New bucket, full. `capacity` is clamped to at least 1 and the refill
    /// rate to a small positive floor so the bucket always drains forward.
    pub fn new(capacity: u32, refill_per_sec: f64, now: Duration) -> Self {
        let capacity = f64::from(capacity.max(1));
        Self {
            capacity,
            refill_per_sec: refill_per_sec.max(f64::MIN_POSITIVE),
            tokens: capacity,
            last_refill: now,
        }
    }

    fn refill(&mut self, now: Duration) {
        let elapsed = now.saturating_sub(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    /// Take `n` tokens if available. On failure the token count is left
    /// untouched (beyond the lazy refill).
    pub fn consume(&mut self, n: u32, now: Duration) -> bool {
        self.refill(now);
        let cost = f64::from(n);
        if self.tokens >= cost {
            self.tokens -= cost;
            true
        } else {
            false
        }
    }

    /// Time until one token will be available; zero if one already is.
    pub fn time_until_next(&mut self, now: Duration) -> Duration {
        self.refill(now);
        if self.tokens >= 1.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64((1.0 - self.tokens) / self.refill_per_sec)
        }
    }

    /// Current token count after lazy refill. Read-only in the sense that
    /// no tokens are consumed.
    pub fn available(&mut self, now: Duration) -> f64 {
        self.refill(now);
        self.tokens
    }
}
