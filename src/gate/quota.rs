//! Upstream quota tracking from response headers.
//!
//! The remote service reports its own rate-limit budget on every response.
//! This tracker keeps the most recent observation per client identity and
//! predicts whether the next call would be rejected, so the process stops
//! hammering an upstream that has already said no.
//!
//! Fail-open: no observation means no known constraint, and a reset time in
//! the past is treated as a rolled-over window until the next real response
//! corrects it.

use crate::clock::{Clock, SystemClock};
use crate::error::ThrottleScope;
use crate::gate::Decision;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One quota reading parsed from response headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaObservation {
    /// Total budget in the current upstream window.
    pub limit: u64,
    /// Calls left in the current upstream window.
    pub remaining: u64,
    /// Epoch second at which the upstream window resets.
    pub reset_epoch: u64,
}

impl QuotaObservation {
    /// Parse the conventional `ratelimit-*` trio via a caller-supplied
    /// header lookup (names are passed lowercase). Any missing or
    /// unparsable header yields `None`: partial data is no data.
    pub fn from_headers<F>(lookup: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let field = |name: &str| lookup(name)?.trim().parse::<u64>().ok();
        Some(Self {
            limit: field("ratelimit-limit")?,
            remaining: field("ratelimit-remaining")?,
            reset_epoch: field("ratelimit-reset")?,
        })
    }
}

/// Last-observed snapshot, stamped with when it was recorded.
#[derive(Debug, Clone, Copy)]
struct QuotaSnapshot {
    observation: QuotaObservation,
    observed_at: Duration,
}

/// Tracks the upstream's own quota signal per client identity.
#[derive(Debug)]
pub struct UpstreamQuotaTracker {
    clock: Arc<dyn Clock>,
    snapshots: Mutex<HashMap<String, QuotaSnapshot>>,
}

impl Default for UpstreamQuotaTracker {
    fn default() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }
}

impl UpstreamQuotaTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self { clock, snapshots: Mutex::new(HashMap::new()) }
    }

    /// Store a fresh observation, overwriting any prior snapshot wholesale.
    /// Stale snapshots are superseded, never merged.
    pub fn record(&self, client: &str, observation: QuotaObservation) {
        let snapshot = QuotaSnapshot { observation, observed_at: self.clock.now() };
        self.snapshots.lock().unwrap().insert(client.to_string(), snapshot);
        if observation.remaining == 0 {
            tracing::debug!(
                client,
                reset_epoch = observation.reset_epoch,
                "upstream reports quota exhausted"
            );
        }
    }

    /// Predict whether the upstream would accept the next call.
    pub fn check_allowed(&self, client: &str) -> Decision {
        let snapshots = self.snapshots.lock().unwrap();
        let Some(snapshot) = snapshots.get(client) else {
            // No data means no known constraint.
            return Decision::Allowed { remaining: None };
        };

        if snapshot.observation.remaining > 0 {
            return Decision::Allowed { remaining: Some(snapshot.observation.remaining) };
        }

        let now_secs = self.clock.now_epoch_secs();
        if snapshot.observation.reset_epoch > now_secs {
            let wait = Duration::from_secs(snapshot.observation.reset_epoch - now_secs);
            return Decision::Denied { wait, scope: ThrottleScope::Upstream };
        }

        // Reset time has passed: optimistically treat the window as rolled
        // over until the next real response arrives.
        Decision::Allowed { remaining: None }
    }

    /// Wait the upstream would impose right now, if any.
    pub fn would_wait(&self, client: &str) -> Option<Duration> {
        match self.check_allowed(client) {
            Decision::Denied { wait, .. } => Some(wait),
            Decision::Allowed { .. } => None,
        }
    }

    /// Most recent observation and when it was recorded, for diagnostics.
    pub fn last_observation(&self, client: &str) -> Option<(QuotaObservation, Duration)> {
        let snapshots = self.snapshots.lock().unwrap();
        snapshots.get(client).map(|s| (s.observation, s.observed_at))
    }

    /// Drop the snapshot for an identity.
    pub fn reset(&self, client: &str) {
        self.snapshots.lock().unwrap().remove(client);
    }
}
