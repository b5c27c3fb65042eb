//! Dual-layer admission gate for outgoing calls.
//!
//! Two independent layers sit in front of every remote call:
//! - [`ClientRateLimiter`]: local policy (burst bucket + rolling-hour
//!   ceiling) per client identity.
//! - [`UpstreamQuotaTracker`]: the remote service's own quota signal, fed
//!   back from response headers.
//!
//! [`RequestGate`] combines them: a call is admitted only when **both**
//! layers allow it, and a denial reports the larger of the two waits. The
//! gate returns decisions, never errors, and never sleeps; waiting (or
//! failing fast) is the caller's choice.
//!
//! # Architecture
//!
//! - **Logic**: `TokenBucket` (in `bucket`) handles the refill math;
//!   `ClientRateLimiter` and `UpstreamQuotaTracker` own the per-identity
//!   state behind map-scoped locks.
//! - **Middleware**: `GateLayer` (in `middleware`) enforces the gate in
//!   front of a tower service.

use crate::clock::Clock;
use crate::error::ThrottleScope;
use std::sync::Arc;
use std::time::Duration;

pub mod bucket;
pub mod limiter;
pub mod middleware;
pub mod quota;

pub use bucket::TokenBucket;
pub use limiter::{ClientRateLimiter, QuotaUsage, RateLimits};
pub use middleware::{GateLayer, GateService};
pub use quota::{QuotaObservation, UpstreamQuotaTracker};

/// The decision returned by a gate check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The call may proceed.
    Allowed {
        /// Calls left in the governing window, when the layer knows it.
        remaining: Option<u64>,
    },
    /// The call should not be made yet.
    Denied {
        /// How long the caller should wait before trying again.
        wait: Duration,
        /// Which layer denied.
        scope: ThrottleScope,
    },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }

    /// Denying layer, when denied.
    pub fn scope(&self) -> Option<ThrottleScope> {
        match self {
            Decision::Denied { scope, .. } => Some(*scope),
            Decision::Allowed { .. } => None,
        }
    }

    /// Suggested wait, when denied.
    pub fn wait(&self) -> Option<Duration> {
        match self {
            Decision::Denied { wait, .. } => Some(*wait),
            Decision::Allowed { .. } => None,
        }
    }
}

/// Combined local-policy + upstream-quota gate.
#[derive(Debug)]
pub struct RequestGate {
    limiter: ClientRateLimiter,
    quota: UpstreamQuotaTracker,
}

impl RequestGate {
    pub fn new(limits: RateLimits) -> Self {
        Self {
            limiter: ClientRateLimiter::new(limits),
            quota: UpstreamQuotaTracker::new(),
        }
    }

    pub fn with_clock(limits: RateLimits, clock: Arc<dyn Clock>) -> Self {
        Self {
            limiter: ClientRateLimiter::with_clock(limits, clock.clone()),
            quota: UpstreamQuotaTracker::with_clock(clock),
        }
    }

    /// Admit or deny one call for `client`.
    ///
    /// The upstream layer is consulted first; it is a pure read, and when it
    /// denies, the local layer is only probed (not charged), so an upstream
    /// denial never burns local burst capacity. When either layer denies,
    /// the reported wait is the maximum of both layers' waits.
    pub fn admit(&self, client: &str) -> Decision {
        if let Decision::Denied { wait: upstream_wait, scope } = self.quota.check_allowed(client) {
            let wait = match self.limiter.would_wait(client) {
                Some(local_wait) => local_wait.max(upstream_wait),
                None => upstream_wait,
            };
            return Decision::Denied { wait, scope };
        }
        self.limiter.check_and_record(client)
    }

    /// Feed a quota observation back from a response.
    pub fn record_response(&self, client: &str, observation: QuotaObservation) {
        self.quota.record(client, observation);
    }

    /// Parse and record the `ratelimit-*` header trio from a response.
    /// Returns whether a complete observation was present.
    pub fn record_response_headers<F>(&self, client: &str, lookup: F) -> bool
    where
        F: Fn(&str) -> Option<String>,
    {
        match QuotaObservation::from_headers(lookup) {
            Some(observation) => {
                self.quota.record(client, observation);
                true
            }
            None => false,
        }
    }

    /// Read-only local-quota projection for diagnostics.
    pub fn remaining_quota(&self, client: &str) -> QuotaUsage {
        self.limiter.remaining_quota(client)
    }

    /// Delete all tracked state for an identity, in both layers.
    pub fn reset(&self, client: &str) {
        self.limiter.reset(client);
        self.quota.reset(client);
    }

    pub fn limiter(&self) -> &ClientRateLimiter {
        &self.limiter
    }

    pub fn quota(&self) -> &UpstreamQuotaTracker {
        &self.quota
    }
}
