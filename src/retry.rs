//! Retry executor for fallible async calls.
//!
//! Semantics:
//! - `max_retries` counts re-attempts after the initial call, so a policy
//!   with `max_retries = 3` invokes the operation at most 4 times.
//! - A failure classified [`FailureKind::RateLimited`] is terminal here no
//!   matter what the predicate says: waiting out quota is the gate's job,
//!   not blind retry's.
//! - `should_retry` decides whether any other failure is retryable; the
//!   default retries only [`FailureKind::TransientHttp`].
//! - Exhaustion re-raises the last underlying failure unchanged in kind.
//! - The backoff sleep happens only between attempts, never after the final
//!   one, and runs through the injected [`Sleeper`] so tests are instant.
//!
//! Invariants:
//! - The operation runs at most `max_retries + 1` times.
//! - No shared lock is held across the backoff sleep; the wait blocks only
//!   the calling task.
//!
//! Example
//! ```rust
//! use std::time::Duration;
//! use paceline::{ApiFailure, Backoff, RetryPolicy};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let policy = RetryPolicy::builder()
//!     .max_retries(2)
//!     .backoff(Backoff::exponential(Duration::from_millis(10)))
//!     .build();
//! let result: Result<u32, ApiFailure> =
//!     policy.execute(|| async { Ok(7) }).await;
//! assert_eq!(result.unwrap(), 7);
//! # });
//! ```

use crate::config::CoreConfig;
use crate::error::{ApiFailure, FailureKind};
use crate::{Backoff, Jitter, Sleeper, TokioSleeper};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Retry policy combining an attempt budget, backoff, jitter, classification
/// predicate, and sleeper.
#[derive(Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    backoff: Backoff,
    jitter: Jitter,
    should_retry: Arc<dyn Fn(&ApiFailure) -> bool + Send + Sync>,
    sleeper: Arc<dyn Sleeper>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("backoff", &self.backoff)
            .field("jitter", &self.jitter)
            .field("should_retry", &"<predicate>")
            .finish()
    }
}

impl RetryPolicy {
    /// Construct a builder with defaults.
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::new()
    }

    /// Build a policy from the configuration surface.
    pub fn from_config(config: &CoreConfig) -> Self {
        let backoff = Backoff::exponential(config.retry_delay_base)
            .with_factor(config.retry_backoff_factor)
            .unwrap_or_else(|_| Backoff::exponential(config.retry_delay_base))
            .with_max(config.max_retry_delay.max(config.retry_delay_base))
            .unwrap_or_else(|_| Backoff::exponential(config.retry_delay_base));
        Self::builder().max_retries(config.max_retries).backoff(backoff).build()
    }

    /// Execute an async operation, retrying per this policy.
    pub async fn execute<T, Fut, Op>(&self, mut operation: Op) -> Result<T, ApiFailure>
    where
        Fut: Future<Output = Result<T, ApiFailure>>,
        Op: FnMut() -> Fut,
    {
        let attempts = self.max_retries as usize + 1;
        let mut last_failure: Option<ApiFailure> = None;

        for attempt in 0..attempts {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(failure) => {
                    if failure.kind == FailureKind::RateLimited {
                        // Quota pressure is handled by the gate, not by retrying.
                        return Err(failure);
                    }
                    if !(self.should_retry)(&failure) {
                        return Err(failure);
                    }
                    if attempt + 1 >= attempts {
                        tracing::warn!(
                            attempts,
                            kind = %failure.kind,
                            "retry budget exhausted"
                        );
                        return Err(failure);
                    }

                    let delay = self.jitter.apply(self.backoff.delay(attempt + 1));
                    tracing::debug!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        kind = %failure.kind,
                        "transient failure, backing off"
                    );
                    last_failure = Some(failure);
                    self.sleeper.sleep(delay).await;
                }
            }
        }

        // The loop always returns: success, terminal failure, or exhaustion
        // on the last attempt. `last_failure` is only reachable defensively.
        Err(last_failure.unwrap_or_else(|| ApiFailure::unknown("retry loop exited without result")))
    }
}

/// Builder for [`RetryPolicy`].
pub struct RetryPolicyBuilder {
    max_retries: u32,
    backoff: Backoff,
    jitter: Jitter,
    should_retry: Arc<dyn Fn(&ApiFailure) -> bool + Send + Sync>,
    sleeper: Arc<dyn Sleeper>,
}

impl RetryPolicyBuilder {
    pub fn new() -> Self {
        Self {
            max_retries: 3,
            backoff: Backoff::exponential(Duration::from_secs(1)),
            jitter: Jitter::None,
            should_retry: Arc::new(ApiFailure::is_retryable),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Re-attempts after the initial call. Zero means a single attempt.
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Delay schedule between attempts.
    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Randomization applied to each delay.
    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// Predicate deciding whether a failure is retryable. Rate-limited
    /// failures stay terminal regardless.
    pub fn should_retry<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&ApiFailure) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Arc::new(predicate);
        self
    }

    /// Provide a custom sleeper implementation.
    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn build(self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff: self.backoff,
            jitter: self.jitter,
            should_retry: self.should_retry,
            sleeper: self.sleeper,
        }
    }
}

impl Default for RetryPolicyBuilder {
    fn default() -> Self {
        Self::new()
    }
}
