//! Backoff schedules for the retry executor.
//!
//! Attempt semantics: attempt index `0` is the initial call (no delay);
//! retries start at `attempt = 1`. Exponential growth is multiplicative by a
//! configurable factor and capped, so the schedule for base `b`, factor `f`,
//! cap `m` is `min(b * f^(n-1), m)` for retry `n`. All computations saturate
//! at a one-day hard ceiling rather than overflowing.
//!
//! Example
//! ```rust
//! use std::time::Duration;
//! use paceline::Backoff;
//!
//! let backoff = Backoff::exponential(Duration::from_secs(1))
//!     .with_factor(2.0)
//!     .unwrap()
//!     .with_max(Duration::from_secs(30))
//!     .unwrap();
//! assert_eq!(backoff.delay(0), Duration::ZERO); // initial call
//! assert_eq!(backoff.delay(1), Duration::from_secs(1));
//! assert_eq!(backoff.delay(2), Duration::from_secs(2));
//! assert_eq!(backoff.delay(3), Duration::from_secs(4));
//! assert_eq!(backoff.delay(10), Duration::from_secs(30)); // capped
//! ```

use std::fmt;
use std::time::Duration;

/// Hard ceiling applied when schedule math would overflow (1 day).
pub const MAX_BACKOFF: Duration = Duration::from_secs(24 * 60 * 60);

/// Errors returned by backoff configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BackoffError {
    #[error("with_factor is only valid for exponential backoff")]
    ConstantDoesNotSupportFactor,
    #[error("growth factor must be >= 1.0 (got {0})")]
    FactorBelowOne(f64),
    #[error("with_max is only valid for exponential backoff")]
    ConstantDoesNotSupportMax,
    #[error("max must be greater than zero")]
    MaxMustBePositive,
    #[error("max ({max:?}) must be >= base ({base:?})")]
    MaxLessThanBase { base: Duration, max: Duration },
}

#[derive(Debug, Clone, PartialEq)]
enum BackoffKind {
    Constant { delay: Duration },
    Exponential { base: Duration, factor: f64, max: Option<Duration> },
}

/// Delay schedule for retries.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    kind: BackoffKind,
}

impl Backoff {
    /// Same delay before every retry.
    pub fn constant(delay: Duration) -> Self {
        Self { kind: BackoffKind::Constant { delay } }
    }

    /// Multiplicative growth from `base`, factor 2.0 until overridden.
    pub fn exponential(base: Duration) -> Self {
        Self { kind: BackoffKind::Exponential { base, factor: 2.0, max: None } }
    }

    /// Override the growth factor. Must be >= 1.0.
    pub fn with_factor(mut self, factor: f64) -> Result<Self, BackoffError> {
        if !factor.is_finite() || factor < 1.0 {
            return Err(BackoffError::FactorBelowOne(factor));
        }
        match &mut self.kind {
            BackoffKind::Exponential { factor: existing, .. } => {
                *existing = factor;
                Ok(self)
            }
            BackoffKind::Constant { .. } => Err(BackoffError::ConstantDoesNotSupportFactor),
        }
    }

    /// Cap the delay. Must be positive and >= base.
    pub fn with_max(mut self, max: Duration) -> Result<Self, BackoffError> {
        if max.is_zero() {
            return Err(BackoffError::MaxMustBePositive);
        }
        match &mut self.kind {
            BackoffKind::Exponential { base, max: existing, .. } => {
                if max < *base {
                    return Err(BackoffError::MaxLessThanBase { base: *base, max });
                }
                *existing = Some(max);
                Ok(self)
            }
            BackoffKind::Constant { .. } => Err(BackoffError::ConstantDoesNotSupportMax),
        }
    }

    /// Delay before the given attempt (0 = initial call, no delay).
    pub fn delay(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        match &self.kind {
            BackoffKind::Constant { delay } => *delay,
            BackoffKind::Exponential { base, factor, max } => {
                let exponent = (attempt - 1).min(i32::MAX as usize) as i32;
                let multiplier = factor.powi(exponent);
                let secs = base.as_secs_f64() * multiplier;
                let raw = if secs.is_finite() && secs < MAX_BACKOFF.as_secs_f64() {
                    Duration::from_secs_f64(secs)
                } else {
                    MAX_BACKOFF
                };
                let capped = max.map(|m| raw.min(m)).unwrap_or(raw);
                capped.min(MAX_BACKOFF)
            }
        }
    }
}

impl fmt::Display for Backoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            BackoffKind::Constant { delay } => write!(f, "constant({:?})", delay),
            BackoffKind::Exponential { base, factor, max } => {
                write!(f, "exponential(base {:?}, x{}", base, factor)?;
                if let Some(max) = max {
                    write!(f, ", cap {:?}", max)?;
                }
                write!(f, ")")
            }
        }
    }
}
