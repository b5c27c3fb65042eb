//! Jitter strategies for retry delays.
//!
//! When to use which strategy:
//! - `None`: deterministic delays; the default here because the execution
//!   core's callers often assert on exact schedules.
//! - `Full`: uniform in `[0, delay]`, spreads load when many workers retry
//!   against the same upstream.
//! - `Equal`: uniform in `[delay/2, delay]`, keeps a floor while adding
//!   randomness.
//!
//! Millisecond conversions saturate to `u64::MAX` to avoid panics on very
//! large durations. Deterministic RNGs can be injected via `apply_with_rng`.

use rand::{rng, Rng};
use std::time::Duration;

/// Randomization applied to each backoff delay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Jitter {
    /// Use the exact backoff delay.
    #[default]
    None,
    /// Random between 0 and the delay.
    Full,
    /// Random between half the delay and the delay.
    Equal,
}

impl Jitter {
    /// Apply jitter to a delay.
    pub fn apply(&self, delay: Duration) -> Duration {
        let mut rng = rng();
        self.apply_with_rng(delay, &mut rng)
    }

    /// Apply jitter with a caller-supplied RNG (for testing).
    pub fn apply_with_rng<R: Rng>(&self, delay: Duration, rng: &mut R) -> Duration {
        let millis: u64 = delay.as_millis().try_into().unwrap_or(u64::MAX);
        match self {
            Jitter::None => delay,
            Jitter::Full => {
                if millis == 0 {
                    return Duration::ZERO;
                }
                Duration::from_millis(rng.random_range(0..=millis))
            }
            Jitter::Equal => {
                if millis == 0 {
                    return Duration::ZERO;
                }
                Duration::from_millis(rng.random_range(millis / 2..=millis))
            }
        }
    }
}
