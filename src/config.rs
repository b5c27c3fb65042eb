//! Configuration surface for the execution core.
//!
//! Every knob has a documented default and is independently overridable
//! through a `PACELINE_*` environment variable, so a deployment can retune
//! one limit without restating the rest. Values are validated before the
//! core is wired up; a bad override is an error, not a silent fallback.

use crate::gate::RateLimits;
use std::time::Duration;

// Defaults, tuned for a typical per-user API quota.
const DEFAULT_REQUESTS_PER_MINUTE: u32 = 60;
const DEFAULT_REQUESTS_PER_HOUR: u32 = 600;
const DEFAULT_BURST_SIZE: u32 = 10;
const DEFAULT_CACHE_TTL_SHORT: Duration = Duration::from_secs(30);
const DEFAULT_CACHE_TTL_MEDIUM: Duration = Duration::from_secs(300);
const DEFAULT_CACHE_TTL_LONG: Duration = Duration::from_secs(1800);
const DEFAULT_CACHE_MAX_SIZE: usize = 1000;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_DELAY_BASE: Duration = Duration::from_secs(1);
const DEFAULT_RETRY_BACKOFF_FACTOR: f64 = 2.0;
const DEFAULT_MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Invalid configuration value.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} must be at least 1")]
    MustBePositive { field: &'static str },
    #[error("retry_backoff_factor must be a finite value >= 1.0 (got {0})")]
    BadBackoffFactor(f64),
    #[error("max_retry_delay ({max:?}) must be >= retry_delay_base ({base:?})")]
    RetryDelayInverted { base: Duration, max: Duration },
    #[error("{name}: cannot parse {value:?}")]
    UnparsableOverride { name: &'static str, value: String },
}

/// All tunables for the execution core.
#[derive(Debug, Clone, PartialEq)]
pub struct CoreConfig {
    /// Sustained local rate per client identity. Default 60.
    pub requests_per_minute: u32,
    /// Rolling-hour ceiling per client identity. Default 600.
    pub requests_per_hour: u32,
    /// Burst bucket capacity per client identity. Default 10.
    pub burst_size: u32,
    /// TTL for fast-moving read data. Default 30 s.
    pub cache_ttl_short: Duration,
    /// TTL for ordinary read data. Default 5 min.
    pub cache_ttl_medium: Duration,
    /// TTL for near-static read data. Default 30 min.
    pub cache_ttl_long: Duration,
    /// Entry bound per cache namespace. Default 1000.
    pub cache_max_size: usize,
    /// Re-attempts after the initial call. Default 3.
    pub max_retries: u32,
    /// First backoff delay. Default 1 s.
    pub retry_delay_base: Duration,
    /// Multiplicative backoff growth. Default 2.0.
    pub retry_backoff_factor: f64,
    /// Backoff cap. Default 30 s.
    pub max_retry_delay: Duration,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: DEFAULT_REQUESTS_PER_MINUTE,
            requests_per_hour: DEFAULT_REQUESTS_PER_HOUR,
            burst_size: DEFAULT_BURST_SIZE,
            cache_ttl_short: DEFAULT_CACHE_TTL_SHORT,
            cache_ttl_medium: DEFAULT_CACHE_TTL_MEDIUM,
            cache_ttl_long: DEFAULT_CACHE_TTL_LONG,
            cache_max_size: DEFAULT_CACHE_MAX_SIZE,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_base: DEFAULT_RETRY_DELAY_BASE,
            retry_backoff_factor: DEFAULT_RETRY_BACKOFF_FACTOR,
            max_retry_delay: DEFAULT_MAX_RETRY_DELAY,
        }
    }
}

impl CoreConfig {
    /// Defaults overridden by `PACELINE_*` process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overridden by whatever `lookup` returns; the testable form
    /// of [`from_env`](Self::from_env).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        override_u32(&lookup, "PACELINE_REQUESTS_PER_MINUTE", &mut config.requests_per_minute)?;
        override_u32(&lookup, "PACELINE_REQUESTS_PER_HOUR", &mut config.requests_per_hour)?;
        override_u32(&lookup, "PACELINE_BURST_SIZE", &mut config.burst_size)?;
        override_secs(&lookup, "PACELINE_CACHE_TTL_SHORT_SECS", &mut config.cache_ttl_short)?;
        override_secs(&lookup, "PACELINE_CACHE_TTL_MEDIUM_SECS", &mut config.cache_ttl_medium)?;
        override_secs(&lookup, "PACELINE_CACHE_TTL_LONG_SECS", &mut config.cache_ttl_long)?;
        override_usize(&lookup, "PACELINE_CACHE_MAX_SIZE", &mut config.cache_max_size)?;
        override_u32(&lookup, "PACELINE_MAX_RETRIES", &mut config.max_retries)?;
        override_millis(&lookup, "PACELINE_RETRY_DELAY_BASE_MS", &mut config.retry_delay_base)?;
        override_f64(&lookup, "PACELINE_RETRY_BACKOFF_FACTOR", &mut config.retry_backoff_factor)?;
        override_millis(&lookup, "PACELINE_MAX_RETRY_DELAY_MS", &mut config.max_retry_delay)?;

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("requests_per_minute", self.requests_per_minute as usize),
            ("requests_per_hour", self.requests_per_hour as usize),
            ("burst_size", self.burst_size as usize),
            ("cache_max_size", self.cache_max_size),
        ] {
            if value == 0 {
                return Err(ConfigError::MustBePositive { field });
            }
        }
        if !self.retry_backoff_factor.is_finite() || self.retry_backoff_factor < 1.0 {
            return Err(ConfigError::BadBackoffFactor(self.retry_backoff_factor));
        }
        if self.max_retry_delay < self.retry_delay_base {
            return Err(ConfigError::RetryDelayInverted {
                base: self.retry_delay_base,
                max: self.max_retry_delay,
            });
        }
        Ok(())
    }

    /// The gate-facing slice of this configuration.
    pub fn rate_limits(&self) -> RateLimits {
        RateLimits {
            requests_per_minute: self.requests_per_minute,
            requests_per_hour: self.requests_per_hour,
            burst_size: self.burst_size,
        }
    }
}

fn raw<F>(lookup: &F, name: &'static str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn override_u32<F>(lookup: &F, name: &'static str, slot: &mut u32) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = raw(lookup, name) {
        *slot = value
            .parse()
            .map_err(|_| ConfigError::UnparsableOverride { name, value })?;
    }
    Ok(())
}

fn override_usize<F>(lookup: &F, name: &'static str, slot: &mut usize) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = raw(lookup, name) {
        *slot = value
            .parse()
            .map_err(|_| ConfigError::UnparsableOverride { name, value })?;
    }
    Ok(())
}

fn override_f64<F>(lookup: &F, name: &'static str, slot: &mut f64) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = raw(lookup, name) {
        *slot = value
            .parse()
            .map_err(|_| ConfigError::UnparsableOverride { name, value })?;
    }
    Ok(())
}

fn override_secs<F>(lookup: &F, name: &'static str, slot: &mut Duration) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = raw(lookup, name) {
        let secs: u64 = value
            .parse()
            .map_err(|_| ConfigError::UnparsableOverride { name, value })?;
        *slot = Duration::from_secs(secs);
    }
    Ok(())
}

fn override_millis<F>(
    lookup: &F,
    name: &'static str,
    slot: &mut Duration,
) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = raw(lookup, name) {
        let millis: u64 = value
            .parse()
            .map_err(|_| ConfigError::UnparsableOverride { name, value })?;
        *slot = Duration::from_millis(millis);
    }
    Ok(())
}
