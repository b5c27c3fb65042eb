//! The execution pipeline: cache lookup → gate → retry → handler.
//!
//! [`ExecutionPipeline`] is the explicitly constructed context object that
//! replaces hidden module-level singletons: build one per process (or per
//! upstream), pass it to whatever makes remote calls, and every call flows
//! through the same fixed ordering:
//!
//! 1. **Cache**: a live cached result returns immediately and never touches
//!    the gate; cached reads cost no quota.
//! 2. **Gate**: local policy and upstream quota both have to admit the
//!    call; a denial surfaces as [`ExecError::Throttled`] with a wait hint.
//! 3. **Retry**: the operation runs under the retry policy; transient
//!    failures back off, terminal ones propagate unchanged.
//! 4. A fresh result is stored back into the cache slot, when one was
//!    given. Mutating calls simply pass `None`.

use crate::cache::ResultCache;
use crate::config::CoreConfig;
use crate::error::{ApiFailure, ExecError};
use crate::gate::{Decision, RateLimits, RequestGate};
use crate::retry::RetryPolicy;
use crate::Clock;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Where a cacheable call's result lives.
#[derive(Debug, Clone)]
pub struct CacheSlot {
    /// Function identity, e.g. `"list_issues"`.
    pub namespace: String,
    /// Normalized argument key within the namespace.
    pub key: String,
    pub ttl: Duration,
}

impl CacheSlot {
    pub fn new(namespace: impl Into<String>, key: impl Into<String>, ttl: Duration) -> Self {
        Self { namespace: namespace.into(), key: key.into(), ttl }
    }

    /// Slot keyed by the canonical form of `args`.
    pub fn for_args(namespace: impl Into<String>, args: &Value, ttl: Duration) -> Self {
        Self::new(namespace, crate::cache::cache_key(args), ttl)
    }
}

/// Explicit, shareable composition of gate, cache, and retry policy.
#[derive(Clone)]
pub struct ExecutionPipeline {
    gate: Arc<RequestGate>,
    cache: Arc<ResultCache>,
    retry: RetryPolicy,
}

impl ExecutionPipeline {
    pub fn new(gate: Arc<RequestGate>, cache: Arc<ResultCache>, retry: RetryPolicy) -> Self {
        Self { gate, cache, retry }
    }

    /// Wire the whole core from one configuration value.
    pub fn from_config(config: &CoreConfig) -> Self {
        Self::new(
            Arc::new(RequestGate::new(config.rate_limits())),
            Arc::new(ResultCache::new(config.cache_max_size)),
            RetryPolicy::from_config(config),
        )
    }

    /// Like [`from_config`](Self::from_config) with an injected clock, for
    /// deterministic tests.
    pub fn from_config_with_clock(config: &CoreConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(
            Arc::new(RequestGate::with_clock(config.rate_limits(), clock.clone())),
            Arc::new(ResultCache::with_clock(config.cache_max_size, clock)),
            RetryPolicy::from_config(config),
        )
    }

    /// Run one call through cache → gate → retry.
    pub async fn execute<F, Fut>(
        &self,
        client: &str,
        cache_slot: Option<CacheSlot>,
        operation: F,
    ) -> Result<Value, ExecError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Value, ApiFailure>>,
    {
        if let Some(slot) = &cache_slot {
            if let Some(hit) = self.cache.lookup(&slot.namespace, &slot.key) {
                tracing::debug!(namespace = %slot.namespace, "cache hit, skipping remote call");
                return Ok(hit);
            }
        }

        match self.gate.admit(client) {
            Decision::Allowed { .. } => {}
            Decision::Denied { wait, scope } => {
                return Err(ExecError::Throttled { scope, wait });
            }
        }

        let value = self.retry.execute(operation).await?;

        if let Some(slot) = &cache_slot {
            self.cache.store(&slot.namespace, &slot.key, slot.ttl, value.clone());
        }
        Ok(value)
    }

    pub fn gate(&self) -> &RequestGate {
        &self.gate
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Current rate limits handle (live-tunable).
    pub fn limits(&self) -> crate::dynamic::DynamicConfig<RateLimits> {
        self.gate.limiter().limits()
    }
}
