//! Time-bounded result cache for read-mostly calls.
//!
//! Results are memoized under a namespace (the function identity, e.g.
//! `"list_issues"`) and a key derived from the normalized call arguments.
//! Each namespace is bounded to `max_entries` values with LRU eviction.
//!
//! Expiry is **coarse per-namespace, and wholesale**: a namespace gets one
//! deadline when its first entry lands, and the first access after that
//! deadline drops the whole namespace rather than pruning entries one by
//! one. A younger entry therefore expires with its namespace, not on its
//! own schedule. This mirrors per-function TTL memoization and is kept
//! deliberately; see `expiry_clears_whole_namespace` below before "fixing"
//! it.
//!
//! `invalidate` and `clear` are explicit escape hatches with no implicit
//! triggers. The store lock is never held across a producer await.

use crate::clock::{Clock, SystemClock};
use crate::error::ApiFailure;
use lru::LruCache;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct Namespace {
    // Fixed when the first entry lands; later inserts do not extend it.
    expires_at: Duration,
    entries: LruCache<String, Value>,
}

impl Namespace {
    fn fresh(expires_at: Duration, capacity: NonZeroUsize) -> Self {
        Self { expires_at, entries: LruCache::new(capacity) }
    }
}

/// Memoizing store for opaque JSON results.
pub struct ResultCache {
    clock: Arc<dyn Clock>,
    max_entries: NonZeroUsize,
    namespaces: Mutex<HashMap<String, Namespace>>,
}

impl ResultCache {
    /// `max_entries` bounds each namespace; zero is clamped to one.
    pub fn new(max_entries: usize) -> Self {
        Self::with_clock(max_entries, Arc::new(SystemClock))
    }

    pub fn with_clock(max_entries: usize, clock: Arc<dyn Clock>) -> Self {
        let max_entries = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self { clock, max_entries, namespaces: Mutex::new(HashMap::new()) }
    }

    /// Return the live cached value, or produce, store, and return it.
    ///
    /// Two concurrent misses for the same key may both invoke `producer`
    /// (the lock is released around the await); the later store wins. A
    /// producer failure is propagated and nothing is stored.
    pub async fn cached_call<F, Fut>(
        &self,
        namespace: &str,
        key: &str,
        ttl: Duration,
        producer: F,
    ) -> Result<Value, ApiFailure>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, ApiFailure>>,
    {
        if let Some(hit) = self.lookup(namespace, key) {
            return Ok(hit);
        }
        let value = producer().await?;
        self.store(namespace, key, ttl, value.clone());
        Ok(value)
    }

    /// Live value for `key`, refreshing its recency. Expired namespaces are
    /// dropped wholesale on first touch.
    pub fn lookup(&self, namespace: &str, key: &str) -> Option<Value> {
        let now = self.clock.now();
        let mut namespaces = self.namespaces.lock().unwrap();
        let ns = namespaces.get_mut(namespace)?;
        if now >= ns.expires_at {
            tracing::debug!(namespace, "cache namespace expired; dropping all entries");
            namespaces.remove(namespace);
            return None;
        }
        ns.entries.get(key).cloned()
    }

    /// Insert a value. The namespace deadline is set to `now + ttl` only
    /// when the namespace is empty or already past its deadline.
    pub fn store(&self, namespace: &str, key: &str, ttl: Duration, value: Value) {
        let now = self.clock.now();
        let capacity = self.max_entries;
        let mut namespaces = self.namespaces.lock().unwrap();
        let ns = namespaces
            .entry(namespace.to_string())
            .or_insert_with(|| Namespace::fresh(now + ttl, capacity));
        if now >= ns.expires_at {
            *ns = Namespace::fresh(now + ttl, capacity);
        }
        // At capacity this evicts the least-recently-used entry.
        ns.entries.push(key.to_string(), value);
    }

    /// Drop one entry.
    pub fn invalidate(&self, namespace: &str, key: &str) {
        let mut namespaces = self.namespaces.lock().unwrap();
        if let Some(ns) = namespaces.get_mut(namespace) {
            ns.entries.pop(key);
        }
    }

    /// Drop everything.
    pub fn clear(&self) {
        self.namespaces.lock().unwrap().clear();
    }

    /// Live entry count in one namespace (diagnostics/tests).
    pub fn len(&self, namespace: &str) -> usize {
        let now = self.clock.now();
        let namespaces = self.namespaces.lock().unwrap();
        namespaces
            .get(namespace)
            .filter(|ns| now < ns.expires_at)
            .map_or(0, |ns| ns.entries.len())
    }
}

/// Canonical cache key for an argument value: object keys are emitted in
/// sorted order at every level, so argument order never fragments the cache.
pub fn cache_key(args: &Value) -> String {
    let mut out = String::new();
    write_canonical(args, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            out.push('{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
