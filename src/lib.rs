#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # Paceline
//!
//! A resilient execution core for talking to unreliable, rate-limited
//! remote APIs: calls become safe to retry, cheap to repeat, and safe to
//! compose into multi-step transactions.
//!
//! ## Features
//!
//! - **Dual-layer gating**: a local token-bucket + rolling-hour limiter per
//!   client identity, combined with the upstream's own quota headers
//! - **Result caching** with per-namespace TTLs and LRU bounds
//! - **Retry with exponential backoff**, classified failures, and a hard
//!   "never retry rate-limited" rule
//! - **Batch orchestration**: named steps, `{{name.field}}` references,
//!   and best-effort reverse-order rollback
//! - **Deterministic tests** via injected clocks and sleepers
//!
//! ## Quick Start
//!
//! ```rust
//! use paceline::{CacheSlot, CoreConfig, ExecutionPipeline};
//! use serde_json::json;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = CoreConfig::default();
//!     let pipeline = ExecutionPipeline::from_config(&config);
//!
//!     let slot = CacheSlot::for_args("list_issues", &json!({"state": "opened"}),
//!         config.cache_ttl_medium);
//!     let result = pipeline
//!         .execute("user-1", Some(slot), || async {
//!             // Your remote call here, classified as an ApiFailure on error.
//!             Ok(json!([{"iid": 1}]))
//!         })
//!         .await;
//!     assert!(result.is_ok());
//! }
//! ```

pub mod backoff;
pub mod batch;
pub mod cache;
pub mod clock;
pub mod config;
pub mod dynamic;
pub mod error;
pub mod gate;
pub mod jitter;
pub mod pipeline;
pub mod prelude;
pub mod registry;
pub mod retry;
pub mod sleeper;

// Re-exports
pub use backoff::Backoff;
pub use batch::{
    BatchOptions, BatchOrchestrator, BatchOutcome, CancelFlag, Operation, OperationResult,
    OperationStatus, RollbackAction,
};
pub use cache::ResultCache;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, CoreConfig};
pub use error::{ApiFailure, ExecError, FailureKind, ThrottleScope};
pub use gate::{
    ClientRateLimiter, Decision, GateLayer, QuotaObservation, RateLimits, RequestGate,
    TokenBucket, UpstreamQuotaTracker,
};
pub use jitter::Jitter;
pub use pipeline::{CacheSlot, ExecutionPipeline};
pub use registry::{HandlerContext, InMemoryRegistry, OperationHandler, OperationRegistry};
pub use retry::{RetryPolicy, RetryPolicyBuilder};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
