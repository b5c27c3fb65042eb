//! Convenient re-exports for common Paceline types.
pub use crate::{
    backoff::{Backoff, BackoffError, MAX_BACKOFF},
    batch::{
        BatchOptions, BatchOrchestrator, BatchOutcome, CancelFlag, Operation, OperationResult,
        OperationStatus, RollbackAction, RollbackRecord, RollbackStatus,
    },
    cache::{cache_key, ResultCache},
    config::{ConfigError, CoreConfig},
    error::{ApiFailure, ExecError, FailureKind, ThrottleScope},
    gate::{
        ClientRateLimiter, Decision, GateLayer, GateService, QuotaObservation, QuotaUsage,
        RateLimits, RequestGate, TokenBucket, UpstreamQuotaTracker,
    },
    pipeline::{CacheSlot, ExecutionPipeline},
    registry::{handler_fn, HandlerContext, InMemoryRegistry, OperationHandler, OperationRegistry},
    retry::{RetryPolicy, RetryPolicyBuilder},
    Clock, InstantSleeper, Jitter, ManualClock, Sleeper, SystemClock, TokioSleeper,
    TrackingSleeper,
};
