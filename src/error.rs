//! Failure taxonomy shared by the gate, retry executor, and orchestrator.
//!
//! Every failure raised by an operation handler carries a [`FailureKind`]
//! so the layers above can make policy decisions without string matching:
//! the retry executor retries only transient kinds, the gate owns waiting
//! out `RateLimited`, and the orchestrator records terminal-client kinds
//! as step-local results.

use std::time::Duration;

/// Classification of a failed remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    /// Retryable upstream failure (5xx, connection reset, decode error).
    TransientHttp,
    /// The addressed resource does not exist.
    NotFound,
    /// Authentication or authorization rejected the call.
    Forbidden,
    /// The upstream rejected the call for quota reasons. Never retried by
    /// the retry executor; waiting is the rate limiter's job.
    RateLimited,
    /// The request itself was malformed or semantically invalid.
    Validation,
    /// Anything that could not be classified.
    Unknown,
}

impl FailureKind {
    /// Whether the retry executor may re-attempt a failure of this kind.
    pub fn is_retryable(self) -> bool {
        matches!(self, FailureKind::TransientHttp)
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            FailureKind::TransientHttp => "transient-http",
            FailureKind::NotFound => "not-found",
            FailureKind::Forbidden => "forbidden",
            FailureKind::RateLimited => "rate-limited",
            FailureKind::Validation => "validation",
            FailureKind::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

/// A classified failure from the remote API or an operation handler.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ApiFailure {
    /// Failure class driving retry/throttle policy.
    pub kind: FailureKind,
    /// HTTP status code, when the failure came from a response.
    pub status: Option<u16>,
    /// Server-suggested wait, sourced from response headers.
    pub retry_after: Option<Duration>,
    /// Human-readable description.
    pub message: String,
}

impl ApiFailure {
    fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self { kind, status: None, retry_after: None, message: message.into() }
    }

    /// Retryable upstream failure.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(FailureKind::TransientHttp, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(FailureKind::NotFound, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Forbidden, message)
    }

    /// Quota rejection, with the server's wait hint if it sent one.
    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self { retry_after, ..Self::new(FailureKind::RateLimited, message) }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Validation, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Unknown, message)
    }

    /// Classify a failure from an HTTP status code.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let kind = match status {
            429 => FailureKind::RateLimited,
            404 => FailureKind::NotFound,
            401 | 403 => FailureKind::Forbidden,
            400 | 422 => FailureKind::Validation,
            s if s >= 500 => FailureKind::TransientHttp,
            _ => FailureKind::Unknown,
        };
        Self { status: Some(status), ..Self::new(kind, message) }
    }

    /// Attach the originating status code.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Whether the retry executor may re-attempt this failure.
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// Which throttling layer denied a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleScope {
    /// Local minute-bucket (burst) capacity exhausted.
    LocalBurst,
    /// Local rolling-hour ceiling reached.
    LocalHourly,
    /// The upstream service reported its quota as exhausted.
    Upstream,
}

impl std::fmt::Display for ThrottleScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ThrottleScope::LocalBurst => "local burst limit",
            ThrottleScope::LocalHourly => "local hourly limit",
            ThrottleScope::Upstream => "upstream quota",
        };
        f.write_str(label)
    }
}

/// Error surface of the execution pipeline and the gate middleware.
///
/// The gate itself returns decisions, never errors; only contracts that must
/// produce a `Result` convert a denial into `Throttled`, preserving the wait
/// hint so callers can wait, queue, or fail fast.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExecError {
    /// A throttling layer denied the call.
    #[error("throttled by {scope}; retry in {wait:?}")]
    Throttled {
        /// Layer that denied.
        scope: ThrottleScope,
        /// Suggested wait before the next attempt.
        wait: Duration,
    },
    /// The call itself failed (possibly after retries).
    #[error(transparent)]
    Api(#[from] ApiFailure),
}

impl ExecError {
    pub fn is_throttled(&self) -> bool {
        matches!(self, ExecError::Throttled { .. })
    }

    /// Suggested wait when throttled.
    pub fn wait_hint(&self) -> Option<Duration> {
        match self {
            ExecError::Throttled { wait, .. } => Some(*wait),
            ExecError::Api(failure) => failure.retry_after,
        }
    }

    /// Borrow the underlying API failure if present.
    pub fn as_api(&self) -> Option<&ApiFailure> {
        match self {
            ExecError::Api(failure) => Some(failure),
            _ => None,
        }
    }
}
