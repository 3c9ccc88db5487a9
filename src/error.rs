//! Crate-wide error type and the upstream-failure classification used
//! throughout the pipeline (see spec §7 "Error Handling Design").

use thiserror::Error;

/// Top-level error type returned by the pipeline's public operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("idempotency store error: {0}")]
    Store(String),

    #[error("submission pool rejected task: queue full or pool stopping")]
    SubmissionRejected,

    #[error("concurrency limiter timed out: {0}")]
    TimeoutAcquire(#[from] TimeoutAcquire),

    #[error("upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Why an [`crate::limiter::AtomicLimiter::acquire`] call failed.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum TimeoutAcquire {
    /// The caller's cancellation token fired before a permit was available.
    #[error("acquire cancelled")]
    Cancelled,
    /// The acquire deadline elapsed before a permit was available.
    #[error("acquire deadline exceeded")]
    Deadline,
}

/// Tagged classification of an upstream (analytics or downstream HTTP)
/// failure. Typed construction is preferred; [`UpstreamError::classify`]
/// is the substring-matching fallback for wrapping a generic error
/// whose origin doesn't give us a status code or error kind directly.
#[derive(Debug, Error, Clone)]
pub enum UpstreamError {
    /// Retryable: 429/500/503, timeouts, connection resets, DNS failures.
    #[error("transient upstream failure: {reason}")]
    Transient { reason: String },
    /// 4xx other than 429. Treated the same as transient for retry
    /// purposes (spec §7); kept distinct for logging/metrics.
    #[error("permanent upstream failure: status {status}")]
    Permanent { status: u16 },
    /// Local extraction/parse failure (malformed sitemap, IO error).
    #[error("local failure: {reason}")]
    Local { reason: String },
}

impl UpstreamError {
    /// Classify an opaque error by substring match on its display text.
    /// Used only when the originating client can't give us a typed
    /// status/kind directly (spec §7: "substring fallback").
    #[must_use]
    pub fn classify(err: &(dyn std::error::Error + 'static)) -> Self {
        let msg = err.to_string().to_lowercase();
        if msg.contains("429") || msg.contains("too many requests") || msg.contains("rate limit") {
            return Self::Transient {
                reason: "rate limited".to_string(),
            };
        }
        if msg.contains("500")
            || msg.contains("503")
            || msg.contains("timeout")
            || msg.contains("timed out")
            || msg.contains("connection refused")
            || msg.contains("connection reset")
            || msg.contains("no such host")
            || msg.contains("dns")
        {
            return Self::Transient { reason: msg };
        }
        Self::Local { reason: msg }
    }

    /// Whether the pipeline should treat this as retryable (spec §7:
    /// transient and permanent are both routed to the failed-keyword
    /// table; only local parse/IO failures are not).
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::Local { .. })
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
