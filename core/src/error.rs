//! Closed error taxonomy for the provider transport, plus the retry policy that consumes it.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Closed set of transport-level failure kinds. Each maps to `retryable()` per spec, independent
/// of any particular provider's status-code table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Authentication,
    AccessDenied,
    NotFound,
    InvalidRequest,
    RateLimit,
    ContextLength,
    QuotaExceeded,
    ContentFilter,
    ServerError,
    RequestTimeout,
    Abort,
    NetworkError,
    StreamError,
    InvalidToolCall,
    NoObjectGenerated,
    Configuration,
}

impl ErrorKind {
    pub fn retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimit
                | ErrorKind::ServerError
                | ErrorKind::RequestTimeout
                | ErrorKind::NetworkError
                | ErrorKind::StreamError
        )
    }
}

/// A transport-layer error, carrying enough provider context to log and to drive retry.
#[derive(Debug, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct TransportError {
    pub kind: ErrorKind,
    pub message: String,
    pub provider: Option<String>,
    pub status_code: Option<u16>,
    pub error_code: Option<String>,
    /// Server-supplied retry-after hint, in seconds.
    pub retry_after: Option<f64>,
    pub raw: Option<Value>,
}

impl TransportError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            provider: None,
            status_code: None,
            error_code: None,
            retry_after: None,
            raw: None,
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }

    pub fn with_retry_after(mut self, seconds: f64) -> Self {
        self.retry_after = Some(seconds);
        self
    }

    pub fn retryable(&self) -> bool {
        self.kind.retryable()
    }

    /// Maps an HTTP status code (plus optional hint strings from the body) to an `ErrorKind`,
    /// per the transport triggers table.
    pub fn kind_for_status(status: u16, is_context_length_hint: bool, is_quota_hint: bool, is_content_filter_hint: bool) -> ErrorKind {
        match status {
            401 => ErrorKind::Authentication,
            403 => ErrorKind::AccessDenied,
            404 => ErrorKind::NotFound,
            400 | 422 => {
                if is_context_length_hint {
                    ErrorKind::ContextLength
                } else if is_content_filter_hint {
                    ErrorKind::ContentFilter
                } else {
                    ErrorKind::InvalidRequest
                }
            }
            402 => ErrorKind::QuotaExceeded,
            429 => {
                if is_quota_hint {
                    ErrorKind::QuotaExceeded
                } else {
                    ErrorKind::RateLimit
                }
            }
            500..=599 => ErrorKind::ServerError,
            _ => ErrorKind::ServerError,
        }
    }
}

/// Retry/backoff policy: exponential backoff with jitter, honoring a `retry_after` hint.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1_000),
            multiplier: 2.0,
            max_delay: Duration::from_millis(60_000),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(cfg: &config::RetryDefaults) -> Self {
        Self {
            max_retries: cfg.max_retries,
            base_delay: Duration::from_millis(cfg.base_delay_ms),
            multiplier: cfg.multiplier,
            max_delay: Duration::from_millis(cfg.max_delay_ms),
            jitter: cfg.jitter,
        }
    }

    /// Computes the delay for `attempt` (0-indexed), preferring the error's `retry_after` hint
    /// when present and not longer than `max_delay`. Returns `Err` (meaning: rethrow, don't
    /// sleep) when the hint exceeds `max_delay` — never silently swallow a long wait.
    fn delay_for(&self, attempt: u32, retry_after: Option<f64>) -> Result<Duration, ()> {
        if let Some(secs) = retry_after {
            let hinted = Duration::from_secs_f64(secs.max(0.0));
            return if hinted <= self.max_delay { Ok(hinted) } else { Err(()) };
        }
        let exp = self.multiplier.powi(attempt as i32);
        let base_ms = self.base_delay.as_secs_f64() * 1000.0 * exp;
        let capped_ms = base_ms.min(self.max_delay.as_secs_f64() * 1000.0);
        let jittered_ms = if self.jitter {
            let factor = 1.0 + (rand::random::<f64>() - 0.5); // ±50%
            (capped_ms * factor).max(0.0)
        } else {
            capped_ms
        };
        Ok(Duration::from_secs_f64(jittered_ms / 1000.0))
    }
}

/// Runs `f` up to `1 + max_retries` times, sleeping between attempts per the backoff policy.
/// Never sleeps for a non-retryable error, and never sleeps when the hinted `retry_after` would
/// exceed `max_delay` — both cases rethrow immediately.
pub async fn retry<F, Fut, T>(policy: &RetryPolicy, mut f: F) -> Result<T, TransportError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, TransportError>>,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(err) if err.retryable() && attempt < policy.max_retries => {
                match policy.delay_for(attempt, err.retry_after) {
                    Ok(delay) => {
                        tracing::warn!(attempt, ?delay, "retrying after transport error");
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    Err(()) => return Err(err),
                }
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn retry_stops_after_max_retries_plus_one_calls() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy { max_retries: 2, jitter: false, ..Default::default() };
        let calls2 = calls.clone();
        let result: Result<(), TransportError> = retry(&policy, || {
            let calls = calls2.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TransportError::new(ErrorKind::ServerError, "down"))
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_never_sleeps_on_non_retryable_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::default();
        let calls2 = calls.clone();
        let result: Result<(), TransportError> = retry(&policy, || {
            let calls = calls2.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TransportError::new(ErrorKind::InvalidRequest, "bad"))
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_rethrows_when_retry_after_exceeds_max_delay() {
        let policy = RetryPolicy { max_delay: Duration::from_millis(1_000), ..Default::default() };
        let mut called = 0;
        let result: Result<(), TransportError> = retry(&policy, || {
            called += 1;
            async move {
                Err(TransportError::new(ErrorKind::RateLimit, "slow down").with_retry_after(5.0))
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(called, 1);
    }

    #[test]
    fn error_kind_retryable_matches_taxonomy() {
        assert!(ErrorKind::RateLimit.retryable());
        assert!(ErrorKind::ServerError.retryable());
        assert!(!ErrorKind::Authentication.retryable());
        assert!(!ErrorKind::InvalidToolCall.retryable());
    }
}
