//! Error types shared by the reliability primitives and by the gateway's
//! HTTP-facing error taxonomy.

use std::fmt;
use std::time::Duration;

/// Unified error type produced by the resilience primitives (retry, circuit
/// breaker, timeout). The dispatcher and stream session translate this into
/// a [`GatewayError`] at the one point spec'd for that translation.
#[derive(Debug)]
pub enum ResilienceError<E> {
    Timeout { elapsed: Duration, timeout: Duration },
    CircuitOpen { failure_count: usize, open_duration: Duration },
    RetryExhausted { attempts: usize, failures: Vec<E> },
    Inner(E),
}

impl<E: Clone> Clone for ResilienceError<E> {
    fn clone(&self) -> Self {
        match self {
            Self::Timeout { elapsed, timeout } => {
                Self::Timeout { elapsed: *elapsed, timeout: *timeout }
            }
            Self::CircuitOpen { failure_count, open_duration } => {
                Self::CircuitOpen { failure_count: *failure_count, open_duration: *open_duration }
            }
            Self::RetryExhausted { attempts, failures } => {
                Self::RetryExhausted { attempts: *attempts, failures: failures.clone() }
            }
            Self::Inner(e) => Self::Inner(e.clone()),
        }
    }
}

impl<E: PartialEq> PartialEq for ResilienceError<E> {
    fn eq(&self, other: &Self) -> bool {
        use ResilienceError::*;
        match (self, other) {
            (Timeout { elapsed: a1, timeout: b1 }, Timeout { elapsed: a2, timeout: b2 }) => {
                a1 == a2 && b1 == b2
            }
            (
                CircuitOpen { failure_count: f1, open_duration: d1 },
                CircuitOpen { failure_count: f2, open_duration: d2 },
            ) => f1 == f2 && d1 == d2,
            (
                RetryExhausted { attempts: a1, failures: f1 },
                RetryExhausted { attempts: a2, failures: f2 },
            ) => a1 == a2 && f1 == f2,
            (Inner(e1), Inner(e2)) => e1 == e2,
            _ => false,
        }
    }
}

impl<E: Eq> Eq for ResilienceError<E> {}

impl<E: fmt::Display> fmt::Display for ResilienceError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout { elapsed, timeout } => {
                write!(f, "operation timed out after {:?} (limit: {:?})", elapsed, timeout)
            }
            Self::CircuitOpen { failure_count, open_duration } => {
                write!(
                    f,
                    "circuit breaker open ({} failures, open for {:?})",
                    failure_count, open_duration
                )
            }
            Self::RetryExhausted { attempts, failures } => {
                let last = failures.last().map(|e| e.to_string()).unwrap_or_default();
                write!(
                    f,
                    "retry exhausted after {} attempts ({} failures), last error: {}",
                    attempts,
                    failures.len(),
                    last
                )
            }
            Self::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for ResilienceError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Inner(e) => Some(e),
            Self::RetryExhausted { failures, .. } => {
                failures.last().map(|e| e as &dyn std::error::Error)
            }
            _ => None,
        }
    }
}

impl<E> ResilienceError<E> {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    pub fn is_retry_exhausted(&self) -> bool {
        matches!(self, Self::RetryExhausted { .. })
    }

    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }

    pub fn failures(&self) -> Option<&[E]> {
        match self {
            Self::RetryExhausted { failures, .. } => Some(failures.as_slice()),
            _ => None,
        }
    }

    pub fn is_inner(&self) -> bool {
        matches!(self, Self::Inner(_))
    }

    pub fn as_inner(&self) -> Option<&E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_inner_mut(&mut self) -> Option<&mut E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
}

/// A structured error returned by an upstream provider call, embedded in an
/// otherwise-successful transport response. Soft codes are promoted to
/// retryable failures by the retry engine; everything else (including a
/// raised `ProviderError::Transport`) is a hard failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("upstream timeout")]
    Timeout,
    #[error("upstream server error")]
    ServerError,
    #[error("upstream rate limited")]
    RateLimit,
    #[error("transport failure: {0}")]
    Transport(String),
    /// A structured error the upstream returned with a code outside the
    /// soft set (e.g. an invalid-request style error). Returned immediately,
    /// never retried.
    #[error("non-retryable provider error: {0}")]
    NonRetryable(String),
}

impl ProviderError {
    /// Soft error codes and raised transport exceptions are both promoted to
    /// retryable failures; a structured error outside the soft set is
    /// returned immediately without retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::ServerError | Self::RateLimit | Self::Transport(_))
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::ServerError => "server_error",
            Self::RateLimit => "rate_limit",
            Self::Transport(_) => "provider_error",
            Self::NonRetryable(_) => "provider_error",
        }
    }
}

/// The single point where every internal failure kind is translated to an
/// HTTP-facing error. One variant per known error code from the external
/// interface's error envelope.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    #[error("missing or invalid credential")]
    AuthenticationError,
    #[error("rate limited")]
    RateLimited,
    #[error("quota exceeded")]
    QuotaExceeded,
    #[error("upstream timeout")]
    Timeout,
    #[error("upstream server error")]
    ServerError,
    #[error("upstream rate limited")]
    UpstreamRateLimit,
    #[error("primary and fallback both failed")]
    FallbackFailed,
    #[error("retries exhausted")]
    RetryExhausted,
    #[error("service unavailable")]
    ServiceUnavailable,
    #[error("provider error: {0}")]
    ProviderError(String),
}

impl GatewayError {
    pub fn status_code(&self) -> u16 {
        match self {
            Self::AuthenticationError => 401,
            Self::RateLimited | Self::QuotaExceeded => 429,
            Self::Timeout | Self::ServerError | Self::UpstreamRateLimit | Self::ProviderError(_) => 502,
            Self::FallbackFailed | Self::RetryExhausted | Self::ServiceUnavailable => 503,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::AuthenticationError => "authentication_error",
            Self::RateLimited => "rate_limited",
            Self::QuotaExceeded => "quota_exceeded",
            Self::Timeout => "timeout",
            Self::ServerError => "server_error",
            Self::UpstreamRateLimit => "rate_limit",
            Self::FallbackFailed => "fallback_failed",
            Self::RetryExhausted => "retry_exhausted",
            Self::ServiceUnavailable => "service_unavailable",
            Self::ProviderError(_) => "provider_error",
        }
    }

    pub fn from_provider_error(err: &ProviderError) -> Self {
        match err {
            ProviderError::Timeout => Self::Timeout,
            ProviderError::ServerError => Self::ServerError,
            ProviderError::RateLimit => Self::UpstreamRateLimit,
            ProviderError::Transport(msg) => Self::ProviderError(msg.clone()),
            ProviderError::NonRetryable(msg) => Self::ProviderError(msg.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;
    use std::fmt;
    use std::io;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct DummyError(&'static str);

    impl fmt::Display for DummyError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl std::error::Error for DummyError {}

    #[test]
    fn timeout_error_display() {
        let err: ResilienceError<io::Error> = ResilienceError::Timeout {
            elapsed: Duration::from_millis(5100),
            timeout: Duration::from_secs(5),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("timed out"));
    }

    #[test]
    fn retry_exhausted_display_includes_last_error() {
        let err: ResilienceError<DummyError> = ResilienceError::RetryExhausted {
            attempts: 3,
            failures: vec![DummyError("first"), DummyError("last")],
        };
        let msg = format!("{}", err);
        assert!(msg.contains("3"));
        assert!(msg.contains("last"));
    }

    #[test]
    fn source_returns_last_failure_for_retry_exhausted() {
        let err: ResilienceError<DummyError> = ResilienceError::RetryExhausted {
            attempts: 3,
            failures: vec![DummyError("a"), DummyError("b")],
        };
        let src = err.source().unwrap();
        assert_eq!(src.to_string(), "b");
    }

    #[test]
    fn provider_error_retry_classification() {
        assert!(ProviderError::Timeout.is_retryable());
        assert!(ProviderError::ServerError.is_retryable());
        assert!(ProviderError::RateLimit.is_retryable());
        assert!(ProviderError::Transport("boom".into()).is_retryable());
        assert!(!ProviderError::NonRetryable("invalid_request".into()).is_retryable());
    }

    #[test]
    fn gateway_error_status_codes_match_external_contract() {
        assert_eq!(GatewayError::AuthenticationError.status_code(), 401);
        assert_eq!(GatewayError::RateLimited.status_code(), 429);
        assert_eq!(GatewayError::QuotaExceeded.status_code(), 429);
        assert_eq!(GatewayError::Timeout.status_code(), 502);
        assert_eq!(GatewayError::FallbackFailed.status_code(), 503);
        assert_eq!(GatewayError::ServiceUnavailable.status_code(), 503);
    }

    #[test]
    fn gateway_error_codes_match_external_contract() {
        assert_eq!(GatewayError::QuotaExceeded.code(), "quota_exceeded");
        assert_eq!(GatewayError::FallbackFailed.code(), "fallback_failed");
        assert_eq!(GatewayError::ServiceUnavailable.code(), "service_unavailable");
    }
}
