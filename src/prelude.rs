//! Convenient re-exports for common gateway types.
pub use crate::{
    audit::{AuditRow, AuditStore, InMemoryAuditStore},
    circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState},
    clock::{Clock, ManualClock, SystemClock},
    config::GatewayConfig,
    error::{GatewayError, ProviderError, ResilienceError},
    estimator::{ModelPrice, PriceTable, TokenEstimator, TokenOverhead},
    fallback::{with_fallback, Dispatched},
    identity::{hash_client_key, ClientRegistry},
    metrics::MetricsRegistry,
    pipeline::{GatewayMetadata, GatewayState},
    provider::{ChatMessage, ChatRequest, ChatResponse, ChunkKind, Provider, Usage},
    quota::{InMemoryQuotaStore, QuotaLedger, QuotaStore},
    rate_limit::{store::{AnyTokenStore, InMemoryTokenStore}, BucketConfig, TokenBucketLimiter},
    retry::{RetryConfig, RetryPolicy},
    sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper},
    stream::{normalize_chunk, NormalizedChunk, StreamOutcome, StreamSession},
};
