#![forbid(unsafe_code)]

//! # circuit
//!
//! A reliability gateway for chat-completion style model providers. Sits in
//! front of one or more upstream inference providers and exposes a single
//! wire-compatible chat-completion endpoint, enforcing per-client rate
//! limiting and daily spend quotas, a circuit breaker over the primary
//! upstream, bounded retries with jittered backoff, fallback dispatch,
//! token/cost accounting, and durable audit records.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use circuit::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn run() {
//! let clock = circuit::clock::system();
//! let state = GatewayState {
//!     clients: ClientRegistry::new(["sk-example".to_string()]),
//!     rate_limiter: TokenBucketLimiter::new(
//!         InMemoryTokenStore::new(),
//!         BucketConfig { capacity: 60.0, refill_per_sec: 1.0 },
//!         clock.clone(),
//!     ),
//!     quota: QuotaLedger::new(InMemoryQuotaStore::new(), 10.0),
//!     breaker: CircuitBreaker::new(CircuitBreakerConfig::default()),
//!     retry: RetryPolicy::new(RetryConfig::default(), Arc::new(TokioSleeper)),
//!     estimator: TokenEstimator::new(PriceTable::new()).expect("token encoder loads"),
//!     audit: InMemoryAuditStore::new(),
//!     metrics: MetricsRegistry::new(),
//!     clock,
//!     max_output_tokens: 1024,
//! };
//! # let _ = state;
//! # }
//! ```

pub mod audit;
pub mod circuit_breaker;
pub mod clock;
pub mod config;
pub mod error;
pub mod estimator;
pub mod fallback;
pub mod identity;
pub mod metrics;
pub mod pipeline;
pub mod provider;
pub mod quota;
pub mod rate_limit;
pub mod retry;
pub mod sleeper;
pub mod stream;

pub use error::{GatewayError, ProviderError, ResilienceError};

pub mod prelude;
