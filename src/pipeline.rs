//! Composes auth → limit → quota → dispatch → settle → audit. The request
//! pipeline is the one point where every internal failure kind is
//! translated into the HTTP-facing [`GatewayError`].

use crate::audit::{record_best_effort, AuditRow, AuditStore};
use crate::circuit_breaker::CircuitBreaker;
use crate::clock::Clock;
use crate::error::GatewayError;
use crate::estimator::TokenEstimator;
use crate::fallback::{with_fallback, Dispatched};
use crate::identity::ClientRegistry;
use crate::metrics::MetricsRegistry;
use crate::provider::{ChatRequest, ChatResponse, Provider};
use crate::quota::{QuotaLedger, QuotaStore};
use crate::rate_limit::store::TokenStore;
use crate::rate_limit::{BucketConfig, TokenBucketLimiter};
use crate::retry::RetryPolicy;
use std::sync::Arc;
use uuid::Uuid;

/// The gateway-metadata envelope added to the upstream response on success.
#[derive(Debug, Clone, serde::Serialize)]
pub struct GatewayMetadata {
    pub request_id: String,
    pub client_key_hash: String,
    pub cost_usd: f64,
    pub breaker_state: String,
}

pub struct BufferedOutcome {
    pub status_code: u16,
    pub body: serde_json::Value,
    pub error: Option<GatewayError>,
}

/// Process-wide composition root: one instance per running gateway,
/// constructed at startup and shared (by reference or clone of the `Arc`
/// fields) into every request task.
pub struct GatewayState<TS: TokenStore, QS: QuotaStore, AS: AuditStore> {
    pub clients: ClientRegistry,
    pub rate_limiter: TokenBucketLimiter<TS>,
    pub quota: QuotaLedger<QS>,
    pub breaker: CircuitBreaker,
    pub retry: RetryPolicy,
    pub estimator: TokenEstimator,
    pub audit: AS,
    pub metrics: MetricsRegistry,
    pub clock: Arc<dyn Clock>,
    pub max_output_tokens: u32,
}

impl<TS: TokenStore, QS: QuotaStore, AS: AuditStore> GatewayState<TS, QS, AS> {
    /// Steps 1-3: auth, rate limit, pre-dispatch quota check. Shared by the
    /// buffered and streaming paths.
    async fn admit(
        &self,
        bearer: Option<&str>,
        request: &ChatRequest,
    ) -> Result<String, GatewayError> {
        let client_hash = self
            .clients
            .resolve(bearer)
            .ok_or(GatewayError::AuthenticationError)?;

        let allowed = self
            .rate_limiter
            .allow(&client_hash)
            .await
            .map_err(|_| GatewayError::ServiceUnavailable)?;
        if !allowed {
            return Err(GatewayError::RateLimited);
        }

        let upper_bound_tokens = request.max_tokens.unwrap_or(self.max_output_tokens);
        let price = self.estimator_price_upper_bound(&request.model, upper_bound_tokens);
        let date = self.clock.today_utc();
        let decision = self
            .quota
            .check(&client_hash, date, price)
            .await
            .map_err(|_| GatewayError::ServiceUnavailable)?;
        if !decision.allowed {
            return Err(GatewayError::QuotaExceeded);
        }

        Ok(client_hash)
    }

    fn estimator_price_upper_bound(&self, model: &str, max_output_tokens: u32) -> f64 {
        self.estimator.estimate_cost_usd(model, Some(0), Some(max_output_tokens))
    }

    /// Buffered path: auth → limit → quota pre-check → retry(primary) →
    /// fallback on failure → settle.
    pub async fn handle_buffered(
        &self,
        bearer: Option<&str>,
        request: ChatRequest,
        primary: Arc<dyn Provider>,
        fallback: Arc<dyn Provider>,
    ) -> BufferedOutcome {
        let request_id = Uuid::new_v4().to_string();
        let started_at = self.clock.now_millis();

        let client_hash = match self.admit(bearer, &request).await {
            Ok(hash) => hash,
            Err(err) => return self.deny(err),
        };

        let dispatched = with_fallback(
            || async {
                self.retry
                    .execute(|| {
                        let primary = primary.clone();
                        let request = request.clone();
                        async move { primary.complete(&request).await }
                    })
                    .await
            },
            || async { fallback.complete(&request).await },
        )
        .await;

        match dispatched {
            Dispatched::Primary(response) => {
                self.breaker.record_success();
                self.settle_success(&request_id, &client_hash, &request, response, started_at, primary.name())
                    .await
            }
            Dispatched::Fallback(Ok(response)) => {
                // Fallback never touches the breaker; only primary outcomes do.
                self.metrics.record_fallback_hit();
                self.settle_success(&request_id, &client_hash, &request, response, started_at, fallback.name())
                    .await
            }
            Dispatched::Fallback(Err(_primary_and_fallback_failed)) => {
                self.breaker.record_failure();
                let latency_ms = self.clock.now_millis().saturating_sub(started_at);
                record_best_effort(
                    &self.audit,
                    AuditRow {
                        request_id: request_id.clone(),
                        timestamp: self.clock.now_utc(),
                        provider_name: fallback.name().to_string(),
                        model: request.model.clone(),
                        status_code: 503,
                        latency_ms,
                        tokens_input: None,
                        tokens_output: None,
                        cost_usd: 0.0,
                    },
                )
                .await;
                self.metrics.record_request(&client_hash, latency_ms, true);
                self.error_response(GatewayError::FallbackFailed)
            }
        }
    }

    async fn settle_success(
        &self,
        request_id: &str,
        client_hash: &str,
        request: &ChatRequest,
        response: ChatResponse,
        started_at: u64,
        provider_name: &str,
    ) -> BufferedOutcome {
        let latency_ms = self.clock.now_millis().saturating_sub(started_at);
        let prompt_tokens = response
            .usage
            .prompt_tokens
            .unwrap_or_else(|| self.estimator.count_messages(&request.model, &request.messages));
        let completion_tokens = response
            .usage
            .completion_tokens
            .unwrap_or_else(|| self.estimator.count_text(&response.assistant_text));
        let cost = self
            .estimator
            .estimate_cost_usd(&request.model, Some(prompt_tokens), Some(completion_tokens));

        let date = self.clock.today_utc();
        let decision = match self.quota.check(client_hash, date, cost).await {
            Ok(d) => d,
            Err(_) => return self.error_response(GatewayError::ServiceUnavailable),
        };

        let status_code = if decision.allowed { 200 } else { 429 };
        if decision.allowed && cost > 0.0 {
            let _ = self.quota.accrue(client_hash, date, cost).await;
        }

        record_best_effort(
            &self.audit,
            AuditRow {
                request_id: request_id.to_string(),
                timestamp: self.clock.now_utc(),
                provider_name: provider_name.to_string(),
                model: request.model.clone(),
                status_code,
                latency_ms,
                tokens_input: Some(prompt_tokens),
                tokens_output: Some(completion_tokens),
                cost_usd: if decision.allowed { cost } else { 0.0 },
            },
        )
        .await;
        self.metrics.record_request(client_hash, latency_ms, !decision.allowed);

        if !decision.allowed {
            return self.error_response(GatewayError::QuotaExceeded);
        }

        let mut body = response.body;
        let metadata = GatewayMetadata {
            request_id: request_id.to_string(),
            client_key_hash: client_hash.to_string(),
            cost_usd: cost,
            breaker_state: self.breaker.state().as_str().to_string(),
        };
        if let serde_json::Value::Object(ref mut map) = body {
            map.insert("circuit".to_string(), serde_json::to_value(&metadata).unwrap());
        }
        BufferedOutcome { status_code: 200, body, error: None }
    }

    fn deny(&self, err: GatewayError) -> BufferedOutcome {
        self.error_response(err)
    }

    fn error_response(&self, err: GatewayError) -> BufferedOutcome {
        let body = serde_json::json!({ "error": { "code": err.code(), "message": err.to_string() } });
        BufferedOutcome { status_code: err.status_code(), body, error: Some(err) }
    }

    /// Streaming path: steps 1-3 identical; breaker is consulted directly
    /// (no retries on streams) before the session opens.
    pub async fn admit_stream(
        &self,
        bearer: Option<&str>,
        request: &ChatRequest,
    ) -> Result<String, GatewayError> {
        let client_hash = self.admit(bearer, request).await?;
        if !self.breaker.allow_request() {
            return Err(GatewayError::ServiceUnavailable);
        }
        Ok(client_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::estimator::PriceTable;
    use crate::provider::ChunkKind;
    use crate::quota::InMemoryQuotaStore;
    use crate::rate_limit::store::InMemoryTokenStore;
    use crate::sleeper::InstantSleeper;
    use crate::audit::InMemoryAuditStore;
    use crate::circuit_breaker::CircuitBreakerConfig;
    use crate::retry::RetryConfig;
    use async_trait::async_trait;

    struct AlwaysOk;
    #[async_trait]
    impl Provider for AlwaysOk {
        fn name(&self) -> &str {
            "primary"
        }
        async fn complete(&self, _req: &ChatRequest) -> Result<ChatResponse, crate::error::ProviderError> {
            Ok(ChatResponse {
                body: serde_json::json!({"id": "resp-1"}),
                assistant_text: "hello".to_string(),
                usage: Default::default(),
            })
        }
    }

    struct AlwaysFails;
    #[async_trait]
    impl Provider for AlwaysFails {
        fn name(&self) -> &str {
            "primary"
        }
        async fn complete(&self, _req: &ChatRequest) -> Result<ChatResponse, crate::error::ProviderError> {
            Err(crate::error::ProviderError::Transport("down".to_string()))
        }
    }

    fn state(clock: Arc<ManualClock>) -> GatewayState<InMemoryTokenStore, InMemoryQuotaStore, InMemoryAuditStore> {
        GatewayState {
            clients: ClientRegistry::new(["sk-test".to_string()]),
            rate_limiter: TokenBucketLimiter::new(
                InMemoryTokenStore::new(),
                BucketConfig { capacity: 100.0, refill_per_sec: 10.0 },
                clock.clone(),
            ),
            quota: QuotaLedger::new(InMemoryQuotaStore::new(), 100.0),
            breaker: CircuitBreaker::with_clock(CircuitBreakerConfig::default(), clock.clone()),
            retry: RetryPolicy::new(RetryConfig::default(), Arc::new(InstantSleeper)),
            estimator: TokenEstimator::new(PriceTable::new()).unwrap(),
            audit: InMemoryAuditStore::new(),
            metrics: MetricsRegistry::new(),
            clock,
            max_output_tokens: 1024,
        }
    }

    fn request() -> ChatRequest {
        ChatRequest {
            model: "gpt-4o".to_string(),
            messages: vec![crate::provider::ChatMessage { role: "user".to_string(), content: "hi".to_string() }],
            stream: false,
            temperature: 1.0,
            top_p: 1.0,
            n: 1,
            max_tokens: Some(50),
            stop: None,
            user: None,
        }
    }

    #[tokio::test]
    async fn missing_credential_is_rejected() {
        let clock = Arc::new(ManualClock::new("2024-01-01T00:00:00Z".parse().unwrap()));
        let state = state(clock);
        let outcome = state
            .handle_buffered(None, request(), Arc::new(AlwaysOk), Arc::new(AlwaysOk))
            .await;
        assert_eq!(outcome.status_code, 401);
    }

    #[tokio::test]
    async fn successful_primary_call_returns_envelope() {
        let clock = Arc::new(ManualClock::new("2024-01-01T00:00:00Z".parse().unwrap()));
        let state = state(clock);
        let outcome = state
            .handle_buffered(Some("sk-test"), request(), Arc::new(AlwaysOk), Arc::new(AlwaysOk))
            .await;
        assert_eq!(outcome.status_code, 200);
        assert!(outcome.body.get("circuit").is_some());
    }

    #[tokio::test]
    async fn primary_failure_escalates_to_fallback_without_touching_breaker() {
        let clock = Arc::new(ManualClock::new("2024-01-01T00:00:00Z".parse().unwrap()));
        let state = state(clock);
        let outcome = state
            .handle_buffered(Some("sk-test"), request(), Arc::new(AlwaysFails), Arc::new(AlwaysOk))
            .await;
        assert_eq!(outcome.status_code, 200);
        assert_eq!(state.breaker.state(), crate::circuit_breaker::CircuitState::Closed);
        assert_eq!(state.metrics.snapshot_global().fallback_hits, 1);
    }

    #[tokio::test]
    async fn both_failing_returns_503_and_trips_breaker() {
        let clock = Arc::new(ManualClock::new("2024-01-01T00:00:00Z".parse().unwrap()));
        let state = state(clock);
        for _ in 0..10 {
            let _ = state
                .handle_buffered(Some("sk-test"), request(), Arc::new(AlwaysFails), Arc::new(AlwaysFails))
                .await;
        }
        assert_eq!(state.breaker.state(), crate::circuit_breaker::CircuitState::Open);
    }
}
