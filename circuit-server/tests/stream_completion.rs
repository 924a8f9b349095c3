//! End-to-end test for the streaming surface: drives the real router over
//! a bound TCP listener and asserts on the emitted SSE bytes and the
//! resulting audit row.

use circuit::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use circuit::clock;
use circuit::estimator::{PriceTable, TokenEstimator};
use circuit::identity::ClientRegistry;
use circuit::metrics::MetricsRegistry;
use circuit::pipeline::GatewayState;
use circuit::provider::Provider;
use circuit::quota::QuotaLedger;
use circuit::rate_limit::store::{AnyTokenStore, InMemoryTokenStore};
use circuit::rate_limit::{BucketConfig, TokenBucketLimiter};
use circuit::retry::{RetryConfig, RetryPolicy};
use circuit::sleeper::InstantSleeper;
use circuit_server::providers::{mock_fallback::MockFallbackProvider, mock_openai::MockChatProvider};
use circuit_server::routes::{self, AppDeps};
use circuit_server::storage::sqlite::{bootstrap, SqliteAuditStore, SqliteQuotaStore};
use std::sync::Arc;

#[tokio::test]
async fn streaming_request_emits_sse_and_writes_one_audit_row() {
    let db_path =
        format!("{}/circuit-stream-test-{}.db", std::env::temp_dir().display(), uuid::Uuid::new_v4());
    let pool = bootstrap(&db_path).await.unwrap();
    let quota_store = SqliteQuotaStore::new(pool.clone());
    let audit_store = SqliteAuditStore::new(pool.clone());
    let clock = clock::system();

    let gateway = GatewayState {
        clients: ClientRegistry::new(["sk-test".to_string()]),
        rate_limiter: TokenBucketLimiter::new(
            AnyTokenStore::InMemory(InMemoryTokenStore::new()),
            BucketConfig { capacity: 100.0, refill_per_sec: 10.0 },
            clock.clone(),
        ),
        quota: QuotaLedger::new(quota_store, 10.0),
        breaker: CircuitBreaker::with_clock(CircuitBreakerConfig::default(), clock.clone()),
        retry: RetryPolicy::new(RetryConfig::default(), Arc::new(InstantSleeper)),
        estimator: TokenEstimator::new(PriceTable::new()).unwrap(),
        audit: audit_store,
        metrics: MetricsRegistry::new(),
        clock: clock.clone(),
        max_output_tokens: 1024,
    };

    let primary: Arc<dyn Provider> = Arc::new(MockChatProvider::new());
    let fallback: Arc<dyn Provider> = Arc::new(MockFallbackProvider);
    let state = Arc::new(AppDeps { gateway, primary, fallback });
    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://{addr}/v1/chat/completions"))
        .bearer_auth("sk-test")
        .json(&serde_json::json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}],
            "stream": true,
        }))
        .send()
        .await
        .unwrap();

    assert!(response.status().is_success());
    let body = response.text().await.unwrap();

    // Exactly one layer of SSE framing: never "data: data:", and the
    // terminal marker is present.
    assert!(!body.contains("data: data:"));
    assert!(body.contains("data: "));
    assert!(body.contains("[DONE]"));

    let rows: Vec<(String,)> = sqlx::query_as("SELECT provider FROM requests").fetch_all(&pool).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].0, "mock-openai");
}
