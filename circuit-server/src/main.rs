use circuit::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use circuit::clock;
use circuit::config::GatewayConfig;
use circuit::estimator::{PriceTable, TokenEstimator};
use circuit::identity::ClientRegistry;
use circuit::pipeline::GatewayState;
use circuit::provider::Provider;
use circuit::quota::QuotaLedger;
use circuit::rate_limit::store::{AnyTokenStore, InMemoryTokenStore, RedisTokenStore};
use circuit::rate_limit::{BucketConfig, TokenBucketLimiter};
use circuit::retry::{RetryConfig, RetryPolicy};
use circuit::sleeper::TokioSleeper;
use circuit_server::providers::{mock_fallback::MockFallbackProvider, mock_openai::MockChatProvider, openai::OpenAiProvider};
use circuit_server::routes::{self, AppDeps};
use circuit_server::storage::sqlite::{bootstrap, SqliteAuditStore, SqliteQuotaStore};
use clap::Parser;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = GatewayConfig::parse();

    let pool = bootstrap(&config.db_path).await?;
    let audit_store = SqliteAuditStore::new(pool.clone());
    let quota_store = SqliteQuotaStore::new(pool);
    let clock = clock::system();

    let primary: Arc<dyn Provider> = match config.provider.as_str() {
        "openai" => {
            let api_key = config
                .api_keys
                .first()
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("PROVIDER=openai requires CIRCUIT_API_KEYS"))?;
            Arc::new(OpenAiProvider::new("https://api.openai.com", api_key)?)
        }
        _ => Arc::new(MockChatProvider::new()),
    };
    let fallback: Arc<dyn Provider> = Arc::new(MockFallbackProvider);

    let token_store = match &config.redis_url {
        Some(url) => AnyTokenStore::Redis(RedisTokenStore::new(url)?),
        None => AnyTokenStore::InMemory(InMemoryTokenStore::new()),
    };

    let gateway = GatewayState {
        clients: ClientRegistry::new(config.api_keys.clone()),
        rate_limiter: TokenBucketLimiter::new(
            token_store,
            BucketConfig { capacity: config.requests_per_min as f64, refill_per_sec: config.bucket_refill_per_sec() },
            clock.clone(),
        ),
        quota: QuotaLedger::new(quota_store, config.daily_usd_limit),
        breaker: CircuitBreaker::with_clock(CircuitBreakerConfig::default(), clock.clone()),
        retry: RetryPolicy::new(RetryConfig::default(), Arc::new(TokioSleeper)),
        estimator: TokenEstimator::new(PriceTable::new())?,
        audit: audit_store,
        metrics: circuit::metrics::MetricsRegistry::new(),
        clock: clock.clone(),
        max_output_tokens: config.max_output_tokens,
    };

    let bind_addr = config.bind_addr.clone();
    let state = Arc::new(AppDeps { gateway, primary, fallback });
    let app = routes::router(state);

    tracing::info!(addr = %bind_addr, "gateway listening");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
