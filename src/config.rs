//! Environment-driven gateway configuration, matching the external
//! configuration contract: `PROVIDER`, `CIRCUIT_API_KEYS`,
//! `CIRCUIT_LOG_PAYLOADS`, `CIRCUIT_DB_PATH`, `CIRCUIT_REQUESTS_PER_MIN`,
//! `CIRCUIT_DAILY_USD_LIMIT`, `CIRCUIT_MAX_OUTPUT_TOKENS`, `REDIS_URL`.

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "circuit-gateway", about = "Reliability gateway for chat-completion providers")]
pub struct GatewayConfig {
    /// Selects the primary provider implementation at startup.
    #[arg(long, env = "PROVIDER", default_value = "mock")]
    pub provider: String,

    /// Comma-separated list of accepted bearer credentials.
    #[arg(long, env = "CIRCUIT_API_KEYS", value_delimiter = ',')]
    pub api_keys: Vec<String>,

    /// Whether request/response payloads may be logged (never the raw
    /// credential, regardless of this flag).
    #[arg(long, env = "CIRCUIT_LOG_PAYLOADS", default_value_t = false)]
    pub log_payloads: bool,

    /// SQLite file backing the audit store and quota ledger.
    #[arg(long, env = "CIRCUIT_DB_PATH", default_value = "circuit.db")]
    pub db_path: String,

    #[arg(long, env = "CIRCUIT_REQUESTS_PER_MIN", default_value_t = 60)]
    pub requests_per_min: u32,

    #[arg(long, env = "CIRCUIT_DAILY_USD_LIMIT", default_value_t = 10.0)]
    pub daily_usd_limit: f64,

    #[arg(long, env = "CIRCUIT_MAX_OUTPUT_TOKENS", default_value_t = 1024)]
    pub max_output_tokens: u32,

    /// Presence selects the shared-store (Redis) rate limiter over the
    /// in-process one.
    #[arg(long, env = "REDIS_URL")]
    pub redis_url: Option<String>,

    #[arg(long, env = "CIRCUIT_BIND_ADDR", default_value = "0.0.0.0:8080")]
    pub bind_addr: String,
}

impl GatewayConfig {
    pub fn bucket_refill_per_sec(&self) -> f64 {
        self.requests_per_min as f64 / 60.0
    }

    pub fn uses_shared_rate_limiter(&self) -> bool {
        self.redis_url.is_some()
    }
}
