//! Daily per-client spend ledger. Consulted twice per request that produces
//! a cost: an optimistic pre-check before dispatch, and an authoritative
//! post-check after settlement. Day boundaries are UTC, bucketed by the
//! calendar day of the settlement moment, not the request's start.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::Mutex;

#[async_trait]
pub trait QuotaStore: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn get_daily_spend(&self, client_hash: &str, date: NaiveDate) -> Result<f64, Self::Error>;

    /// Upsert semantics: existing row adds `delta`; absent row inserts `delta`.
    async fn accrue(&self, client_hash: &str, date: NaiveDate, delta: f64) -> Result<(), Self::Error>;
}

#[derive(Debug, Clone, Copy)]
pub struct QuotaDecision {
    pub allowed: bool,
    pub spent: f64,
    pub limit: f64,
}

pub struct QuotaLedger<S: QuotaStore> {
    store: S,
    daily_limit_usd: f64,
}

impl<S: QuotaStore> QuotaLedger<S> {
    pub fn new(store: S, daily_limit_usd: f64) -> Self {
        Self { store, daily_limit_usd }
    }

    pub async fn check(
        &self,
        client_hash: &str,
        date: NaiveDate,
        delta_cost: f64,
    ) -> Result<QuotaDecision, S::Error> {
        let spent = self.store.get_daily_spend(client_hash, date).await?;
        Ok(QuotaDecision {
            allowed: spent + delta_cost <= self.daily_limit_usd,
            spent,
            limit: self.daily_limit_usd,
        })
    }

    /// Only call when `delta > 0` and the settlement was allowed — accrual
    /// never happens on a denied request.
    pub async fn accrue(&self, client_hash: &str, date: NaiveDate, delta: f64) -> Result<(), S::Error> {
        self.store.accrue(client_hash, date, delta).await
    }
}

/// Process-local ledger for single-instance deployments or tests; the
/// server crate's SQLite-backed store is used in production.
#[derive(Default)]
pub struct InMemoryQuotaStore {
    rows: Mutex<HashMap<(String, NaiveDate), f64>>,
}

impl InMemoryQuotaStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QuotaStore for InMemoryQuotaStore {
    type Error = std::convert::Infallible;

    async fn get_daily_spend(&self, client_hash: &str, date: NaiveDate) -> Result<f64, Self::Error> {
        let rows = self.rows.lock().unwrap();
        Ok(rows.get(&(client_hash.to_string(), date)).copied().unwrap_or(0.0))
    }

    async fn accrue(&self, client_hash: &str, date: NaiveDate, delta: f64) -> Result<(), Self::Error> {
        let mut rows = self.rows.lock().unwrap();
        *rows.entry((client_hash.to_string(), date)).or_insert(0.0) += delta;
        Ok(())
    }
}
