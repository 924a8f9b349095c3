//! SQLite-backed audit store and quota ledger: `requests` and
//! `quota_usage` tables, exactly as laid out in the persisted-state
//! contract.

use async_trait::async_trait;
use chrono::NaiveDate;
use circuit::audit::{AuditRow, AuditStore};
use circuit::quota::QuotaStore;
use sqlx::SqlitePool;

pub async fn bootstrap(db_path: &str) -> Result<SqlitePool, sqlx::Error> {
    let url = format!("sqlite://{}?mode=rwc", db_path);
    let pool = SqlitePool::connect(&url).await?;
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS requests (
            request_id TEXT PRIMARY KEY,
            timestamp TEXT NOT NULL,
            provider TEXT NOT NULL,
            model TEXT NOT NULL,
            status_code INTEGER NOT NULL,
            latency_ms INTEGER NOT NULL,
            tokens_input INTEGER,
            tokens_output INTEGER,
            cost_usd REAL NOT NULL
        )",
    )
    .execute(&pool)
    .await?;
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS quota_usage (
            client_key_hash TEXT NOT NULL,
            date TEXT NOT NULL,
            usd_spent REAL NOT NULL,
            PRIMARY KEY (client_key_hash, date)
        )",
    )
    .execute(&pool)
    .await?;
    Ok(pool)
}

pub struct SqliteAuditStore {
    pool: SqlitePool,
}

impl SqliteAuditStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditStore for SqliteAuditStore {
    type Error = sqlx::Error;

    async fn record(&self, row: AuditRow) -> Result<(), Self::Error> {
        sqlx::query(
            "INSERT INTO requests
                (request_id, timestamp, provider, model, status_code, latency_ms, tokens_input, tokens_output, cost_usd)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&row.request_id)
        .bind(row.timestamp.to_rfc3339())
        .bind(&row.provider_name)
        .bind(&row.model)
        .bind(row.status_code as i64)
        .bind(row.latency_ms as i64)
        .bind(row.tokens_input.map(|v| v as i64))
        .bind(row.tokens_output.map(|v| v as i64))
        .bind(row.cost_usd)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

pub struct SqliteQuotaStore {
    pool: SqlitePool,
}

impl SqliteQuotaStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QuotaStore for SqliteQuotaStore {
    type Error = sqlx::Error;

    async fn get_daily_spend(&self, client_hash: &str, date: NaiveDate) -> Result<f64, Self::Error> {
        let row: Option<(f64,)> = sqlx::query_as(
            "SELECT usd_spent FROM quota_usage WHERE client_key_hash = ? AND date = ?",
        )
        .bind(client_hash)
        .bind(date.to_string())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(spent,)| spent).unwrap_or(0.0))
    }

    async fn accrue(&self, client_hash: &str, date: NaiveDate, delta: f64) -> Result<(), Self::Error> {
        sqlx::query(
            "INSERT INTO quota_usage (client_key_hash, date, usd_spent) VALUES (?, ?, ?)
             ON CONFLICT(client_key_hash, date) DO UPDATE SET usd_spent = usd_spent + excluded.usd_spent",
        )
        .bind(client_hash)
        .bind(date.to_string())
        .bind(delta)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
