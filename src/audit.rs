//! Durable per-request audit rows. `request_id` is the primary key; rows
//! are write-once. Writes are best-effort: a failed write is logged and
//! never changes the user-visible response.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct AuditRow {
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
    pub provider_name: String,
    pub model: String,
    pub status_code: u16,
    pub latency_ms: u64,
    pub tokens_input: Option<u32>,
    pub tokens_output: Option<u32>,
    pub cost_usd: f64,
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn record(&self, row: AuditRow) -> Result<(), Self::Error>;
}

/// Records a row, logging (not propagating) a storage failure — audit
/// failures must never affect the HTTP response.
pub async fn record_best_effort<S: AuditStore>(store: &S, row: AuditRow) {
    let request_id = row.request_id.clone();
    if let Err(err) = store.record(row).await {
        tracing::error!(request_id, error = %err, "failed to write audit row");
    }
}

#[derive(Default)]
pub struct InMemoryAuditStore {
    rows: tokio::sync::Mutex<Vec<AuditRow>>,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn rows(&self) -> Vec<AuditRow> {
        self.rows.lock().await.clone()
    }
}

#[derive(Debug, thiserror::Error)]
#[error("duplicate request_id: {0}")]
pub struct DuplicateRequestId(pub String);

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    type Error = DuplicateRequestId;

    async fn record(&self, row: AuditRow) -> Result<(), Self::Error> {
        let mut rows = self.rows.lock().await;
        if rows.iter().any(|r| r.request_id == row.request_id) {
            return Err(DuplicateRequestId(row.request_id));
        }
        rows.push(row);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str) -> AuditRow {
        AuditRow {
            request_id: id.to_string(),
            timestamp: Utc::now(),
            provider_name: "mock".to_string(),
            model: "gpt-4o".to_string(),
            status_code: 200,
            latency_ms: 12,
            tokens_input: Some(10),
            tokens_output: Some(5),
            cost_usd: 0.001,
        }
    }

    #[tokio::test]
    async fn writes_are_idempotent_under_primary_key() {
        let store = InMemoryAuditStore::new();
        store.record(row("req-1")).await.unwrap();
        let err = store.record(row("req-1")).await.unwrap_err();
        assert_eq!(err.0, "req-1");
        assert_eq!(store.rows().await.len(), 1);
    }

    #[tokio::test]
    async fn best_effort_swallows_errors() {
        let store = InMemoryAuditStore::new();
        record_best_effort(&store, row("req-1")).await;
        record_best_effort(&store, row("req-1")).await;
        assert_eq!(store.rows().await.len(), 1);
    }
}
