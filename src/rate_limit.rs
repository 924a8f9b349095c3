//! Per-client token-bucket rate limiting, in-process and shared-store.
//!
//! One contract, two backends: [`TokenBucketLimiter`] keyed by a
//! [`store::TokenStore`] — [`store::InMemoryTokenStore`] for a single
//! instance, `RedisTokenStore` (in the server crate) when multiple gateway
//! instances must share admission state.

pub mod store;

use crate::clock::Clock;
use store::TokenStore;

#[derive(Clone, Copy, Debug)]
pub struct BucketConfig {
    pub capacity: f64,
    pub refill_per_sec: f64,
}

/// `allow(client_hash) -> bool`, refilling lazily against whatever store
/// backs this limiter. A bucket absent from the store is created full.
pub struct TokenBucketLimiter<S: TokenStore> {
    store: S,
    config: BucketConfig,
    clock: std::sync::Arc<dyn Clock>,
}

impl<S: TokenStore> TokenBucketLimiter<S> {
    pub fn new(store: S, config: BucketConfig, clock: std::sync::Arc<dyn Clock>) -> Self {
        Self { store, config, clock }
    }

    /// Admits one request for `client_hash`. Refill is computed with
    /// fractional-second precision against the store's optimistic-lock CAS;
    /// a lost race is retried a bounded number of times, mirroring the
    /// optimistic-concurrency contract `TokenStore::set_state` documents.
    pub async fn allow(&self, client_hash: &str) -> Result<bool, S::Error> {
        const MAX_CAS_RETRIES: usize = 5;
        for _ in 0..MAX_CAS_RETRIES {
            let now_nanos = self.clock.now_millis() * 1_000_000;
            let existing = self.store.get_state(client_hash).await?;
            let (tokens, prev_ts) = match existing {
                Some((tokens, ts)) => {
                    let elapsed_secs = (now_nanos.saturating_sub(ts)) as f64 / 1e9;
                    let refilled = (tokens + elapsed_secs * self.config.refill_per_sec).min(self.config.capacity);
                    (refilled, Some(ts))
                }
                None => (self.config.capacity, None),
            };

            if tokens < 1.0 {
                // Persist the refill even on denial so later calls see the
                // correct, non-decreasing token count.
                if self.store.set_state(client_hash, tokens, now_nanos, prev_ts).await? {
                    return Ok(false);
                }
                continue;
            }

            let remaining = tokens - 1.0;
            if self.store.set_state(client_hash, remaining, now_nanos, prev_ts).await? {
                return Ok(true);
            }
            // CAS lost the race; retry with a fresh read.
        }
        // Exhausted retries under contention: fail closed, matching "failure
        // of the shared store is NOT silently downgraded to allow".
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use store::InMemoryTokenStore;
    use std::sync::Arc;

    fn limiter(capacity: f64, refill_per_sec: f64, clock: Arc<ManualClock>) -> TokenBucketLimiter<InMemoryTokenStore> {
        TokenBucketLimiter::new(InMemoryTokenStore::new(), BucketConfig { capacity, refill_per_sec }, clock)
    }

    #[tokio::test]
    async fn burst_up_to_capacity_then_denies() {
        let clock = Arc::new(ManualClock::new("2024-01-01T00:00:00Z".parse().unwrap()));
        let limiter = limiter(20.0, 5.0, clock.clone());
        for _ in 0..20 {
            assert!(limiter.allow("a").await.unwrap());
        }
        assert!(!limiter.allow("a").await.unwrap());
    }

    #[tokio::test]
    async fn refills_after_elapsed_time() {
        let clock = Arc::new(ManualClock::new("2024-01-01T00:00:00Z".parse().unwrap()));
        let limiter = limiter(20.0, 5.0, clock.clone());
        for _ in 0..20 {
            assert!(limiter.allow("a").await.unwrap());
        }
        assert!(!limiter.allow("a").await.unwrap());
        clock.advance_millis(1_000);
        assert!(limiter.allow("a").await.unwrap());
    }

    #[tokio::test]
    async fn separate_clients_have_independent_buckets() {
        let clock = Arc::new(ManualClock::new("2024-01-01T00:00:00Z".parse().unwrap()));
        let limiter = limiter(1.0, 1.0, clock);
        assert!(limiter.allow("a").await.unwrap());
        assert!(limiter.allow("b").await.unwrap());
        assert!(!limiter.allow("a").await.unwrap());
    }
}
