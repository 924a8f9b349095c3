//! Bounded retry with jittered exponential backoff and soft-error promotion.
//!
//! Delay before attempt k (k >= 2) is `min(base * 2^(k-2), max) + U(0, 50ms)`.
//! The engine does not consult the circuit breaker and does not record
//! breaker outcomes — wiring those together is the caller's job.

use crate::error::ProviderError;
use crate::sleeper::Sleeper;
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

const JITTER_CEIL_MILLIS: u64 = 50;

#[derive(Clone, Copy, Debug)]
pub struct RetryConfig {
    /// Number of *extra* attempts after the initial one.
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
        }
    }
}

impl RetryConfig {
    /// Delay before attempt `k` (1-indexed; k >= 2 only, attempt 1 fires
    /// immediately). Jitter is added separately so tests can isolate it.
    pub fn base_delay_for_attempt(&self, k: usize) -> Duration {
        debug_assert!(k >= 2);
        let exp = (k - 2) as u32;
        let scaled = self.base_delay.checked_mul(1u32.checked_shl(exp).unwrap_or(u32::MAX));
        match scaled {
            Some(d) if d <= self.max_delay => d,
            _ => self.max_delay,
        }
    }
}

pub struct RetryPolicy {
    config: RetryConfig,
    sleeper: Arc<dyn Sleeper>,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig, sleeper: Arc<dyn Sleeper>) -> Self {
        Self { config, sleeper }
    }

    /// Runs `op` up to `1 + max_retries` times. Any `Err(ProviderError)` for
    /// which `is_retryable()` is true is retried with a jittered backoff
    /// delay; a non-retryable error or exhausted attempts return
    /// immediately with the last outcome.
    pub async fn execute<T, Fut, Op>(&self, mut op: Op) -> Result<T, ProviderError>
    where
        Fut: Future<Output = Result<T, ProviderError>>,
        Op: FnMut() -> Fut,
    {
        let mut attempt = 1usize;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) => {
                    if attempt > self.config.max_retries {
                        return Err(err);
                    }
                    attempt += 1;
                    let delay = self.config.base_delay_for_attempt(attempt) + jitter(JITTER_CEIL_MILLIS);
                    self.sleeper.sleep(delay).await;
                }
            }
        }
    }
}

fn jitter(ceil_millis: u64) -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(0..=ceil_millis))
}
