use async_trait::async_trait;

/// Abstract storage interface for rate limit state (e.g., tokens).
///
/// This trait is designed to support both in-memory and distributed backends.
/// It assumes a key-value model where the value is numeric (tokens).
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Error type for storage operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Fetch the current state for a key.
    ///
    /// Returns `(tokens, last_updated_nanos)`.
    async fn get_state(&self, key: &str) -> Result<Option<(f64, u64)>, Self::Error>;

    /// Update the state for a key using a "Compare-And-Set" (CAS) semantic or atomic overwrite.
    ///
    /// * `key`: The bucket identifier.
    /// * `tokens`: The new token count.
    /// * `updated_at`: The new timestamp (nanos).
    /// * `prev_updated_at`: The previous timestamp read (optimistic locking).
    ///   If `None`, implies unconditional write (or first write).
    ///
    /// Returns `Ok(true)` if update succeeded, `Ok(false)` if race detected (retry needed).
    async fn set_state(
        &self,
        key: &str,
        tokens: f64,
        updated_at: u64,
        prev_updated_at: Option<u64>,
    ) -> Result<bool, Self::Error>;
}

use std::sync::{Arc, Mutex};
use std::collections::HashMap;

/// Simple in-memory token store.
#[derive(Default, Clone, Debug)]
pub struct InMemoryTokenStore {
    // Map key -> (tokens, last_updated_nanos)
    data: Arc<Mutex<HashMap<String, (f64, u64)>>>,
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    type Error = std::convert::Infallible;

    async fn get_state(&self, key: &str) -> Result<Option<(f64, u64)>, Self::Error> {
        let guard = self.data.lock().unwrap();
        Ok(guard.get(key).cloned())
    }

    async fn set_state(
        &self,
        key: &str,
        tokens: f64,
        updated_at: u64,
        prev_updated_at: Option<u64>,
    ) -> Result<bool, Self::Error> {
        let mut guard = self.data.lock().unwrap();
        
        if let Some(prev) = prev_updated_at {
            // Optimistic lock check
            if let Some(&(_, current_ts)) = guard.get(key) {
                if current_ts != prev {
                    return Ok(false); // Race detected
                }
            } else {
                // Key didn't exist, but we expected 'prev'. 
                // In TokenBucket logic, if get_state returned None, we use 'now' as prev.
                // If key now exists, it's a race.
                if guard.contains_key(key) {
                     return Ok(false);
                }
            }
        }

        guard.insert(key.to_string(), (tokens, updated_at));
        Ok(true)
    }
}

/// Shared-store backend: the bucket state lives in Redis so multiple
/// gateway instances admit against the same count. Reads, refills, the
/// capacity comparison, and the write all happen inside one Lua script so
/// the whole operation is atomic against the server, matching the
/// optimistic-lock contract `set_state` documents for a single instance.
pub struct RedisTokenStore {
    client: redis::Client,
}

const REFILL_AND_CAS_SCRIPT: &str = r#"
local current = redis.call('HMGET', KEYS[1], 'tokens', 'updated_at')
local stored_tokens = tonumber(current[1])
local stored_ts = tonumber(current[2])
local prev = tonumber(ARGV[3])
-- prev == -1 is the sentinel for "unconditional write" (Rust's `None`).
if prev ~= -1 then
    if stored_ts ~= nil and stored_ts ~= prev then
        return 0
    end
end
redis.call('HSET', KEYS[1], 'tokens', ARGV[1], 'updated_at', ARGV[2])
redis.call('EXPIRE', KEYS[1], 86400)
return 1
"#;

impl RedisTokenStore {
    pub fn new(redis_url: &str) -> redis::RedisResult<Self> {
        Ok(Self { client: redis::Client::open(redis_url)? })
    }
}

#[async_trait]
impl TokenStore for RedisTokenStore {
    type Error = redis::RedisError;

    async fn get_state(&self, key: &str) -> Result<Option<(f64, u64)>, Self::Error> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let raw: Option<(Option<f64>, Option<u64>)> =
            redis::cmd("HMGET").arg(key).arg("tokens").arg("updated_at").query_async(&mut conn).await?;
        Ok(match raw {
            Some((Some(tokens), Some(updated_at))) => Some((tokens, updated_at)),
            _ => None,
        })
    }

    async fn set_state(
        &self,
        key: &str,
        tokens: f64,
        updated_at: u64,
        prev_updated_at: Option<u64>,
    ) -> Result<bool, Self::Error> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let prev_arg = prev_updated_at.map(|v| v as i64).unwrap_or(-1);
        let result: i64 = redis::Script::new(REFILL_AND_CAS_SCRIPT)
            .key(key)
            .arg(tokens)
            .arg(updated_at)
            .arg(prev_arg)
            .invoke_async(&mut conn)
            .await?;
        Ok(result == 1)
    }
}

/// Backend selected once at startup: in-process for a single gateway
/// instance, Redis-backed when multiple instances must share admission
/// state. One concrete type either way, so `GatewayState` stays monomorphic
/// over `TokenStore` instead of needing a trait object for its error type.
pub enum AnyTokenStore {
    InMemory(InMemoryTokenStore),
    Redis(RedisTokenStore),
}

#[derive(Debug, thiserror::Error)]
pub enum AnyTokenStoreError {
    #[error(transparent)]
    Redis(#[from] redis::RedisError),
}

#[async_trait]
impl TokenStore for AnyTokenStore {
    type Error = AnyTokenStoreError;

    async fn get_state(&self, key: &str) -> Result<Option<(f64, u64)>, Self::Error> {
        match self {
            Self::InMemory(store) => Ok(store.get_state(key).await.unwrap_or_default()),
            Self::Redis(store) => Ok(store.get_state(key).await?),
        }
    }

    async fn set_state(
        &self,
        key: &str,
        tokens: f64,
        updated_at: u64,
        prev_updated_at: Option<u64>,
    ) -> Result<bool, Self::Error> {
        match self {
            Self::InMemory(store) => {
                Ok(store.set_state(key, tokens, updated_at, prev_updated_at).await.unwrap_or(false))
            }
            Self::Redis(store) => Ok(store.set_state(key, tokens, updated_at, prev_updated_at).await?),
        }
    }
}
