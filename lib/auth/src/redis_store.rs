//! Redis-backed implementation of the key-value store contract.
//!
//! Sessions live under `session:{id}` and login states under
//! `login_state:{state}`, both as JSON with a Redis-enforced TTL. Redis
//! evicts expired keys on its own, so explicit sweeps are a no-op for this
//! backend.

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use std::future::Future;
use std::time::Duration;

use crate::error::StoreError;
use crate::store::KeyValueStore;

/// Bounded exponential backoff for transient Redis failures.
///
/// Attempt `n` (1-based) sleeps `base_delay * 2^(n-1)`, capped at
/// [`RetryPolicy::MAX_DELAY`]. Retries stop after `max_attempts` total
/// attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts before giving up (including the first).
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Upper bound on any single backoff delay.
    pub const MAX_DELAY: Duration = Duration::from_secs(2);

    /// Returns the delay to sleep before the given retry attempt (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(Self::MAX_DELAY)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(50),
        }
    }
}

/// Redis store over a multiplexed async connection.
pub struct RedisStore {
    connection: MultiplexedConnection,
    retry: RetryPolicy,
}

impl RedisStore {
    /// Connects to Redis at the given URL.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Backend` when the URL is invalid or the
    /// connection cannot be established.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(|e| StoreError::Backend {
            reason: format!("invalid redis URL: {e}"),
        })?;
        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StoreError::Backend {
                reason: format!("redis connection failed: {e}"),
            })?;
        tracing::info!(url, "connected to redis");
        Ok(Self {
            connection,
            retry: RetryPolicy::default(),
        })
    }

    /// Replaces the default retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn with_retry_loop<T, F, Fut>(&self, mut op: F) -> Result<T, StoreError>
    where
        F: FnMut(MultiplexedConnection) -> Fut,
        Fut: Future<Output = redis::RedisResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match op(self.connection.clone()).await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    tracing::warn!(
                        error = %err,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "redis operation failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    return Err(StoreError::Backend {
                        reason: err.to_string(),
                    });
                }
            }
        }
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError> {
        let key = key.to_string();
        let ttl_secs = ttl.as_secs().max(1);
        self.with_retry_loop(move |mut conn| {
            let key = key.clone();
            let value = value.clone();
            async move { conn.set_ex(key, value, ttl_secs).await }
        })
        .await
    }

    async fn fetch(&self, key: &str) -> Result<Option<String>, StoreError> {
        let key = key.to_string();
        self.with_retry_loop(move |mut conn| {
            let key = key.clone();
            async move { conn.get(key).await }
        })
        .await
    }

    async fn take(&self, key: &str) -> Result<Option<String>, StoreError> {
        // GETDEL is atomic server-side; concurrent consumers race on the
        // single Redis command, so at most one sees the value.
        let key = key.to_string();
        self.with_retry_loop(move |mut conn| {
            let key = key.clone();
            async move {
                redis::cmd("GETDEL")
                    .arg(key)
                    .query_async(&mut conn)
                    .await
            }
        })
        .await
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let key = key.to_string();
        self.with_retry_loop(move |mut conn| {
            let key = key.clone();
            async move { conn.del(key).await }
        })
        .await
    }

    async fn remaining_ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let key = key.to_string();
        let ttl_secs: i64 = self
            .with_retry_loop(move |mut conn| {
                let key = key.clone();
                async move { conn.ttl(key).await }
            })
            .await?;

        // Redis returns -2 for a missing key and -1 for a key without expiry.
        if ttl_secs > 0 {
            Ok(Some(Duration::from_secs(ttl_secs as u64)))
        } else {
            Ok(None)
        }
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let pattern = format!("{prefix}*");
        self.with_retry_loop(move |mut conn| {
            let pattern = pattern.clone();
            async move { conn.keys(pattern).await }
        })
        .await
    }

    fn has_native_expiry(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_doubles_per_attempt() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(50),
        };

        assert_eq!(policy.delay_for(1), Duration::from_millis(50));
        assert_eq!(policy.delay_for(2), Duration::from_millis(100));
        assert_eq!(policy.delay_for(3), Duration::from_millis(200));
    }

    #[test]
    fn retry_delay_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(500),
        };

        assert_eq!(policy.delay_for(8), RetryPolicy::MAX_DELAY);
    }

    #[test]
    fn default_policy_bounds_attempts() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
    }
}
