//! Key-value store abstraction for sessions and login states.
//!
//! Both stores persist JSON values under namespaced keys with a TTL. The
//! production backend is Redis (see [`crate::redis_store`]); the in-memory
//! implementation here exists as a test double and single-process fallback.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::StoreError;

/// A namespaced key-value store with per-key TTL.
///
/// This is the contract the authentication core expects from its backing
/// store. Connection management, pooling, and retries live behind the
/// implementation.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Stores a value under `key`, expiring after `ttl`.
    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError>;

    /// Returns the value for `key`, or `None` when absent or expired.
    async fn fetch(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Atomically fetches and deletes the value for `key`.
    ///
    /// Two concurrent `take` calls for the same key must not both observe
    /// the value: at most one wins, the other sees `None`.
    async fn take(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Deletes `key`. Deleting an absent key is not an error.
    async fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Returns the remaining TTL for `key`, or `None` when the key is
    /// absent or has no expiry.
    async fn remaining_ttl(&self, key: &str) -> Result<Option<Duration>, StoreError>;

    /// Returns all keys starting with `prefix`. Best-effort, for
    /// administrative introspection and sweeps.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Whether the backend evicts expired keys on its own. Stores that do
    /// can skip explicit sweeps.
    fn has_native_expiry(&self) -> bool;
}

struct StoredEntry {
    value: String,
    expires_at: Instant,
}

impl StoredEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

fn lock_entries(
    entries: &Mutex<HashMap<String, StoredEntry>>,
) -> Result<std::sync::MutexGuard<'_, HashMap<String, StoredEntry>>, StoreError> {
    entries.lock().map_err(|_| StoreError::Backend {
        reason: "store lock poisoned".to_string(),
    })
}

/// In-memory key-value store with per-entry deadlines.
///
/// Expired entries are treated as absent and pruned on access; untouched
/// keys linger until a sweep walks them via [`keys`](KeyValueStore::keys).
/// `take` removes the entry inside the same lock as the lookup, which gives
/// the exactly-once consume guarantee without external coordination.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, StoredEntry>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError> {
        let mut entries = lock_entries(&self.entries)?;
        entries.insert(
            key.to_string(),
            StoredEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn fetch(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut entries = lock_entries(&self.entries)?;
        let now = Instant::now();
        match entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn take(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut entries = lock_entries(&self.entries)?;
        let now = Instant::now();
        match entries.remove(key) {
            Some(entry) if entry.is_expired(now) => Ok(None),
            Some(entry) => Ok(Some(entry.value)),
            None => Ok(None),
        }
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = lock_entries(&self.entries)?;
        entries.remove(key);
        Ok(())
    }

    async fn remaining_ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let entries = lock_entries(&self.entries)?;
        let now = Instant::now();
        Ok(entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.expires_at.saturating_duration_since(now)))
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut entries = lock_entries(&self.entries)?;
        let now = Instant::now();
        entries.retain(|_, entry| !entry.is_expired(now));
        Ok(entries
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn has_native_expiry(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn put_then_fetch_round_trips() {
        let store = MemoryStore::new();
        store
            .put("k1", "v1".to_string(), Duration::from_secs(10))
            .await
            .expect("put");

        assert_eq!(
            store.fetch("k1").await.expect("fetch"),
            Some("v1".to_string())
        );
    }

    #[tokio::test]
    async fn fetch_missing_key_is_none() {
        let store = MemoryStore::new();
        assert_eq!(store.fetch("absent").await.expect("fetch"), None);
    }

    #[tokio::test]
    async fn expired_entry_is_absent() {
        let store = MemoryStore::new();
        store
            .put("k1", "v1".to_string(), Duration::from_millis(10))
            .await
            .expect("put");

        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(store.fetch("k1").await.expect("fetch"), None);
    }

    #[tokio::test]
    async fn take_returns_value_exactly_once() {
        let store = MemoryStore::new();
        store
            .put("k1", "v1".to_string(), Duration::from_secs(10))
            .await
            .expect("put");

        assert_eq!(
            store.take("k1").await.expect("take"),
            Some("v1".to_string())
        );
        assert_eq!(store.take("k1").await.expect("take"), None);
        assert_eq!(store.fetch("k1").await.expect("fetch"), None);
    }

    #[tokio::test]
    async fn concurrent_take_has_at_most_one_winner() {
        let store = Arc::new(MemoryStore::new());
        store
            .put("k1", "v1".to_string(), Duration::from_secs(10))
            .await
            .expect("put");

        let a = {
            let store = store.clone();
            tokio::spawn(async move { store.take("k1").await.expect("take") })
        };
        let b = {
            let store = store.clone();
            tokio::spawn(async move { store.take("k1").await.expect("take") })
        };

        let (a, b) = (a.await.expect("join"), b.await.expect("join"));
        let winners = [a, b].into_iter().flatten().count();
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let store = MemoryStore::new();
        store
            .put("k1", "v1".to_string(), Duration::from_secs(10))
            .await
            .expect("put");

        store.remove("k1").await.expect("remove");
        store.remove("k1").await.expect("remove again");
        assert_eq!(store.fetch("k1").await.expect("fetch"), None);
    }

    #[tokio::test]
    async fn remaining_ttl_decreases_over_time() {
        let store = MemoryStore::new();
        store
            .put("k1", "v1".to_string(), Duration::from_secs(10))
            .await
            .expect("put");

        tokio::time::sleep(Duration::from_millis(50)).await;

        let remaining = store
            .remaining_ttl("k1")
            .await
            .expect("ttl")
            .expect("key present");
        assert!(remaining <= Duration::from_secs(10));
        assert!(remaining >= Duration::from_secs(8));
    }

    #[tokio::test]
    async fn keys_filters_by_prefix_and_prunes_expired() {
        let store = MemoryStore::new();
        store
            .put("session:a", "1".to_string(), Duration::from_secs(10))
            .await
            .expect("put");
        store
            .put("session:b", "2".to_string(), Duration::from_millis(10))
            .await
            .expect("put");
        store
            .put("login_state:c", "3".to_string(), Duration::from_secs(10))
            .await
            .expect("put");

        tokio::time::sleep(Duration::from_millis(30)).await;

        let mut keys = store.keys("session:").await.expect("keys");
        keys.sort();
        assert_eq!(keys, vec!["session:a"]);
    }
}
