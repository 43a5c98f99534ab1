//! One-time login state correlating a redirect flow across requests.
//!
//! When a login redirect is issued, the PKCE verifier and nonce are stored
//! under the random `state` token. The callback consumes the entry exactly
//! once; a second callback with the same `state` (replayed or duplicated)
//! sees nothing. Entries expire after ten minutes whether or not consumed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::error::AuthError;
use crate::store::KeyValueStore;

/// How long a login attempt may take before the state is rejected.
pub const LOGIN_STATE_TTL: Duration = Duration::from_secs(600);

const KEY_PREFIX: &str = "login_state:";

/// Ephemeral state for one authorization attempt, keyed by `state`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginState {
    /// PKCE code verifier to present at token exchange.
    pub code_verifier: String,
    /// Nonce to verify against the ID token.
    pub nonce: String,
    /// When the login redirect was issued (epoch millis on the wire).
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl LoginState {
    /// Creates a login state stamped with the current time.
    #[must_use]
    pub fn new(code_verifier: String, nonce: String) -> Self {
        Self {
            code_verifier,
            nonce,
            created_at: Utc::now(),
        }
    }

    /// Returns true when strictly more than `ttl` has elapsed since
    /// creation.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        let Ok(ttl) = chrono::Duration::from_std(ttl) else {
            return false;
        };
        now.signed_duration_since(self.created_at) > ttl
    }
}

/// Store of pending login states, keyed by the `state` token.
pub struct LoginStateStore {
    store: Arc<dyn KeyValueStore>,
}

impl LoginStateStore {
    /// Creates a store over the given backend.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Persists a login state under its `state` token with the fixed TTL.
    pub async fn create(&self, state: &str, login_state: &LoginState) -> Result<(), AuthError> {
        let value =
            serde_json::to_string(login_state).map_err(|e| AuthError::Store {
                reason: e.to_string(),
            })?;
        self.store
            .put(&login_state_key(state), value, LOGIN_STATE_TTL)
            .await?;
        Ok(())
    }

    /// Atomically fetches and deletes the login state for `state`.
    ///
    /// Returns `None` when absent, already consumed, or evicted. The
    /// caller performs its own elapsed-time check on the returned value;
    /// this store does not hide entries the backend has not yet evicted.
    pub async fn consume(&self, state: &str) -> Result<Option<LoginState>, AuthError> {
        let Some(value) = self.store.take(&login_state_key(state)).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&value) {
            Ok(login_state) => Ok(Some(login_state)),
            Err(e) => {
                tracing::warn!(error = %e, "discarding undecodable login state");
                Ok(None)
            }
        }
    }

    /// Removes entries older than `ttl`.
    ///
    /// A no-op when the backend evicts expired keys natively. Returns the
    /// number of removed entries.
    pub async fn sweep_expired(
        &self,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<u64, AuthError> {
        if self.store.has_native_expiry() {
            return Ok(0);
        }

        let mut removed = 0;
        for key in self.store.keys(KEY_PREFIX).await? {
            let Some(value) = self.store.fetch(&key).await? else {
                continue;
            };
            let expired = match serde_json::from_str::<LoginState>(&value) {
                Ok(login_state) => login_state.is_expired(now, ttl),
                // Undecodable entries are dead weight either way.
                Err(_) => true,
            };
            if expired {
                self.store.remove(&key).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn login_state_key(state: &str) -> String {
    format!("{KEY_PREFIX}{state}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn test_store() -> LoginStateStore {
        LoginStateStore::new(Arc::new(MemoryStore::new()))
    }

    fn test_state(created_at: DateTime<Utc>) -> LoginState {
        LoginState {
            code_verifier: "verifier-123".to_string(),
            nonce: "nonce-456".to_string(),
            // Truncate to the millisecond precision of the wire format.
            created_at: DateTime::from_timestamp_millis(created_at.timestamp_millis())
                .expect("timestamp in range"),
        }
    }

    #[tokio::test]
    async fn consume_returns_value_exactly_once() {
        let store = test_store();
        let login_state = test_state(Utc::now());
        store.create("state-1", &login_state).await.expect("create");

        let first = store.consume("state-1").await.expect("consume");
        assert_eq!(first, Some(login_state));

        let second = store.consume("state-1").await.expect("consume");
        assert_eq!(second, None);
    }

    #[tokio::test]
    async fn consume_unknown_state_is_none() {
        let store = test_store();
        assert_eq!(store.consume("never-created").await.expect("consume"), None);
    }

    #[tokio::test]
    async fn consume_requires_exact_state_match() {
        let store = test_store();
        let login_state = test_state(Utc::now());
        store.create("state-1", &login_state).await.expect("create");

        assert_eq!(store.consume("state-").await.expect("consume"), None);
        assert_eq!(store.consume("state-12").await.expect("consume"), None);
        assert!(store.consume("state-1").await.expect("consume").is_some());
    }

    #[tokio::test]
    async fn stale_entry_still_returned_for_caller_expiry_check() {
        // The service distinguishes "expired" from "invalid"; the store
        // must not collapse the two by hiding stale-but-present entries.
        let store = test_store();
        let stale = test_state(Utc::now() - chrono::Duration::minutes(11));
        store.create("state-1", &stale).await.expect("create");

        let consumed = store
            .consume("state-1")
            .await
            .expect("consume")
            .expect("present");
        assert!(consumed.is_expired(Utc::now(), LOGIN_STATE_TTL));
    }

    #[tokio::test]
    async fn sweep_removes_only_stale_entries() {
        let store = test_store();
        let now = Utc::now();
        store
            .create("fresh", &test_state(now))
            .await
            .expect("create");
        store
            .create("stale", &test_state(now - chrono::Duration::minutes(11)))
            .await
            .expect("create");

        let removed = store
            .sweep_expired(now, LOGIN_STATE_TTL)
            .await
            .expect("sweep");
        assert_eq!(removed, 1);

        assert!(store.consume("fresh").await.expect("consume").is_some());
        assert_eq!(store.consume("stale").await.expect("consume"), None);
    }

    #[test]
    fn expiry_is_strictly_greater_than_ttl() {
        let created = DateTime::from_timestamp_millis(Utc::now().timestamp_millis())
            .expect("timestamp in range");
        let state = test_state(created);
        let ttl = Duration::from_secs(600);

        let just_inside = created + chrono::Duration::milliseconds(599_999);
        let exactly = created + chrono::Duration::milliseconds(600_000);
        let just_past = created + chrono::Duration::milliseconds(600_001);

        assert!(!state.is_expired(just_inside, ttl));
        assert!(!state.is_expired(exactly, ttl));
        assert!(state.is_expired(just_past, ttl));
    }

    #[test]
    fn login_state_json_uses_epoch_millis() {
        let state = test_state(
            DateTime::<Utc>::from_timestamp_millis(1_700_000_000_000).expect("timestamp"),
        );
        let json = serde_json::to_value(&state).expect("serialize");
        assert_eq!(json["created_at"], 1_700_000_000_000_i64);
    }
}
