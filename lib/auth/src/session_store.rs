//! Durable session persistence with TTL and at-rest token encryption.
//!
//! Sessions live under `session:{id}` as JSON. When a cipher is configured
//! the token fields are encrypted before serialization and decrypted on
//! read; a decryption failure is tolerated so that sessions written before
//! encryption was enabled stay readable through the transition.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use sva_core::SessionId;

use crate::crypto::TokenCipher;
use crate::error::AuthError;
use crate::session::{Session, SessionUpdate};
use crate::store::KeyValueStore;

const KEY_PREFIX: &str = "session:";

/// Store of authenticated sessions over a TTL-capable backend.
pub struct SessionStore {
    store: Arc<dyn KeyValueStore>,
    cipher: Option<TokenCipher>,
    default_ttl: Duration,
}

impl SessionStore {
    /// Creates a store over the given backend.
    ///
    /// Without a cipher, token fields are persisted in plaintext; this is
    /// the explicit degraded mode for deployments without an encryption
    /// key.
    #[must_use]
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        cipher: Option<TokenCipher>,
        default_ttl: Duration,
    ) -> Self {
        Self {
            store,
            cipher,
            default_ttl,
        }
    }

    /// Persists a new session with the default TTL.
    pub async fn create(&self, session: &Session) -> Result<(), AuthError> {
        self.create_with_ttl(session, self.default_ttl).await
    }

    /// Persists a new session with an explicit TTL.
    pub async fn create_with_ttl(
        &self,
        session: &Session,
        ttl: Duration,
    ) -> Result<(), AuthError> {
        let value = self.serialize(session)?;
        self.store
            .put(&session_key(&session.id), value, ttl)
            .await?;
        tracing::debug!(session_id = %session.id, ttl_secs = ttl.as_secs(), "session created");
        Ok(())
    }

    /// Returns the session for `id`, or `None` when absent or expired.
    pub async fn get(&self, id: &SessionId) -> Result<Option<Session>, AuthError> {
        let Some(value) = self.store.fetch(&session_key(id)).await? else {
            return Ok(None);
        };
        let mut session: Session =
            serde_json::from_str(&value).map_err(|e| AuthError::Store {
                reason: e.to_string(),
            })?;
        self.decrypt_tokens(&mut session);
        Ok(Some(session))
    }

    /// Applies a partial update, preserving the remaining TTL of the key.
    ///
    /// This is not an upsert: updating an absent session is a
    /// `SessionNotFound` error. Concurrent updates of the same session are
    /// last-writer-wins.
    pub async fn update(&self, id: &SessionId, update: SessionUpdate) -> Result<(), AuthError> {
        let key = session_key(id);
        let mut session = self
            .get(id)
            .await?
            .ok_or_else(|| AuthError::SessionNotFound {
                session_id: id.to_string(),
            })?;

        update.apply(&mut session);

        let ttl = self
            .store
            .remaining_ttl(&key)
            .await?
            .unwrap_or(self.default_ttl);
        let value = self.serialize(&session)?;
        self.store.put(&key, value, ttl).await?;
        tracing::debug!(session_id = %id, ttl_secs = ttl.as_secs(), "session updated");
        Ok(())
    }

    /// Deletes the session for `id`. Idempotent.
    pub async fn delete(&self, id: &SessionId) -> Result<(), AuthError> {
        self.store.remove(&session_key(id)).await?;
        tracing::debug!(session_id = %id, "session deleted");
        Ok(())
    }

    /// Returns the number of live sessions. Best-effort.
    pub async fn count(&self) -> Result<usize, AuthError> {
        Ok(self.store.keys(KEY_PREFIX).await?.len())
    }

    /// Returns the ids of live sessions. Best-effort.
    pub async fn list_ids(&self) -> Result<Vec<String>, AuthError> {
        Ok(self
            .store
            .keys(KEY_PREFIX)
            .await?
            .into_iter()
            .map(|key| key.trim_start_matches(KEY_PREFIX).to_string())
            .collect())
    }

    /// Removes sessions older than `ttl`.
    ///
    /// A no-op when the backend evicts expired keys natively. Returns the
    /// number of removed sessions.
    pub async fn sweep_expired(
        &self,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<u64, AuthError> {
        if self.store.has_native_expiry() {
            return Ok(0);
        }

        let Ok(ttl) = chrono::Duration::from_std(ttl) else {
            return Ok(0);
        };

        let mut removed = 0;
        for key in self.store.keys(KEY_PREFIX).await? {
            let Some(value) = self.store.fetch(&key).await? else {
                continue;
            };
            let expired = match serde_json::from_str::<Session>(&value) {
                Ok(session) => now.signed_duration_since(session.created_at) > ttl,
                Err(_) => true,
            };
            if expired {
                self.store.remove(&key).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn serialize(&self, session: &Session) -> Result<String, AuthError> {
        let mut to_store = session.clone();
        self.encrypt_tokens(&mut to_store)?;
        serde_json::to_string(&to_store).map_err(|e| AuthError::Store {
            reason: e.to_string(),
        })
    }

    fn encrypt_tokens(&self, session: &mut Session) -> Result<(), AuthError> {
        let Some(cipher) = &self.cipher else {
            return Ok(());
        };
        let encrypt = |value: &str| {
            cipher.encrypt(value).map_err(|e| AuthError::Store {
                reason: e.to_string(),
            })
        };

        session.access_token = encrypt(&session.access_token)?;
        if let Some(refresh_token) = &session.refresh_token {
            session.refresh_token = Some(encrypt(refresh_token)?);
        }
        if let Some(id_token) = &session.id_token {
            session.id_token = Some(encrypt(id_token)?);
        }
        Ok(())
    }

    /// Decrypts token fields in place. A field that fails to decrypt is
    /// kept as-is and logged, so plaintext sessions written before
    /// encryption was enabled remain readable.
    fn decrypt_tokens(&self, session: &mut Session) {
        let Some(cipher) = &self.cipher else {
            return;
        };
        let decrypt = |field: &str, value: &mut String| match cipher.decrypt(value) {
            Ok(plain) => *value = plain,
            Err(e) => {
                tracing::warn!(field, error = %e, "token field failed to decrypt, keeping raw value");
            }
        };

        decrypt("access_token", &mut session.access_token);
        if let Some(refresh_token) = &mut session.refresh_token {
            decrypt("refresh_token", refresh_token);
        }
        if let Some(id_token) = &mut session.id_token {
            decrypt("id_token", id_token);
        }
    }
}

fn session_key(id: &SessionId) -> String {
    format!("{KEY_PREFIX}{id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionUser;
    use crate::store::MemoryStore;
    use base64::Engine;

    fn test_cipher() -> TokenCipher {
        let key = base64::engine::general_purpose::STANDARD.encode([b'k'; 32]);
        TokenCipher::new(&key).expect("create cipher")
    }

    fn plain_store() -> SessionStore {
        SessionStore::new(Arc::new(MemoryStore::new()), None, Duration::from_secs(60))
    }

    fn encrypted_store() -> (Arc<MemoryStore>, SessionStore) {
        let backend = Arc::new(MemoryStore::new());
        let store = SessionStore::new(backend.clone(), Some(test_cipher()), Duration::from_secs(60));
        (backend, store)
    }

    fn test_session() -> Session {
        let created_at =
            DateTime::<Utc>::from_timestamp_millis(1_700_000_000_000).expect("timestamp");
        Session {
            id: SessionId::new(),
            user: SessionUser {
                id: "u1".to_string(),
                name: "Max".to_string(),
                email: None,
                roles: vec!["user".to_string()],
            },
            access_token: "access-token".to_string(),
            refresh_token: Some("refresh-token".to_string()),
            id_token: Some("id-token".to_string()),
            created_at,
            expires_at: Some(created_at + chrono::Duration::minutes(5)),
        }
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let store = plain_store();
        let session = test_session();
        store.create(&session).await.expect("create");

        let loaded = store
            .get(&session.id)
            .await
            .expect("get")
            .expect("session present");
        assert_eq!(loaded, session);
    }

    #[tokio::test]
    async fn get_missing_session_is_none() {
        let store = plain_store();
        assert!(store.get(&SessionId::new()).await.expect("get").is_none());
    }

    #[tokio::test]
    async fn encrypted_round_trip_preserves_tokens() {
        let (_, store) = encrypted_store();
        let session = test_session();
        store.create(&session).await.expect("create");

        let loaded = store
            .get(&session.id)
            .await
            .expect("get")
            .expect("session present");
        assert_eq!(loaded, session);
    }

    #[tokio::test]
    async fn tokens_are_not_stored_in_plaintext() {
        let (backend, store) = encrypted_store();
        let session = test_session();
        store.create(&session).await.expect("create");

        let raw = backend
            .fetch(&session_key(&session.id))
            .await
            .expect("fetch")
            .expect("raw value present");
        assert!(!raw.contains("access-token"));
        assert!(!raw.contains("refresh-token"));
        assert!(!raw.contains("id-token"));
    }

    #[tokio::test]
    async fn plaintext_session_readable_after_enabling_encryption() {
        // A session written without a cipher must still load once
        // encryption is turned on: decryption failure keeps the raw value.
        let backend = Arc::new(MemoryStore::new());
        let plain = SessionStore::new(backend.clone(), None, Duration::from_secs(60));
        let session = test_session();
        plain.create(&session).await.expect("create");

        let encrypted =
            SessionStore::new(backend, Some(test_cipher()), Duration::from_secs(60));
        let loaded = encrypted
            .get(&session.id)
            .await
            .expect("get")
            .expect("session present");
        assert_eq!(loaded.access_token, "access-token");
    }

    #[tokio::test]
    async fn update_preserves_remaining_ttl() {
        let backend = Arc::new(MemoryStore::new());
        let store = SessionStore::new(backend.clone(), None, Duration::from_secs(60));
        let session = test_session();
        store
            .create_with_ttl(&session, Duration::from_secs(10))
            .await
            .expect("create");

        tokio::time::sleep(Duration::from_millis(100)).await;

        store
            .update(
                &session.id,
                SessionUpdate {
                    access_token: Some("rotated".to_string()),
                    ..SessionUpdate::default()
                },
            )
            .await
            .expect("update");

        let remaining = backend
            .remaining_ttl(&session_key(&session.id))
            .await
            .expect("ttl")
            .expect("key present");
        // Remaining TTL tracks the original deadline: neither reset to the
        // create TTL nor to the store default.
        assert!(remaining <= Duration::from_secs(10));
        assert!(remaining >= Duration::from_secs(8));

        let loaded = store
            .get(&session.id)
            .await
            .expect("get")
            .expect("session present");
        assert_eq!(loaded.access_token, "rotated");
    }

    #[tokio::test]
    async fn update_missing_session_is_not_found() {
        let store = plain_store();
        let result = store
            .update(&SessionId::new(), SessionUpdate::default())
            .await;
        assert!(matches!(result, Err(AuthError::SessionNotFound { .. })));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = plain_store();
        let session = test_session();
        store.create(&session).await.expect("create");

        store.delete(&session.id).await.expect("delete");
        store.delete(&session.id).await.expect("delete again");
        assert!(store.get(&session.id).await.expect("get").is_none());
    }

    #[tokio::test]
    async fn count_and_list_ids_reflect_live_sessions() {
        let store = plain_store();
        let first = test_session();
        let second = Session {
            id: SessionId::new(),
            ..test_session()
        };
        store.create(&first).await.expect("create");
        store.create(&second).await.expect("create");

        assert_eq!(store.count().await.expect("count"), 2);
        let ids = store.list_ids().await.expect("list");
        assert!(ids.contains(&first.id.to_string()));
        assert!(ids.contains(&second.id.to_string()));
    }

    #[tokio::test]
    async fn sweep_removes_sessions_past_session_ttl() {
        let store = plain_store();
        let now = Utc::now();

        let mut stale = test_session();
        stale.created_at = now - chrono::Duration::hours(2);
        let mut fresh = Session {
            id: SessionId::new(),
            ..test_session()
        };
        fresh.created_at = now;

        store.create(&stale).await.expect("create");
        store.create(&fresh).await.expect("create");

        let removed = store
            .sweep_expired(now, Duration::from_secs(3600))
            .await
            .expect("sweep");
        assert_eq!(removed, 1);
        assert!(store.get(&stale.id).await.expect("get").is_none());
        assert!(store.get(&fresh.id).await.expect("get").is_some());
    }
}
