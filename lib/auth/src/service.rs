//! Authentication service orchestrating login, callback, identity lookup,
//! and logout.
//!
//! One login attempt moves through `STARTED` (redirect issued, login state
//! stored) to `SESSION_ACTIVE` (callback exchanged, session persisted).
//! The terminal failures are an invalid state, an expired state, and a
//! rejected code exchange; each maps to its own error variant so the HTTP
//! layer can signal them distinctly.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use sva_core::SessionId;

use crate::claims::{self, Claims};
use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::login_state::{LOGIN_STATE_TTL, LoginState, LoginStateStore};
use crate::oidc::{IdentityProvider, LoginInitiation, TokenSet};
use crate::session::{Session, SessionUpdate, SessionUser};
use crate::session_store::SessionStore;

/// Parameters of the authorization-code callback.
#[derive(Debug, Clone)]
pub struct CallbackParams {
    /// The authorization code from the provider.
    pub code: String,
    /// The `state` parameter from the provider.
    pub state: String,
    /// Issuer identifier some providers append to the callback.
    pub iss: Option<String>,
    /// Login state already resolved by the caller (signed-cookie
    /// transport). When absent the service consumes it from the store.
    pub login_state: Option<LoginState>,
}

/// Result of a successful callback.
#[derive(Debug, Clone)]
pub struct CallbackOutcome {
    /// Identifier of the newly created session.
    pub session_id: SessionId,
    /// The authenticated user.
    pub user: SessionUser,
}

/// Orchestrates the OIDC login flow and session lifecycle.
///
/// The service holds no per-request state: every session read goes through
/// the store, and the store handles are constructed once at startup and
/// injected here.
pub struct AuthService {
    config: AuthConfig,
    provider: Arc<dyn IdentityProvider>,
    sessions: SessionStore,
    login_states: LoginStateStore,
}

impl AuthService {
    /// Creates a service over the given provider and stores.
    #[must_use]
    pub fn new(
        config: AuthConfig,
        provider: Arc<dyn IdentityProvider>,
        sessions: SessionStore,
        login_states: LoginStateStore,
    ) -> Self {
        Self {
            config,
            provider,
            sessions,
            login_states,
        }
    }

    /// Returns the auth configuration.
    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Returns the session store, for administrative introspection.
    #[must_use]
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Returns the login-state store.
    #[must_use]
    pub fn login_states(&self) -> &LoginStateStore {
        &self.login_states
    }

    /// Builds the authorization URL and stores the login state.
    pub async fn create_login_url(&self) -> Result<LoginInitiation, AuthError> {
        let initiation = self.provider.authorization_url().await?;
        self.login_states
            .create(&initiation.state, &initiation.login_state)
            .await?;
        tracing::debug!("login redirect issued");
        Ok(initiation)
    }

    /// Exchanges the authorization code for tokens and creates a session.
    ///
    /// # Errors
    ///
    /// `StateInvalid` when no login state matches the callback `state`,
    /// `StateExpired` when it matches but is past its TTL, and
    /// `TokenExchange` when the provider rejects the code.
    pub async fn handle_callback(
        &self,
        params: CallbackParams,
    ) -> Result<CallbackOutcome, AuthError> {
        let now = Utc::now();

        let login_state = match params.login_state {
            Some(login_state) => Some(login_state),
            None => self
                .login_states
                .consume(&params.state)
                .await
                .unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "login state lookup failed");
                    None
                }),
        };
        let Some(login_state) = login_state else {
            return Err(AuthError::StateInvalid);
        };

        // Sweep only after resolving: a stale entry the backend has not yet
        // evicted must still reach the elapsed-time check below, so the
        // caller gets the distinct expired signal instead of "invalid".
        if let Err(e) = self.login_states.sweep_expired(now, LOGIN_STATE_TTL).await {
            tracing::warn!(error = %e, "login state sweep failed");
        }

        if login_state.is_expired(now, LOGIN_STATE_TTL) {
            return Err(AuthError::StateExpired);
        }

        let token_set = self
            .provider
            .exchange_code(&params.code, &login_state)
            .await?;
        let user = self.session_user_from_tokens(&token_set);

        let session_id = SessionId::new();
        let session = Session {
            id: session_id,
            user: user.clone(),
            access_token: token_set.access_token.clone(),
            refresh_token: token_set.refresh_token.clone(),
            id_token: token_set.id_token.clone(),
            created_at: now,
            expires_at: expires_at_from(now, token_set.expires_in),
        };
        self.sessions.create(&session).await?;

        if let Err(e) = self
            .sessions
            .sweep_expired(now, self.config.session_ttl())
            .await
        {
            tracing::warn!(error = %e, "session sweep failed");
        }

        tracing::info!(
            session_id = %session_id,
            user_id = %user.id,
            iss = ?params.iss,
            "session created from callback"
        );
        Ok(CallbackOutcome { session_id, user })
    }

    /// Resolves the session user, refreshing tokens when possible.
    ///
    /// A failed refresh only ends the session when the access token is
    /// already past its expiry; otherwise the existing session keeps being
    /// served so a transient provider failure does not log the user out.
    pub async fn get_session_user(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<SessionUser>, AuthError> {
        let session = match self.sessions.get(session_id).await {
            Ok(Some(session)) => session,
            Ok(None) => return Ok(None),
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "session read failed, treating as absent");
                return Ok(None);
            }
        };

        let now = Utc::now();
        if let Some(refresh_token) = session.refresh_token.clone() {
            if let Err(e) = self.refresh_session(session_id, &refresh_token, now).await {
                tracing::warn!(session_id = %session_id, error = %e, "token refresh failed");
                if session.is_access_expired(now) {
                    self.delete_best_effort(session_id).await;
                    return Ok(None);
                }
            }
        } else if session.is_access_expired(now) {
            self.delete_best_effort(session_id).await;
            return Ok(None);
        }

        if let Err(e) = self
            .sessions
            .sweep_expired(now, self.config.session_ttl())
            .await
        {
            tracing::warn!(error = %e, "session sweep failed");
        }

        // Return what is durably stored, never the pre-refresh snapshot.
        match self.sessions.get(session_id).await {
            Ok(session) => Ok(session.map(|s| s.user)),
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "session re-read failed, treating as absent");
                Ok(None)
            }
        }
    }

    /// Ends the session and returns the logout redirect URL.
    ///
    /// The session is deleted unconditionally. The provider's end-session
    /// URL is used when an ID token is available and the provider supports
    /// RP-initiated logout; every other case falls back to the configured
    /// post-logout redirect URI.
    pub async fn logout_session(&self, session_id: &SessionId) -> Result<String, AuthError> {
        let session = match self.sessions.get(session_id).await {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "session read failed during logout");
                None
            }
        };
        self.sessions.delete(session_id).await?;
        tracing::info!(session_id = %session_id, "session logged out");

        let Some(id_token) = session.and_then(|s| s.id_token) else {
            return Ok(self.config.post_logout_redirect_uri.clone());
        };

        match self
            .provider
            .end_session_url(&id_token, &self.config.post_logout_redirect_uri)
            .await
        {
            Ok(Some(url)) => Ok(url),
            Ok(None) => Ok(self.config.post_logout_redirect_uri.clone()),
            Err(e) => {
                tracing::warn!(error = %e, "end-session URL build failed, using post-logout redirect");
                Ok(self.config.post_logout_redirect_uri.clone())
            }
        }
    }

    /// Removes expired sessions and login states. A no-op on backends with
    /// native expiry. Returns the number of removed entries.
    pub async fn sweep_expired(&self) -> Result<u64, AuthError> {
        let now = Utc::now();
        let login_states = self.login_states.sweep_expired(now, LOGIN_STATE_TTL).await?;
        let sessions = self
            .sessions
            .sweep_expired(now, self.config.session_ttl())
            .await?;
        Ok(login_states + sessions)
    }

    async fn refresh_session(
        &self,
        session_id: &SessionId,
        refresh_token: &str,
        now: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        let token_set = self.provider.refresh(refresh_token).await?;
        let user = self.session_user_from_tokens(&token_set);

        // Unset fields keep the stored values: a refresh response that
        // omits a token falls back to the previous one.
        let update = SessionUpdate {
            user: Some(user),
            access_token: Some(token_set.access_token.clone()),
            refresh_token: token_set.refresh_token.clone(),
            id_token: token_set.id_token.clone(),
            expires_at: expires_at_from(now, token_set.expires_in),
        };
        self.sessions.update(session_id, update).await
    }

    /// Builds the session user from the token response claims.
    ///
    /// ID-token claims form the base and access-token claims override
    /// them, since access tokens usually carry the authorization-relevant
    /// values such as roles.
    fn session_user_from_tokens(&self, token_set: &TokenSet) -> SessionUser {
        let id_claims = token_set
            .id_token
            .as_deref()
            .and_then(claims::decode_unverified_payload);
        let access_claims = claims::decode_unverified_payload(&token_set.access_token);

        let mut merged: Claims = id_claims.unwrap_or_default();
        if let Some(access) = access_claims {
            for (key, value) in access {
                merged.insert(key, value);
            }
        }

        SessionUser {
            id: merged
                .get("sub")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            name: claims::resolve_display_name(&merged),
            email: merged
                .get("email")
                .and_then(|v| v.as_str())
                .map(String::from),
            roles: claims::extract_roles(&merged, Some(&self.config.client_id)),
        }
    }

    async fn delete_best_effort(&self, session_id: &SessionId) {
        if let Err(e) = self.sessions.delete(session_id).await {
            tracing::warn!(session_id = %session_id, error = %e, "session delete failed");
        }
    }
}

fn expires_at_from(
    now: DateTime<Utc>,
    expires_in: Option<std::time::Duration>,
) -> Option<DateTime<Utc>> {
    expires_in
        .and_then(|d| chrono::Duration::from_std(d).ok())
        .map(|d| now + d)
}
