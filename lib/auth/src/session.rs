//! Session types for authenticated users.
//!
//! A session is created after a successful authorization-code exchange and
//! holds the user's identity plus the provider tokens. Sessions are owned
//! by the session store; the auth service re-reads them on every call
//! instead of caching.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sva_core::SessionId;

/// Identity derived from token claims, embedded in the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    /// The subject claim (unique user identifier from the provider).
    pub id: String,
    /// Display name resolved from the name claims.
    pub name: String,
    /// Email address, when the provider supplies one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// De-duplicated role set extracted from the token claims.
    #[serde(default)]
    pub roles: Vec<String>,
}

/// One authenticated browser session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Unique identifier; its display form is the session cookie value.
    pub id: SessionId,
    /// The authenticated user.
    pub user: SessionUser,
    /// OIDC access token.
    pub access_token: String,
    /// OIDC refresh token, when the provider issued one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Raw ID token, kept for the end-session hint at logout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    /// When the session was created (epoch millis on the wire).
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    /// Access-token expiry. This is not the session lifetime; the session
    /// TTL is enforced by the store.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_milliseconds_option"
    )]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Returns true when the access token has an expiry and it is in the
    /// past.
    #[must_use]
    pub fn is_access_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at < now)
    }
}

/// Partial update applied to a stored session.
///
/// `None` fields keep the stored value, which is how refresh responses that
/// omit a token fall back to the previous one.
#[derive(Debug, Clone, Default)]
pub struct SessionUpdate {
    /// Replacement user identity.
    pub user: Option<SessionUser>,
    /// Replacement access token.
    pub access_token: Option<String>,
    /// Replacement refresh token.
    pub refresh_token: Option<String>,
    /// Replacement ID token.
    pub id_token: Option<String>,
    /// Replacement access-token expiry.
    pub expires_at: Option<DateTime<Utc>>,
}

impl SessionUpdate {
    /// Applies this update to a session, keeping stored values for fields
    /// the update leaves unset.
    pub(crate) fn apply(self, session: &mut Session) {
        if let Some(user) = self.user {
            session.user = user;
        }
        if let Some(access_token) = self.access_token {
            session.access_token = access_token;
        }
        if let Some(refresh_token) = self.refresh_token {
            session.refresh_token = Some(refresh_token);
        }
        if let Some(id_token) = self.id_token {
            session.id_token = Some(id_token);
        }
        if let Some(expires_at) = self.expires_at {
            session.expires_at = Some(expires_at);
        }
    }
}
