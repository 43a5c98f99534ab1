//! Error types for the sva-auth crate.
//!
//! The taxonomy mirrors the recovery paths at the HTTP boundary:
//! - `AuthError`: authentication flow failures (login state, token exchange,
//!   refresh, session lookup)
//! - `StoreError`: key-value backend failures
//! - `CryptoError`: at-rest token encryption failures

use std::fmt;

/// Errors from authentication flow operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Configuration value is invalid (bad URL, malformed key).
    Config { reason: String },
    /// OIDC provider discovery failed.
    Discovery { reason: String },
    /// Login state missing or not matching the callback `state`.
    StateInvalid,
    /// Login state found but past its TTL.
    StateExpired,
    /// The provider rejected the authorization code.
    TokenExchange { reason: String },
    /// The provider rejected the refresh token.
    Refresh { reason: String },
    /// Update was called for a session id that does not exist.
    SessionNotFound { session_id: String },
    /// The backing key-value store failed.
    Store { reason: String },
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { reason } => {
                write!(f, "auth configuration error: {reason}")
            }
            Self::Discovery { reason } => {
                write!(f, "OIDC discovery error: {reason}")
            }
            Self::StateInvalid => {
                write!(f, "invalid login state")
            }
            Self::StateExpired => {
                write!(f, "login state has expired")
            }
            Self::TokenExchange { reason } => {
                write!(f, "token exchange failed: {reason}")
            }
            Self::Refresh { reason } => {
                write!(f, "token refresh failed: {reason}")
            }
            Self::SessionNotFound { session_id } => {
                write!(f, "session not found: {session_id}")
            }
            Self::Store { reason } => {
                write!(f, "session store error: {reason}")
            }
        }
    }
}

impl std::error::Error for AuthError {}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        Self::Store {
            reason: err.to_string(),
        }
    }
}

/// Errors from the key-value store backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backend rejected or failed the operation.
    Backend { reason: String },
    /// A stored value could not be serialized or deserialized.
    Serialization { reason: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Backend { reason } => {
                write!(f, "store backend error: {reason}")
            }
            Self::Serialization { reason } => {
                write!(f, "store serialization error: {reason}")
            }
        }
    }
}

impl std::error::Error for StoreError {}

/// Errors from at-rest token encryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// The configured key material is not a valid 32-byte key.
    InvalidKey { reason: String },
    /// Encryption failed.
    Encryption { reason: String },
    /// Decryption failed (wrong key, corrupted or unencrypted input).
    Decryption { reason: String },
}

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidKey { reason } => {
                write!(f, "invalid encryption key: {reason}")
            }
            Self::Encryption { reason } => {
                write!(f, "token encryption failed: {reason}")
            }
            Self::Decryption { reason } => {
                write!(f, "token decryption failed: {reason}")
            }
        }
    }
}

impl std::error::Error for CryptoError {}
