//! OIDC authentication and session lifecycle for the SVA platform.
//!
//! This crate implements the server-side login flow against an external
//! OIDC identity provider:
//! - Login redirects with PKCE and signed one-time state (`AuthService`,
//!   `state_cookie`)
//! - Authorization-code callback handling and session issuance
//! - Session-backed identity lookup with transparent token refresh
//! - Logout with RP-initiated end-session support
//!
//! Sessions and pending login states live in a TTL-capable key-value store
//! (`RedisStore` in production, `MemoryStore` in tests), with optional
//! AES-GCM encryption of the token fields at rest.
//!
//! # Flow
//!
//! `GET /auth/login` issues a redirect built by
//! [`AuthService::create_login_url`], which stores a one-time login state
//! keyed by the random `state` token. The provider sends the browser back
//! with `code` and `state`; [`AuthService::handle_callback`] consumes the
//! login state (exactly once), exchanges the code, and persists a session.
//! [`AuthService::get_session_user`] resolves the session on subsequent
//! requests, refreshing tokens when a refresh token is available.

pub mod claims;
pub mod config;
pub mod crypto;
pub mod error;
pub mod login_state;
pub mod oidc;
pub mod redis_store;
pub mod service;
pub mod session;
pub mod session_store;
pub mod state_cookie;
pub mod store;

// Re-export main types at crate root
pub use config::AuthConfig;
pub use crypto::TokenCipher;
pub use error::{AuthError, CryptoError, StoreError};
pub use login_state::{LOGIN_STATE_TTL, LoginState, LoginStateStore};
pub use oidc::{IdentityProvider, LoginInitiation, OidcClient, TokenSet};
pub use redis_store::{RedisStore, RetryPolicy};
pub use service::{AuthService, CallbackOutcome, CallbackParams};
pub use session::{Session, SessionUpdate, SessionUser};
pub use session_store::SessionStore;
pub use state_cookie::{LoginStateCookie, decode_login_state_cookie, encode_login_state_cookie};
pub use store::{KeyValueStore, MemoryStore};
