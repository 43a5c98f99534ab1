//! Authentication configuration resolved from the environment.
//!
//! All values are read from `SVA_AUTH_*` environment variables via the
//! `config` crate. Required values missing from the environment fail at
//! resolution time, not lazily on the first request.

use serde::Deserialize;
use std::time::Duration;

/// Configuration for the OIDC provider, cookies, and session lifetimes.
///
/// Fields with defaults can be omitted when loading from environment
/// variables; the remaining fields are required.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// The OIDC issuer URL (e.g., "https://auth.example.com/realms/main").
    /// Used for OIDC discovery.
    pub issuer: String,
    /// The OAuth2 client ID registered with the provider.
    pub client_id: String,
    /// The OAuth2 client secret.
    pub client_secret: String,
    /// The redirect URI for the authorization-code callback.
    pub redirect_uri: String,
    /// Where the provider (or the app) sends the browser after logout.
    pub post_logout_redirect_uri: String,
    /// HMAC key for signing the login-state cookie.
    pub login_state_secret: String,
    /// OAuth2 scopes to request as a space-separated string.
    /// Default: "openid profile email"
    #[serde(default = "default_scopes")]
    pub scopes: String,
    /// Name of the session cookie.
    #[serde(default = "default_session_cookie")]
    pub session_cookie: String,
    /// Name of the login-state cookie used during the redirect flow.
    #[serde(default = "default_login_state_cookie")]
    pub login_state_cookie: String,
    /// Session lifetime in milliseconds. Default: one hour.
    #[serde(default = "default_session_ttl_ms")]
    pub session_ttl_ms: u64,
    /// Key material for at-rest token encryption (base64 or hex, 32 bytes).
    /// When absent, tokens are stored in plaintext (degraded mode).
    #[serde(default)]
    pub encryption_key: Option<String>,
    /// Redis connection URL for the session and login-state stores.
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    /// Whether to set the Secure flag on cookies (requires HTTPS).
    /// Defaults to true for production safety; set to false for local HTTP
    /// development.
    #[serde(default = "default_secure_cookies")]
    pub secure_cookies: bool,
}

fn default_scopes() -> String {
    "openid profile email".to_string()
}

fn default_session_cookie() -> String {
    "sva_auth_session".to_string()
}

fn default_login_state_cookie() -> String {
    "sva_auth_state".to_string()
}

fn default_session_ttl_ms() -> u64 {
    60 * 60 * 1000
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_secure_cookies() -> bool {
    true
}

impl AuthConfig {
    /// Loads configuration from `SVA_AUTH_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::Environment::with_prefix("SVA_AUTH").try_parsing(true))
            .build()?
            .try_deserialize()
    }

    /// Returns the scopes to request, parsed from the space-separated string.
    #[must_use]
    pub fn scopes(&self) -> Vec<&str> {
        self.scopes.split_whitespace().collect()
    }

    /// Returns the session lifetime as a `Duration`.
    #[must_use]
    pub fn session_ttl(&self) -> Duration {
        Duration::from_millis(self.session_ttl_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_deserializes_with_defaults() {
        let json = r#"{
            "issuer": "https://auth.example.com/realms/main",
            "client_id": "sva-app",
            "client_secret": "secret",
            "redirect_uri": "https://app.example.com/auth/callback",
            "post_logout_redirect_uri": "https://app.example.com/",
            "login_state_secret": "hmac-secret"
        }"#;

        let config: AuthConfig = serde_json::from_str(json).expect("deserialize");

        assert_eq!(config.scopes, "openid profile email");
        assert_eq!(config.session_cookie, "sva_auth_session");
        assert_eq!(config.login_state_cookie, "sva_auth_state");
        assert_eq!(config.session_ttl_ms, 3_600_000);
        assert_eq!(config.redis_url, "redis://127.0.0.1:6379");
        assert!(config.encryption_key.is_none());
        assert!(config.secure_cookies);
    }

    #[test]
    fn config_requires_issuer() {
        let json = r#"{
            "client_id": "sva-app",
            "client_secret": "secret",
            "redirect_uri": "https://app.example.com/auth/callback",
            "post_logout_redirect_uri": "https://app.example.com/",
            "login_state_secret": "hmac-secret"
        }"#;

        let result: Result<AuthConfig, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn scopes_parses_space_separated() {
        let json = r#"{
            "issuer": "https://auth.example.com/realms/main",
            "client_id": "sva-app",
            "client_secret": "secret",
            "redirect_uri": "https://app.example.com/auth/callback",
            "post_logout_redirect_uri": "https://app.example.com/",
            "login_state_secret": "hmac-secret",
            "scopes": "openid profile email groups"
        }"#;

        let config: AuthConfig = serde_json::from_str(json).expect("deserialize");

        assert_eq!(
            config.scopes(),
            vec!["openid", "profile", "email", "groups"]
        );
    }

    #[test]
    fn session_ttl_converts_millis() {
        let json = r#"{
            "issuer": "https://auth.example.com/realms/main",
            "client_id": "sva-app",
            "client_secret": "secret",
            "redirect_uri": "https://app.example.com/auth/callback",
            "post_logout_redirect_uri": "https://app.example.com/",
            "login_state_secret": "hmac-secret",
            "session_ttl_ms": 5000
        }"#;

        let config: AuthConfig = serde_json::from_str(json).expect("deserialize");
        assert_eq!(config.session_ttl(), Duration::from_secs(5));
    }
}
