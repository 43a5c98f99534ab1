//! OIDC client implementation using the openidconnect crate.
//!
//! Single point of contact with the identity provider: discovery (performed
//! once and cached for the process lifetime), authorization URLs with PKCE,
//! code exchange, refresh grants, and RP-initiated logout URLs.

use async_trait::async_trait;
use openidconnect::core::{CoreAuthenticationFlow, CoreClient};
use openidconnect::{
    AuthorizationCode, ClientId, ClientSecret, CsrfToken, IssuerUrl, Nonce, OAuth2TokenResponse,
    PkceCodeChallenge, PkceCodeVerifier, ProviderMetadataWithLogout, RedirectUrl, RefreshToken,
    Scope, TokenResponse,
};
use std::time::Duration;
use tokio::sync::OnceCell;

use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::login_state::LoginState;

/// Data returned when initiating a login redirect.
#[derive(Debug, Clone)]
pub struct LoginInitiation {
    /// The URL to redirect the user to for authentication.
    pub url: String,
    /// State parameter for CSRF protection.
    pub state: String,
    /// PKCE verifier and nonce to present on the callback.
    pub login_state: LoginState,
}

/// Result of a code exchange or refresh grant.
#[derive(Debug, Clone)]
pub struct TokenSet {
    /// The access token.
    pub access_token: String,
    /// Refresh token, when the provider issued one.
    pub refresh_token: Option<String>,
    /// Raw ID token, when present in the response.
    pub id_token: Option<String>,
    /// Access-token lifetime from the response.
    pub expires_in: Option<Duration>,
}

/// The identity-provider operations the auth service depends on.
///
/// Production uses [`OidcClient`]; tests substitute a stub.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Builds the authorization URL for redirecting the user, with a fresh
    /// PKCE challenge, state, and nonce.
    async fn authorization_url(&self) -> Result<LoginInitiation, AuthError>;

    /// Exchanges the authorization code for tokens, verifying the ID-token
    /// nonce against the stored login state.
    async fn exchange_code(
        &self,
        code: &str,
        login_state: &LoginState,
    ) -> Result<TokenSet, AuthError>;

    /// Performs a refresh-token grant.
    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, AuthError>;

    /// Builds the provider's end-session URL, or `None` when the provider
    /// does not support RP-initiated logout.
    async fn end_session_url(
        &self,
        id_token_hint: &str,
        post_logout_redirect_uri: &str,
    ) -> Result<Option<String>, AuthError>;
}

/// OIDC client for authenticating users against the configured issuer.
pub struct OidcClient {
    config: AuthConfig,
    http_client: reqwest::Client,
    metadata: OnceCell<ProviderMetadataWithLogout>,
}

impl OidcClient {
    /// Creates a client. Discovery is deferred to the first operation (or
    /// an explicit [`discover`](Self::discover) call at startup).
    pub fn new(config: AuthConfig) -> Result<Self, AuthError> {
        let http_client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| AuthError::Config {
                reason: format!("failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            config,
            http_client,
            metadata: OnceCell::new(),
        })
    }

    /// Performs provider discovery eagerly.
    pub async fn discover(&self) -> Result<(), AuthError> {
        self.provider_metadata().await.map(|_| ())
    }

    /// Returns the cached provider metadata, discovering it on first use.
    ///
    /// Concurrent first calls share one in-flight discovery; a failed
    /// discovery is not cached and is retried on the next call.
    async fn provider_metadata(&self) -> Result<&ProviderMetadataWithLogout, AuthError> {
        self.metadata
            .get_or_try_init(|| async {
                let issuer_url =
                    IssuerUrl::new(self.config.issuer.clone()).map_err(|e| AuthError::Config {
                        reason: format!("invalid issuer URL: {e}"),
                    })?;

                tracing::info!(issuer = %self.config.issuer, "discovering OIDC provider metadata");
                ProviderMetadataWithLogout::discover_async(issuer_url, &self.http_client)
                    .await
                    .map_err(|e| AuthError::Discovery {
                        reason: e.to_string(),
                    })
            })
            .await
    }

    fn redirect_url(&self) -> Result<RedirectUrl, AuthError> {
        RedirectUrl::new(self.config.redirect_uri.clone()).map_err(|e| AuthError::Config {
            reason: format!("invalid redirect URI: {e}"),
        })
    }
}

#[async_trait]
impl IdentityProvider for OidcClient {
    async fn authorization_url(&self) -> Result<LoginInitiation, AuthError> {
        let metadata = self.provider_metadata().await?.clone();
        let client = CoreClient::from_provider_metadata(
            metadata,
            ClientId::new(self.config.client_id.clone()),
            Some(ClientSecret::new(self.config.client_secret.clone())),
        )
        .set_redirect_uri(self.redirect_url()?);

        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();

        let mut auth_request = client
            .authorize_url(
                CoreAuthenticationFlow::AuthorizationCode,
                CsrfToken::new_random,
                Nonce::new_random,
            )
            .set_pkce_challenge(pkce_challenge);

        for scope in self.config.scopes() {
            auth_request = auth_request.add_scope(Scope::new(scope.to_string()));
        }

        let (auth_url, csrf_token, nonce) = auth_request.url();

        Ok(LoginInitiation {
            url: auth_url.to_string(),
            state: csrf_token.secret().clone(),
            login_state: LoginState::new(pkce_verifier.secret().clone(), nonce.secret().clone()),
        })
    }

    async fn exchange_code(
        &self,
        code: &str,
        login_state: &LoginState,
    ) -> Result<TokenSet, AuthError> {
        let metadata = self.provider_metadata().await?.clone();
        let client = CoreClient::from_provider_metadata(
            metadata,
            ClientId::new(self.config.client_id.clone()),
            Some(ClientSecret::new(self.config.client_secret.clone())),
        )
        .set_redirect_uri(self.redirect_url()?);

        let token_request = client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .map_err(|e| AuthError::TokenExchange {
                reason: format!("token endpoint error: {e}"),
            })?;

        let token_response = token_request
            .set_pkce_verifier(PkceCodeVerifier::new(login_state.code_verifier.clone()))
            .request_async(&self.http_client)
            .await
            .map_err(|e| AuthError::TokenExchange {
                reason: e.to_string(),
            })?;

        // Verify the ID token signature and nonce before trusting anything
        // in the response.
        let id_token = token_response
            .id_token()
            .ok_or_else(|| AuthError::TokenExchange {
                reason: "no ID token in response".to_string(),
            })?;
        let nonce = Nonce::new(login_state.nonce.clone());
        id_token
            .claims(&client.id_token_verifier(), &nonce)
            .map_err(|e| AuthError::TokenExchange {
                reason: format!("ID token validation failed: {e}"),
            })?;

        token_set_from_response(&token_response).map_err(|reason| AuthError::TokenExchange {
            reason,
        })
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, AuthError> {
        let metadata = self.provider_metadata().await?.clone();
        let client = CoreClient::from_provider_metadata(
            metadata,
            ClientId::new(self.config.client_id.clone()),
            Some(ClientSecret::new(self.config.client_secret.clone())),
        );

        let refresh_token_value = RefreshToken::new(refresh_token.to_string());
        let refresh_request = client
            .exchange_refresh_token(&refresh_token_value)
            .map_err(|e| AuthError::Refresh {
                reason: format!("token endpoint error: {e}"),
            })?;

        let token_response =
            refresh_request
                .request_async(&self.http_client)
                .await
                .map_err(|e| AuthError::Refresh {
                    reason: e.to_string(),
                })?;

        token_set_from_response(&token_response).map_err(|reason| AuthError::Refresh { reason })
    }

    async fn end_session_url(
        &self,
        id_token_hint: &str,
        post_logout_redirect_uri: &str,
    ) -> Result<Option<String>, AuthError> {
        let metadata = self.provider_metadata().await?;
        let Some(end_session) = metadata.additional_metadata().end_session_endpoint.clone()
        else {
            return Ok(None);
        };

        let mut url = end_session.url().clone();
        url.query_pairs_mut()
            .append_pair("id_token_hint", id_token_hint)
            .append_pair("post_logout_redirect_uri", post_logout_redirect_uri)
            .append_pair("client_id", &self.config.client_id);

        Ok(Some(url.to_string()))
    }
}

/// Extracts the token set from a token endpoint response.
///
/// The raw ID token string is pulled from the serialized response; the
/// typed accessor only exposes the parsed form.
fn token_set_from_response<TR>(token_response: &TR) -> Result<TokenSet, String>
where
    TR: OAuth2TokenResponse + serde::Serialize,
{
    let response_json = serde_json::to_value(token_response)
        .map_err(|e| format!("failed to serialize token response: {e}"))?;
    let id_token = response_json
        .get("id_token")
        .and_then(|v| v.as_str())
        .map(String::from);

    Ok(TokenSet {
        access_token: token_response.access_token().secret().clone(),
        refresh_token: token_response.refresh_token().map(|t| t.secret().clone()),
        id_token,
        expires_in: token_response.expires_in(),
    })
}
