//! SVA platform web server: authentication routes over the auth service.

mod config;
mod routes;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use sva_auth::{
    AuthConfig, AuthService, KeyValueStore, LoginStateStore, OidcClient, RedisStore,
    SessionStore, TokenCipher,
};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::ServerConfig;

/// Shared application state.
pub struct AppState {
    /// Authentication service.
    pub auth: AuthService,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment; required values fail fast here.
    let server_config = ServerConfig::from_env().expect("failed to load server configuration");
    let auth_config = AuthConfig::from_env().expect("failed to load auth configuration");
    tracing::info!("Loaded configuration");

    // Connect the session/login-state store
    let store: Arc<dyn KeyValueStore> = Arc::new(
        RedisStore::connect(&auth_config.redis_url)
            .await
            .expect("failed to connect to redis"),
    );

    let cipher = match &auth_config.encryption_key {
        Some(key) => Some(TokenCipher::new(key).expect("invalid token encryption key")),
        None => {
            tracing::warn!("no token encryption key configured, storing tokens in plaintext");
            None
        }
    };

    // Initialize the OIDC client; a failed discovery here is retried on
    // the first login rather than blocking startup.
    let provider = OidcClient::new(auth_config.clone()).expect("failed to create OIDC client");
    tracing::info!("Discovering OIDC provider...");
    if let Err(e) = provider.discover().await {
        tracing::warn!(error = %e, "OIDC discovery failed at startup, will retry on first login");
    }

    let sessions = SessionStore::new(store.clone(), cipher, auth_config.session_ttl());
    let login_states = LoginStateStore::new(store);
    let auth = AuthService::new(auth_config, Arc::new(provider), sessions, login_states);
    let app_state = Arc::new(AppState { auth });

    // Cleanup expired entries on startup
    match app_state.auth.sweep_expired().await {
        Ok(count) if count > 0 => {
            tracing::info!(
                deleted_entries = count,
                "Cleaned up expired auth entries on startup"
            );
        }
        Ok(_) => {}
        Err(e) => {
            tracing::warn!(error = %e, "Failed to cleanup expired auth entries on startup");
        }
    }

    // Spawn periodic sweep task
    let sweep_state = app_state.clone();
    let sweep_interval_secs = server_config.sweep_interval_seconds;
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(sweep_interval_secs));
        loop {
            interval.tick().await;
            match sweep_state.auth.sweep_expired().await {
                Ok(count) if count > 0 => {
                    tracing::debug!(deleted_entries = count, "Periodic auth entry cleanup");
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to cleanup expired auth entries");
                }
            }
        }
    });

    let app = Router::new()
        .route("/auth/login", get(routes::login))
        .route("/auth/callback", get(routes::callback))
        .route("/auth/me", get(routes::me))
        .route("/auth/logout", post(routes::logout))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state);

    let listener = tokio::net::TcpListener::bind(&server_config.listen_addr)
        .await
        .expect("failed to bind to address");

    tracing::info!("listening on http://{}", server_config.listen_addr);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install Ctrl+C handler");
    tracing::info!("shutdown signal received");
}
