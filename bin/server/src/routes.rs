//! Authentication routes for login, callback, identity lookup, and logout.
//!
//! Every failure degrades to a redirect carrying a query-string signal
//! (`auth=error`, `auth=state-expired`) or a generic 401 body; no internal
//! error detail reaches the client.

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::Deserialize;
use std::sync::Arc;
use sva_auth::{
    AuthError, CallbackParams, LOGIN_STATE_TTL, LoginStateCookie, decode_login_state_cookie,
    encode_login_state_cookie,
};
use sva_core::SessionId;
use time::Duration as TimeDuration;

use crate::AppState;

/// Query parameters of the OIDC callback.
#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    iss: Option<String>,
}

/// Initiates the login flow by redirecting to the identity provider.
///
/// The PKCE verifier, nonce, and `state` travel in an HMAC-signed cookie
/// alongside the server-side login-state entry.
pub async fn login(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    let config = state.auth.config();

    let initiation = match state.auth.create_login_url().await {
        Ok(initiation) => initiation,
        Err(e) => {
            tracing::error!(error = %e, "login initiation failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Authentication unavailable",
            )
                .into_response();
        }
    };

    let payload = LoginStateCookie {
        state: initiation.state.clone(),
        login_state: initiation.login_state.clone(),
    };
    let Some(cookie_value) = encode_login_state_cookie(&payload, &config.login_state_secret)
    else {
        tracing::error!("failed to encode login state cookie");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Authentication unavailable",
        )
            .into_response();
    };

    // No max-age: the cookie must outlive the login-state TTL so a late
    // callback can still be answered with the distinct expired signal.
    let cookie = Cookie::build((config.login_state_cookie.clone(), cookie_value))
        .path("/")
        .http_only(true)
        .secure(config.secure_cookies)
        .same_site(SameSite::Lax);

    (jar.add(cookie), Redirect::to(&initiation.url)).into_response()
}

/// Handles the callback after the user authenticated with the provider.
pub async fn callback(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CallbackQuery>,
    jar: CookieJar,
) -> Response {
    let config = state.auth.config();

    if let Some(error) = query.error {
        tracing::warn!(provider_error = %error, "provider returned an error on callback");
        return Redirect::to("/?auth=error").into_response();
    }
    let (Some(code), Some(state_param)) = (query.code, query.state) else {
        return Redirect::to("/auth/login").into_response();
    };

    // The cookie payload only counts when its state matches the callback
    // state exactly; otherwise the service falls back to the server-side
    // store.
    let cookie_login_state = jar
        .get(&config.login_state_cookie)
        .and_then(|cookie| decode_login_state_cookie(cookie.value(), &config.login_state_secret))
        .filter(|payload| payload.state == state_param)
        .map(|payload| payload.login_state);

    let remove_login_cookie = removal_cookie(config.login_state_cookie.clone());

    if let Some(login_state) = &cookie_login_state
        && login_state.is_expired(chrono::Utc::now(), LOGIN_STATE_TTL)
    {
        return (
            jar.add(remove_login_cookie),
            Redirect::to("/?auth=state-expired"),
        )
            .into_response();
    }

    let params = CallbackParams {
        code,
        state: state_param,
        iss: query.iss,
        login_state: cookie_login_state,
    };

    match state.auth.handle_callback(params).await {
        Ok(outcome) => {
            tracing::info!(
                session_id = %outcome.session_id,
                user_id = %outcome.user.id,
                "auth callback successful"
            );
            let session_cookie =
                Cookie::build((config.session_cookie.clone(), outcome.session_id.to_string()))
                    .path("/")
                    .http_only(true)
                    .secure(config.secure_cookies)
                    .same_site(SameSite::Lax)
                    .max_age(TimeDuration::milliseconds(config.session_ttl_ms as i64));

            let jar = jar.add(session_cookie).add(remove_login_cookie);
            (jar, Redirect::to("/?auth=ok")).into_response()
        }
        Err(AuthError::StateExpired) => (
            jar.add(remove_login_cookie),
            Redirect::to("/?auth=state-expired"),
        )
            .into_response(),
        Err(AuthError::StateInvalid) => {
            (jar.add(remove_login_cookie), Redirect::to("/auth/login")).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "auth callback failed");
            (jar.add(remove_login_cookie), Redirect::to("/?auth=error")).into_response()
        }
    }
}

/// Returns the current user profile for the active session.
pub async fn me(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    let config = state.auth.config();

    let Some(session_cookie) = jar.get(&config.session_cookie) else {
        tracing::debug!("identity check without session cookie");
        return unauthorized();
    };
    let Ok(session_id) = session_cookie.value().parse::<SessionId>() else {
        tracing::debug!("identity check with malformed session cookie");
        return unauthorized();
    };

    match state.auth.get_session_user(&session_id).await {
        Ok(Some(user)) => {
            tracing::debug!(user_id = %user.id, "identity check successful");
            (StatusCode::OK, Json(serde_json::json!({ "user": user }))).into_response()
        }
        Ok(None) => unauthorized(),
        Err(e) => {
            tracing::error!(error = %e, "session lookup failed");
            unauthorized()
        }
    }
}

/// Ends the session and redirects to the provider end-session URL, or the
/// post-logout URL when the provider offers none. Best-effort: the session
/// cookie is cleared and the redirect issued even when the internal logout
/// fails.
pub async fn logout(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    let config = state.auth.config();
    let mut logout_url = config.post_logout_redirect_uri.clone();

    if let Some(cookie) = jar.get(&config.session_cookie)
        && let Ok(session_id) = cookie.value().parse::<SessionId>()
    {
        match state.auth.logout_session(&session_id).await {
            Ok(url) => logout_url = url,
            Err(e) => {
                tracing::error!(session_id = %session_id, error = %e, "logout failed");
            }
        }
    }

    let jar = jar.add(removal_cookie(config.session_cookie.clone()));
    (jar, Redirect::to(&logout_url)).into_response()
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({ "error": "unauthorized" })),
    )
        .into_response()
}

fn removal_cookie(name: String) -> Cookie<'static> {
    Cookie::build((name, ""))
        .path("/")
        .max_age(TimeDuration::ZERO)
        .build()
}
