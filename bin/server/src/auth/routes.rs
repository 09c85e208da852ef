//! Authentication routes for login, callback, and logout.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use portcullis_identity::{ExternalProvider, IdentityProviderError, Provider, SessionId};
use serde::Deserialize;
use std::sync::Arc;
use time::Duration as TimeDuration;

use super::{AUTH_STATE_COOKIE, AppState, SESSION_COOKIE};
use crate::error::AuthError;

/// Query parameters for the OAuth callback.
///
/// Providers send `error` instead of `code` when the user declines.
#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

/// Handshake state kept in a cookie between login and callback.
#[derive(Debug, Clone, PartialEq, Eq)]
struct AuthStateData {
    provider: Provider,
    csrf_token: String,
    pkce_verifier: String,
}

impl AuthStateData {
    // The tokens are URL-safe base64, so '.' never appears inside a field.
    fn encode(&self) -> String {
        format!("{}.{}.{}", self.provider, self.csrf_token, self.pkce_verifier)
    }

    fn decode(value: &str) -> Option<Self> {
        let mut parts = value.splitn(3, '.');
        let provider = parts.next()?.parse().ok()?;
        let csrf_token = parts.next()?.to_string();
        let pkce_verifier = parts.next()?.to_string();
        if csrf_token.is_empty() || pkce_verifier.is_empty() {
            return None;
        }
        Some(Self {
            provider,
            csrf_token,
            pkce_verifier,
        })
    }
}

fn provider_client(
    state: &AppState,
    name: &str,
) -> Result<(Provider, Arc<dyn ExternalProvider>), AuthError> {
    let provider: Provider = name.parse()?;
    let client = state
        .providers
        .get(&provider)
        .cloned()
        .ok_or(IdentityProviderError::NotConfigured { provider })?;
    Ok((provider, client))
}

fn removal(name: &'static str) -> Cookie<'static> {
    Cookie::build((name, "")).path("/").max_age(TimeDuration::ZERO).build()
}

/// Initiates the login flow by redirecting to the provider.
pub async fn login(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    jar: CookieJar,
) -> Result<impl IntoResponse, AuthError> {
    let (provider, client) = provider_client(&state, &provider)?;
    let request = client.authorization_request();

    let auth_state = AuthStateData {
        provider,
        csrf_token: request.csrf_token,
        pkce_verifier: request.pkce_verifier,
    };

    let cookie = Cookie::build((AUTH_STATE_COOKIE, auth_state.encode()))
        .path("/")
        .http_only(true)
        .secure(state.session_config.secure_cookies)
        .same_site(SameSite::Lax)
        .max_age(TimeDuration::minutes(10));

    Ok((jar.add(cookie), Redirect::to(&request.url)))
}

/// Handles the provider's redirect back after the user authenticates.
pub async fn callback(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    Query(query): Query<CallbackQuery>,
    jar: CookieJar,
) -> Result<impl IntoResponse, AuthError> {
    let (provider, client) = provider_client(&state, &provider)?;

    if let Some(error) = query.error {
        tracing::info!(%provider, error = %error, "provider did not complete login");
        let jar = jar.add(removal(AUTH_STATE_COOKIE));
        return Ok((jar, Redirect::to(&state.paths.login)));
    }

    let auth_state_cookie = jar
        .get(AUTH_STATE_COOKIE)
        .ok_or(AuthError::MissingAuthState)?;
    let auth_state =
        AuthStateData::decode(auth_state_cookie.value()).ok_or(AuthError::InvalidAuthState)?;
    if auth_state.provider != provider {
        return Err(AuthError::InvalidAuthState);
    }

    let (Some(code), Some(returned_state)) = (query.code, query.state) else {
        return Err(AuthError::InvalidAuthState);
    };
    if returned_state != auth_state.csrf_token {
        return Err(IdentityProviderError::CsrfMismatch { provider }.into());
    }

    let profile = client
        .exchange_code_for_profile(&code, &auth_state.pkce_verifier)
        .await
        .map_err(|e| AuthError::Exchange {
            provider,
            details: e.to_string(),
        })?;

    let outcome = state.linker.resolve_profile(&profile).await?;
    let session = state.issuer.issue_session(&outcome.user).await?;

    tracing::info!(
        user_id = %outcome.user.id(),
        %provider,
        is_new_user = outcome.is_new_user,
        "user signed in"
    );

    let session_cookie = Cookie::build((SESSION_COOKIE, session.id().as_str().to_string()))
        .path("/")
        .http_only(true)
        .secure(state.session_config.secure_cookies)
        .same_site(SameSite::Lax)
        .max_age(TimeDuration::seconds(
            (session.expires_at() - session.issued_at()).num_seconds(),
        ));

    let jar = jar.add(session_cookie).add(removal(AUTH_STATE_COOKIE));

    Ok((jar, Redirect::to("/")))
}

/// Logs out the user by deleting their session.
pub async fn logout(State(state): State<Arc<AppState>>, jar: CookieJar) -> impl IntoResponse {
    if let Some(session_cookie) = jar.get(SESSION_COOKIE) {
        let session_id = SessionId::new(session_cookie.value().to_string());
        if let Err(e) = state.issuer.end_session(&session_id).await {
            tracing::warn!(error = %e, "Failed to delete session on logout");
        }
    }

    (jar.add(removal(SESSION_COOKIE)), Redirect::to("/"))
}

/// Lists the enabled providers.
pub async fn login_page(State(state): State<Arc<AppState>>) -> Html<String> {
    let links: String = state
        .providers
        .keys()
        .map(|p| {
            format!(
                "<li><a href=\"/auth/{}/login\">Sign in with {}</a></li>",
                p,
                p.display_name()
            )
        })
        .collect();

    let body = if links.is_empty() {
        "<p>No sign-in providers are configured.</p>".to_string()
    } else {
        format!("<ul>{links}</ul>")
    };

    Html(format!(
        "<!DOCTYPE html><html lang=\"en\"><head><meta charset=\"utf-8\"/>\
         <title>Sign in</title></head><body><h1>Sign in</h1>{body}</body></html>"
    ))
}

/// Shown when a signed-in user lacks the role a path requires.
pub async fn access_denied() -> impl IntoResponse {
    (
        StatusCode::FORBIDDEN,
        Html(
            "<!DOCTYPE html><html lang=\"en\"><head><meta charset=\"utf-8\"/>\
             <title>Access denied</title></head><body><h1>Access denied</h1>\
             <p>You do not have access to this resource.</p>\
             <p><a href=\"/\">Home</a></p></body></html>",
        ),
    )
}
