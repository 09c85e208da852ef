//! Authorization middleware and session extractors for Axum.

use axum::{
    extract::{FromRef, FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use portcullis_identity::{Decision, DenyReason, Session, SessionId, TokenAuthorization};
use std::sync::Arc;
use time::Duration as TimeDuration;

use super::{AppState, SESSION_COOKIE};
use crate::error::AuthError;

/// Runs every request through the authorization gate.
///
/// Allowed requests carry the caller's live session, if any, as a request
/// extension. Denied requests are redirected to the login page or the
/// access-denied page.
pub async fn authorize(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let token = jar
        .get(SESSION_COOKIE)
        .map(|c| SessionId::new(c.value().to_string()));

    if state.is_public_path(&path) {
        if let Some(session) = live_session(&state, token.as_ref()).await {
            request.extensions_mut().insert(session);
        }
        return next.run(request).await;
    }

    let TokenAuthorization { decision, session } = match state
        .gate
        .authorize_token(state.sessions.as_ref(), token.as_ref(), &path)
        .await
    {
        Ok(result) => result,
        Err(e) => return AuthError::Store(e).into_response(),
    };

    match decision {
        Decision::Allow => {
            if let Some(session) = session {
                request.extensions_mut().insert(session);
            }
            next.run(request).await
        }
        Decision::Deny(reason) => deny(&state, jar, &path, reason),
    }
}

async fn live_session(state: &AppState, token: Option<&SessionId>) -> Option<Session> {
    let token = token?;
    match state.sessions.find(token).await {
        Ok(session) => session.filter(|s| !s.is_expired()),
        Err(e) => {
            tracing::warn!(error = %e, "session lookup failed");
            None
        }
    }
}

fn deny(state: &AppState, jar: CookieJar, path: &str, reason: DenyReason) -> Response {
    tracing::debug!(path, reason = %reason, "request denied");
    match reason {
        DenyReason::Unauthenticated => Redirect::to(&state.paths.login).into_response(),
        DenyReason::SessionExpired => {
            let remove_session = Cookie::build((SESSION_COOKIE, ""))
                .path("/")
                .max_age(TimeDuration::ZERO);
            (jar.add(remove_session), Redirect::to(&state.paths.login)).into_response()
        }
        DenyReason::MissingRole { .. } => {
            Redirect::to(&state.paths.access_denied).into_response()
        }
    }
}

/// Extractor for the caller's session.
///
/// Redirects to the login page when there is none. Only works behind
/// [`authorize`].
pub struct CurrentSession(pub Session);

impl<S> FromRequestParts<S> for CurrentSession
where
    Arc<AppState>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Redirect;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match parts.extensions.get::<Session>() {
            Some(session) => Ok(CurrentSession(session.clone())),
            None => {
                let app_state = Arc::<AppState>::from_ref(state);
                Err(Redirect::to(&app_state.paths.login))
            }
        }
    }
}

/// Extractor for optionally getting the caller's session.
pub struct OptionalSession(pub Option<Session>);

impl<S> FromRequestParts<S> for OptionalSession
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(OptionalSession(parts.extensions.get::<Session>().cloned()))
    }
}
