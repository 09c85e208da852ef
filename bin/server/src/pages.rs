//! Site pages.
//!
//! The pages themselves are placeholders; what matters is where they live.
//! `/Games` and `/Admin` fall under the built-in policies, everything else
//! is open.

use axum::{Router, response::Html, routing::get};
use std::sync::Arc;

use crate::auth::{AppState, CurrentSession, OptionalSession};

fn layout(title: &str, body: &str) -> Html<String> {
    Html(format!(
        "<!DOCTYPE html><html lang=\"en\"><head><meta charset=\"utf-8\"/>\
         <title>{title}</title></head><body><h1>{title}</h1>{body}</body></html>"
    ))
}

/// Routes for the site pages.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(home))
        .route("/Games", get(games))
        .route("/Admin", get(admin))
}

pub async fn home(OptionalSession(session): OptionalSession) -> Html<String> {
    let body = match session {
        Some(session) => format!(
            "<p>Signed in as {}.</p><p><a href=\"/auth/logout\">Sign out</a></p>",
            session.user_id()
        ),
        None => "<p><a href=\"/auth/login\">Sign in</a></p>".to_string(),
    };
    layout("Home", &body)
}

pub async fn games(CurrentSession(session): CurrentSession) -> Html<String> {
    layout(
        "Games",
        &format!("<p>Welcome, player {}.</p>", session.user_id()),
    )
}

pub async fn admin(CurrentSession(session): CurrentSession) -> Html<String> {
    let roles: Vec<String> = session.roles().iter().map(|r| r.to_string()).collect();
    layout(
        "Admin",
        &format!("<p>Signed in with roles: {}.</p>", roles.join(", ")),
    )
}
