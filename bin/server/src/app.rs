//! HTTP router assembly.

use axum::{Router, routing::get};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::auth::{self, AppState};

/// Builds the application router.
///
/// `pages` holds the site's own routes; every route, auth routes included,
/// runs behind the authorization middleware.
pub fn router(state: Arc<AppState>, pages: Router<Arc<AppState>>) -> Router {
    Router::new()
        .route("/auth/login", get(auth::login_page))
        .route("/auth/logout", get(auth::logout))
        .route("/auth/{provider}/login", get(auth::login))
        .route("/auth/{provider}/callback", get(auth::callback))
        .route(&state.paths.access_denied, get(auth::access_denied))
        .merge(pages)
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth::authorize,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::RedirectPaths;
    use crate::config::SessionConfig;
    use async_trait::async_trait;
    use axum::{
        body::{Body, to_bytes},
        http::{HeaderValue, Request, StatusCode, header},
        response::Response,
    };
    use chrono::{Duration, Utc};
    use portcullis_identity::{
        AuthorizationRequest, ExternalProvider, IdentityProviderError, InMemoryCredentialStore,
        InMemorySessionStore, PolicyRegistry, ProfileClaims, Provider, ProviderProfile, Role,
        RoleSet, Session, SessionId, SessionStore, User,
    };
    use tower::ServiceExt;

    struct FakeProvider;

    #[async_trait]
    impl ExternalProvider for FakeProvider {
        fn provider(&self) -> Provider {
            Provider::GitHub
        }

        fn authorization_request(&self) -> AuthorizationRequest {
            AuthorizationRequest {
                url: "https://github.test/authorize?state=csrf-token".to_string(),
                csrf_token: "csrf-token".to_string(),
                pkce_verifier: "verifier".to_string(),
            }
        }

        async fn exchange_code_for_profile(
            &self,
            _code: &str,
            _pkce_verifier: &str,
        ) -> portcullis_core::Result<ProviderProfile, IdentityProviderError> {
            Ok(ProviderProfile {
                provider: Provider::GitHub,
                external_id: "4242".to_string(),
                claims: ProfileClaims::new()
                    .with_email(Some("octo@example.com".to_string()))
                    .with_display_name(Some("Octo".to_string())),
            })
        }
    }

    struct Harness {
        users: Arc<InMemoryCredentialStore>,
        sessions: Arc<InMemorySessionStore>,
        app: Router,
    }

    impl Harness {
        fn new() -> Self {
            let users = Arc::new(InMemoryCredentialStore::new());
            let sessions = Arc::new(InMemorySessionStore::new());
            let state = AppState::new(
                users.clone(),
                sessions.clone(),
                PolicyRegistry::from_rules(PolicyRegistry::default_rules()),
                SessionConfig::default(),
                RedirectPaths::default(),
            )
            .with_provider(Arc::new(FakeProvider));
            let app = router(Arc::new(state), crate::pages::router());
            Self {
                users,
                sessions,
                app,
            }
        }

        async fn session_with(&self, roles: RoleSet, issued_at: chrono::DateTime<Utc>) -> Session {
            let session = Session::new(
                SessionId::generate(),
                User::new().id(),
                roles,
                issued_at,
                Duration::minutes(30),
            );
            self.sessions.create(&session).await.unwrap();
            session
        }

        async fn get(&self, uri: &str, cookie: Option<String>) -> Response {
            let mut request = Request::builder().uri(uri);
            if let Some(cookie) = cookie {
                request = request.header(header::COOKIE, cookie);
            }
            self.app
                .clone()
                .oneshot(request.body(Body::empty()).unwrap())
                .await
                .unwrap()
        }
    }

    fn session_cookie(session: &Session) -> Option<String> {
        Some(format!("session={}", session.id()))
    }

    fn location(response: &Response) -> &str {
        response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .unwrap()
    }

    fn set_cookies(response: &Response) -> Vec<String> {
        response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v: &HeaderValue| v.to_str().ok())
            .map(str::to_string)
            .collect()
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn anonymous_request_for_games_redirects_to_login() {
        let harness = Harness::new();

        let response = harness.get("/Games", None).await;

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/auth/login");
    }

    #[tokio::test]
    async fn member_without_admin_role_is_sent_to_access_denied() {
        let harness = Harness::new();
        let session = harness
            .session_with(RoleSet::none().with(Role::User), Utc::now())
            .await;

        let response = harness.get("/Admin", session_cookie(&session)).await;

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/Identity/Account/AccessDenied");
    }

    #[tokio::test]
    async fn admin_reaches_admin_page() {
        let harness = Harness::new();
        let session = harness
            .session_with(RoleSet::none().with(Role::Admin), Utc::now())
            .await;

        let response = harness.get("/Admin", session_cookie(&session)).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("Admin"));
    }

    #[tokio::test]
    async fn signed_in_user_without_roles_reaches_games() {
        let harness = Harness::new();
        let session = harness.session_with(RoleSet::none(), Utc::now()).await;

        let response = harness.get("/games/chess", session_cookie(&session)).await;

        // Policy allows it; there is simply no such page.
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = harness.get("/Games", session_cookie(&session)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn expired_session_is_deleted_and_redirected_to_login() {
        let harness = Harness::new();
        let session = harness
            .session_with(
                RoleSet::none().with(Role::Admin),
                Utc::now() - Duration::hours(2),
            )
            .await;

        let response = harness.get("/Games", session_cookie(&session)).await;

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/auth/login");
        assert!(
            set_cookies(&response)
                .iter()
                .any(|c| c.starts_with("session=;"))
        );
        assert_eq!(harness.sessions.session_count(), 0);
    }

    #[tokio::test]
    async fn home_page_is_open() {
        let harness = Harness::new();

        let response = harness.get("/", None).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("Sign in"));
    }

    #[tokio::test]
    async fn login_page_lists_enabled_providers() {
        let harness = Harness::new();

        let response = harness.get("/auth/login", None).await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_text(response).await;
        assert!(body.contains("/auth/github/login"));
        assert!(!body.contains("/auth/google/login"));
    }

    #[tokio::test]
    async fn login_then_callback_creates_user_and_session() {
        let harness = Harness::new();

        let response = harness.get("/auth/github/login", None).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            location(&response),
            "https://github.test/authorize?state=csrf-token"
        );
        assert!(
            set_cookies(&response)
                .iter()
                .any(|c| c.starts_with("auth_state=github.csrf-token.verifier;"))
        );

        let response = harness
            .get(
                "/auth/github/callback?code=the-code&state=csrf-token",
                Some("auth_state=github.csrf-token.verifier".to_string()),
            )
            .await;

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/");
        let cookies = set_cookies(&response);
        assert!(cookies.iter().any(|c| c.starts_with("auth_state=;")));
        let session_cookie = cookies
            .iter()
            .find(|c| c.starts_with("session="))
            .unwrap();
        let token = session_cookie
            .trim_start_matches("session=")
            .split(';')
            .next()
            .unwrap();

        assert_eq!(harness.users.user_count(), 1);
        let session = harness
            .sessions
            .find(&SessionId::from(token))
            .await
            .unwrap()
            .unwrap();
        assert!(session.roles().is_empty());

        // First login grants no roles, so /Games is reachable but /Admin is not.
        let cookie = Some(format!("session={token}"));
        assert_eq!(
            harness.get("/Games", cookie.clone()).await.status(),
            StatusCode::OK
        );
        let response = harness.get("/Admin", cookie).await;
        assert_eq!(location(&response), "/Identity/Account/AccessDenied");
    }

    #[tokio::test]
    async fn second_login_reuses_existing_user() {
        let harness = Harness::new();
        for _ in 0..2 {
            let response = harness
                .get(
                    "/auth/github/callback?code=c&state=csrf-token",
                    Some("auth_state=github.csrf-token.verifier".to_string()),
                )
                .await;
            assert_eq!(response.status(), StatusCode::SEE_OTHER);
        }

        assert_eq!(harness.users.user_count(), 1);
        assert_eq!(harness.sessions.session_count(), 2);
    }

    #[tokio::test]
    async fn callback_with_wrong_state_is_rejected() {
        let harness = Harness::new();

        let response = harness
            .get(
                "/auth/github/callback?code=c&state=forged",
                Some("auth_state=github.csrf-token.verifier".to_string()),
            )
            .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(harness.users.user_count(), 0);
        assert_eq!(harness.sessions.session_count(), 0);
    }

    #[tokio::test]
    async fn callback_without_auth_state_is_rejected() {
        let harness = Harness::new();

        let response = harness
            .get("/auth/github/callback?code=c&state=csrf-token", None)
            .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn declined_login_returns_to_login_page() {
        let harness = Harness::new();

        let response = harness
            .get("/auth/github/callback?error=access_denied", None)
            .await;

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/auth/login");
        assert_eq!(harness.users.user_count(), 0);
    }

    #[tokio::test]
    async fn unknown_or_disabled_provider_is_not_found() {
        let harness = Harness::new();

        assert_eq!(
            harness.get("/auth/myspace/login", None).await.status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            harness.get("/auth/google/login", None).await.status(),
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn logout_ends_session() {
        let harness = Harness::new();
        let session = harness
            .session_with(RoleSet::none().with(Role::User), Utc::now())
            .await;

        let response = harness.get("/auth/logout", session_cookie(&session)).await;

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/");
        assert_eq!(harness.sessions.session_count(), 0);
    }

    #[tokio::test]
    async fn access_denied_page_is_reachable_without_session() {
        let harness = Harness::new();

        let response = harness.get("/Identity/Account/AccessDenied", None).await;

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
