//! Authentication and authorization for the portcullis server.
//!
//! This module provides:
//! - OAuth login with the configured external providers
//! - Postgres-backed users and sessions
//! - The authorization middleware that guards every request
//!
//! Roles are snapshotted into the session at login, so role changes take
//! effect on the user's next sign-in or when the session expires.

pub mod db;
pub mod middleware;
pub mod oauth;
pub mod routes;

use crate::config::SessionConfig;
use portcullis_identity::{
    AuthorizationGate, CredentialStore, ExternalProvider, IdentityLinker, PolicyRegistry,
    Provider, SessionIssuer, SessionStore,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub use middleware::{CurrentSession, OptionalSession, authorize};
pub use oauth::OAuthProviderClient;
pub use routes::{access_denied, callback, login, login_page, logout};

/// Session cookie name.
pub const SESSION_COOKIE: &str = "session";

/// Auth state cookie name (CSRF token and PKCE verifier during login).
pub const AUTH_STATE_COOKIE: &str = "auth_state";

/// Where denied requests are redirected.
#[derive(Debug, Clone)]
pub struct RedirectPaths {
    pub login: String,
    pub access_denied: String,
}

impl Default for RedirectPaths {
    fn default() -> Self {
        Self {
            login: "/auth/login".to_string(),
            access_denied: "/Identity/Account/AccessDenied".to_string(),
        }
    }
}

/// Shared application state.
pub struct AppState {
    pub users: Arc<dyn CredentialStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub linker: IdentityLinker,
    pub issuer: SessionIssuer,
    pub gate: AuthorizationGate,
    pub providers: BTreeMap<Provider, Arc<dyn ExternalProvider>>,
    pub session_config: SessionConfig,
    pub paths: RedirectPaths,
}

impl AppState {
    /// Creates application state with no providers enabled.
    pub fn new(
        users: Arc<dyn CredentialStore>,
        sessions: Arc<dyn SessionStore>,
        policies: PolicyRegistry,
        session_config: SessionConfig,
        paths: RedirectPaths,
    ) -> Self {
        Self {
            linker: IdentityLinker::new(users.clone()),
            issuer: SessionIssuer::new(sessions.clone(), session_config.duration()),
            gate: AuthorizationGate::new(Arc::new(policies)),
            users,
            sessions,
            providers: BTreeMap::new(),
            session_config,
            paths,
        }
    }

    /// Enables a provider, replacing any earlier client for it.
    #[must_use]
    pub fn with_provider(mut self, client: Arc<dyn ExternalProvider>) -> Self {
        self.providers.insert(client.provider(), client);
        self
    }

    /// Paths that are reachable regardless of policy, so a denied user can
    /// always sign in.
    pub fn is_public_path(&self, path: &str) -> bool {
        path == self.paths.login
            || path == self.paths.access_denied
            || path.starts_with("/auth/")
    }
}

/// Shortest period the cleanup task runs at.
const MIN_CLEANUP_INTERVAL: Duration = Duration::from_secs(1);

/// Periodically deletes expired sessions.
///
/// A zero period is raised to one second.
pub fn spawn_session_cleanup(issuer: SessionIssuer, every: Duration) -> JoinHandle<()> {
    let every = if every.is_zero() {
        tracing::warn!("session cleanup interval is zero, using one second");
        MIN_CLEANUP_INTERVAL
    } else {
        every
    };
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            match issuer.purge_expired().await {
                Ok(count) if count > 0 => {
                    tracing::debug!(deleted_sessions = count, "Periodic session cleanup");
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to cleanup expired sessions");
                }
            }
        }
    })
}
