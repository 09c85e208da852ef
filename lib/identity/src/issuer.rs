//! Session issuance and teardown.

use crate::error::{SessionCreationError, StoreError};
use crate::session::{Session, SessionId};
use crate::store::SessionStore;
use crate::user::User;
use chrono::{DateTime, Duration, Utc};
use portcullis_core::UserId;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Issues sessions bound to a snapshot of the user's roles.
#[derive(Clone)]
pub struct SessionIssuer {
    sessions: Arc<dyn SessionStore>,
    ttl: Duration,
}

impl SessionIssuer {
    /// Creates an issuer whose sessions live for `ttl`.
    #[must_use]
    pub fn new(sessions: Arc<dyn SessionStore>, ttl: Duration) -> Self {
        Self { sessions, ttl }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issues and stores a session for `user`, valid from now.
    ///
    /// # Errors
    ///
    /// Returns `UserDeactivated` for deactivated users, or `Store` if the
    /// session could not be persisted.
    pub async fn issue_session(&self, user: &User) -> Result<Session, SessionCreationError> {
        self.issue_session_at(user, Utc::now()).await
    }

    /// Issues and stores a session for `user`, valid from `now`.
    #[instrument(skip(self, user), fields(user_id = %user.id()))]
    pub async fn issue_session_at(
        &self,
        user: &User,
        now: DateTime<Utc>,
    ) -> Result<Session, SessionCreationError> {
        if !user.is_active() {
            warn!("refusing session for deactivated user");
            return Err(SessionCreationError::UserDeactivated { user_id: user.id() });
        }

        let out_of_range = || SessionCreationError::LifetimeOutOfRange {
            ttl_seconds: self.ttl.num_seconds(),
        };
        if self.ttl <= Duration::zero() {
            return Err(out_of_range());
        }
        let expires_at = now.checked_add_signed(self.ttl).ok_or_else(out_of_range)?;

        let session = Session::from_parts(
            SessionId::generate(),
            user.id(),
            user.roles().clone(),
            now,
            expires_at,
        );
        self.sessions.create(&session).await?;

        debug!(expires_at = %session.expires_at(), "session issued");
        Ok(session)
    }

    /// Looks up a session by token. Expired sessions are returned as-is.
    pub async fn find_session(&self, id: &SessionId) -> Result<Option<Session>, StoreError> {
        self.sessions.find(id).await
    }

    /// Ends a session (logout).
    #[instrument(skip(self))]
    pub async fn end_session(&self, id: &SessionId) -> Result<(), StoreError> {
        self.sessions.delete(id).await
    }

    /// Ends every session of a user.
    #[instrument(skip(self))]
    pub async fn end_all_sessions(&self, user_id: UserId) -> Result<u64, StoreError> {
        self.sessions.delete_all_for_user(user_id).await
    }

    /// Removes sessions that have expired.
    pub async fn purge_expired(&self) -> Result<u64, StoreError> {
        self.sessions.delete_expired(Utc::now()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemorySessionStore;
    use crate::role::{Role, RoleSet};

    fn issuer(store: &Arc<InMemorySessionStore>) -> SessionIssuer {
        SessionIssuer::new(store.clone(), Duration::minutes(30))
    }

    #[tokio::test]
    async fn session_snapshots_roles_and_sets_expiry() {
        let store = Arc::new(InMemorySessionStore::new());
        let mut user = User::new();
        user.grant_role(Role::User);
        let now = Utc::now();

        let session = issuer(&store).issue_session_at(&user, now).await.unwrap();

        assert_eq!(session.user_id(), user.id());
        assert_eq!(session.roles(), &RoleSet::none().with(Role::User));
        assert_eq!(session.issued_at(), now);
        assert_eq!(session.expires_at(), now + Duration::minutes(30));
        assert_eq!(store.find(session.id()).await.unwrap(), Some(session));
    }

    #[tokio::test]
    async fn later_role_changes_do_not_reach_existing_session() {
        let store = Arc::new(InMemorySessionStore::new());
        let issuer = issuer(&store);
        let mut user = User::new();
        user.grant_role(Role::User);

        let session = issuer.issue_session(&user).await.unwrap();
        user.grant_role(Role::Admin);
        user.revoke_role(Role::User);

        let stored = issuer.find_session(session.id()).await.unwrap().unwrap();
        assert_eq!(stored.roles(), &RoleSet::none().with(Role::User));
        assert!(!stored.is_admin());

        let fresh = issuer.issue_session(&user).await.unwrap();
        assert!(fresh.is_admin());
    }

    #[tokio::test]
    async fn deactivated_user_gets_no_session() {
        let store = Arc::new(InMemorySessionStore::new());
        let mut user = User::new();
        user.set_active(false);

        let err = issuer(&store).issue_session(&user).await.unwrap_err();

        assert_eq!(
            err,
            SessionCreationError::UserDeactivated { user_id: user.id() }
        );
        assert_eq!(store.session_count(), 0);
    }

    #[tokio::test]
    async fn lifetime_must_be_positive_and_representable() {
        let store = Arc::new(InMemorySessionStore::new());
        let user = User::new();

        for ttl in [
            Duration::zero(),
            Duration::minutes(-5),
            Duration::minutes(1_000_000_000_000),
            Duration::MAX,
        ] {
            let err = SessionIssuer::new(store.clone(), ttl)
                .issue_session(&user)
                .await
                .unwrap_err();
            assert_eq!(
                err,
                SessionCreationError::LifetimeOutOfRange {
                    ttl_seconds: ttl.num_seconds()
                }
            );
        }
        assert_eq!(store.session_count(), 0);
    }

    #[tokio::test]
    async fn end_session_removes_it() {
        let store = Arc::new(InMemorySessionStore::new());
        let issuer = issuer(&store);
        let session = issuer.issue_session(&User::new()).await.unwrap();

        issuer.end_session(session.id()).await.unwrap();

        assert!(issuer.find_session(session.id()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn end_all_sessions_for_user() {
        let store = Arc::new(InMemorySessionStore::new());
        let issuer = issuer(&store);
        let user = User::new();
        issuer.issue_session(&user).await.unwrap();
        issuer.issue_session(&user).await.unwrap();
        issuer.issue_session(&User::new()).await.unwrap();

        assert_eq!(issuer.end_all_sessions(user.id()).await.unwrap(), 2);
        assert_eq!(store.session_count(), 1);
    }

    #[tokio::test]
    async fn purge_expired_keeps_live_sessions() {
        let store = Arc::new(InMemorySessionStore::new());
        let issuer = issuer(&store);
        let user = User::new();
        issuer
            .issue_session_at(&user, Utc::now() - Duration::hours(1))
            .await
            .unwrap();
        let live = issuer.issue_session(&user).await.unwrap();

        assert_eq!(issuer.purge_expired().await.unwrap(), 1);
        assert!(issuer.find_session(live.id()).await.unwrap().is_some());
    }
}
