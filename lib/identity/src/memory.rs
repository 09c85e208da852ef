//! In-process store implementations.
//!
//! A single mutex per store makes `create_with_link` atomic, which is the
//! in-memory equivalent of the unique index the Postgres store relies on.

use crate::error::StoreError;
use crate::provider::Provider;
use crate::role::Role;
use crate::session::{Session, SessionId};
use crate::store::{CredentialStore, SessionStore};
use crate::user::{ExternalIdentityLink, User};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use portcullis_core::UserId;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, StoreError> {
    mutex.lock().map_err(|_| StoreError::Unavailable {
        details: "in-memory store lock poisoned".to_string(),
    })
}

#[derive(Default)]
struct Credentials {
    users: HashMap<UserId, User>,
    links: HashMap<(Provider, String), UserId>,
}

/// Credential store backed by process memory.
#[derive(Default)]
pub struct InMemoryCredentialStore {
    inner: Mutex<Credentials>,
}

impl InMemoryCredentialStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored users.
    pub fn user_count(&self) -> usize {
        lock(&self.inner).map(|c| c.users.len()).unwrap_or(0)
    }

    fn modify_user<F, R>(&self, id: UserId, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&mut User) -> R,
    {
        let mut inner = lock(&self.inner)?;
        let user = inner
            .users
            .get_mut(&id)
            .ok_or(StoreError::UserNotFound { user_id: id })?;
        Ok(f(user))
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn find_by_external_identity(
        &self,
        provider: Provider,
        external_id: &str,
    ) -> Result<Option<User>, StoreError> {
        let inner = lock(&self.inner)?;
        Ok(inner
            .links
            .get(&(provider, external_id.to_string()))
            .and_then(|id| inner.users.get(id))
            .cloned())
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, StoreError> {
        Ok(lock(&self.inner)?.users.get(&id).cloned())
    }

    async fn create_with_link(
        &self,
        user: &User,
        link: &ExternalIdentityLink,
    ) -> Result<(), StoreError> {
        let mut inner = lock(&self.inner)?;
        let key = (link.provider, link.external_id.clone());
        if inner.links.contains_key(&key) {
            return Err(StoreError::DuplicateIdentity {
                provider: link.provider,
                external_id: link.external_id.clone(),
            });
        }
        inner.links.insert(key, user.id());
        inner.users.insert(user.id(), user.clone());
        Ok(())
    }

    async fn add_role(&self, id: UserId, role: Role) -> Result<bool, StoreError> {
        self.modify_user(id, |user| user.grant_role(role))
    }

    async fn remove_role(&self, id: UserId, role: Role) -> Result<bool, StoreError> {
        self.modify_user(id, |user| user.revoke_role(role))
    }

    async fn set_active(&self, id: UserId, active: bool) -> Result<(), StoreError> {
        self.modify_user(id, |user| user.set_active(active))
    }
}

/// Session store backed by process memory.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<SessionId, Session>>,
}

impl InMemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sessions, expired or not.
    pub fn session_count(&self) -> usize {
        lock(&self.sessions).map(|s| s.len()).unwrap_or(0)
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self, session: &Session) -> Result<(), StoreError> {
        lock(&self.sessions)?.insert(session.id().clone(), session.clone());
        Ok(())
    }

    async fn find(&self, id: &SessionId) -> Result<Option<Session>, StoreError> {
        Ok(lock(&self.sessions)?.get(id).cloned())
    }

    async fn delete(&self, id: &SessionId) -> Result<(), StoreError> {
        lock(&self.sessions)?.remove(id);
        Ok(())
    }

    async fn delete_all_for_user(&self, user_id: UserId) -> Result<u64, StoreError> {
        let mut sessions = lock(&self.sessions)?;
        let before = sessions.len();
        sessions.retain(|_, s| s.user_id() != user_id);
        Ok((before - sessions.len()) as u64)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut sessions = lock(&self.sessions)?;
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired_at(now));
        Ok((before - sessions.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProfileClaims;
    use crate::role::{Role, RoleSet};
    use chrono::Duration;

    fn first_login(provider: Provider, external_id: &str) -> (User, ExternalIdentityLink) {
        User::from_first_login(provider, external_id, &ProfileClaims::new())
    }

    #[tokio::test]
    async fn create_then_find_by_identity_and_id() {
        let store = InMemoryCredentialStore::new();
        let (user, link) = first_login(Provider::GitHub, "user123");
        store.create_with_link(&user, &link).await.unwrap();

        let by_link = store
            .find_by_external_identity(Provider::GitHub, "user123")
            .await
            .unwrap();
        assert_eq!(by_link.as_ref().map(User::id), Some(user.id()));
        assert_eq!(store.find_by_id(user.id()).await.unwrap(), Some(user));
    }

    #[tokio::test]
    async fn same_external_id_under_other_provider_is_distinct() {
        let store = InMemoryCredentialStore::new();
        let (user, link) = first_login(Provider::GitHub, "42");
        store.create_with_link(&user, &link).await.unwrap();

        let other = store
            .find_by_external_identity(Provider::Google, "42")
            .await
            .unwrap();
        assert!(other.is_none());
    }

    #[tokio::test]
    async fn duplicate_link_is_rejected_without_partial_write() {
        let store = InMemoryCredentialStore::new();
        let (first, first_link) = first_login(Provider::GitHub, "user123");
        let (second, second_link) = first_login(Provider::GitHub, "user123");
        store.create_with_link(&first, &first_link).await.unwrap();

        let err = store
            .create_with_link(&second, &second_link)
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::DuplicateIdentity { .. }));
        assert_eq!(store.user_count(), 1);
        assert!(store.find_by_id(second.id()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn role_memberships_change_one_at_a_time() {
        let store = InMemoryCredentialStore::new();
        let (user, link) = first_login(Provider::Facebook, "fb1");
        store.create_with_link(&user, &link).await.unwrap();

        assert!(store.add_role(user.id(), Role::User).await.unwrap());
        assert!(store.add_role(user.id(), Role::Admin).await.unwrap());
        assert!(!store.add_role(user.id(), Role::Admin).await.unwrap());
        assert!(store.remove_role(user.id(), Role::User).await.unwrap());
        assert!(!store.remove_role(user.id(), Role::User).await.unwrap());

        let stored = store.find_by_id(user.id()).await.unwrap().unwrap();
        assert_eq!(stored.roles(), &RoleSet::none().with(Role::Admin));
    }

    #[tokio::test]
    async fn modifying_unknown_user_fails() {
        let store = InMemoryCredentialStore::new();
        let missing = UserId::new();
        let err = store.set_active(missing, false).await.unwrap_err();
        assert_eq!(err, StoreError::UserNotFound { user_id: missing });
    }

    #[tokio::test]
    async fn session_lifecycle() {
        let store = InMemorySessionStore::new();
        let user_id = UserId::new();
        let now = Utc::now();
        let live = Session::new(
            SessionId::generate(),
            user_id,
            RoleSet::none(),
            now,
            Duration::minutes(30),
        );
        let stale = Session::new(
            SessionId::generate(),
            user_id,
            RoleSet::none(),
            now - Duration::hours(2),
            Duration::minutes(30),
        );
        store.create(&live).await.unwrap();
        store.create(&stale).await.unwrap();

        assert_eq!(store.delete_expired(now).await.unwrap(), 1);
        assert_eq!(store.find(live.id()).await.unwrap(), Some(live.clone()));
        assert!(store.find(stale.id()).await.unwrap().is_none());

        store.delete(live.id()).await.unwrap();
        store.delete(live.id()).await.unwrap();
        assert_eq!(store.session_count(), 0);
    }

    #[tokio::test]
    async fn delete_all_for_user_leaves_others() {
        let store = InMemorySessionStore::new();
        let alice = UserId::new();
        let bob = UserId::new();
        for user_id in [alice, alice, bob] {
            let session = Session::new(
                SessionId::generate(),
                user_id,
                RoleSet::none(),
                Utc::now(),
                Duration::minutes(5),
            );
            store.create(&session).await.unwrap();
        }

        assert_eq!(store.delete_all_for_user(alice).await.unwrap(), 2);
        assert_eq!(store.session_count(), 1);
    }
}
