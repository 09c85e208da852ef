//! Persistence seams for users, identity links, and sessions.
//!
//! The core never talks to a database directly. Implementations live with
//! the deployment (Postgres in the server) or in [`crate::memory`] for
//! tests and single-process use.

use crate::error::StoreError;
use crate::provider::Provider;
use crate::role::Role;
use crate::session::{Session, SessionId};
use crate::user::{ExternalIdentityLink, User};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use portcullis_core::UserId;

/// Storage for local users and their external identity links.
///
/// Implementations must enforce uniqueness of `(provider, external_id)`
/// and report a violation as [`StoreError::DuplicateIdentity`].
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Finds the user linked to a provider account.
    async fn find_by_external_identity(
        &self,
        provider: Provider,
        external_id: &str,
    ) -> Result<Option<User>, StoreError>;

    /// Finds a user by local id.
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, StoreError>;

    /// Persists a new user and its first link as one unit.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateIdentity` if the link already belongs to someone,
    /// in which case nothing is written.
    async fn create_with_link(
        &self,
        user: &User,
        link: &ExternalIdentityLink,
    ) -> Result<(), StoreError>;

    /// Adds one role membership. Returns false if the user already held it.
    ///
    /// Must be atomic per user: concurrent calls for different roles all
    /// take effect.
    async fn add_role(&self, id: UserId, role: Role) -> Result<bool, StoreError>;

    /// Removes one role membership. Returns false if the user did not hold it.
    async fn remove_role(&self, id: UserId, role: Role) -> Result<bool, StoreError>;

    /// Activates or deactivates a user.
    async fn set_active(&self, id: UserId, active: bool) -> Result<(), StoreError>;
}

/// Storage for issued sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, session: &Session) -> Result<(), StoreError>;

    async fn find(&self, id: &SessionId) -> Result<Option<Session>, StoreError>;

    /// Deletes a session. Deleting an unknown session is not an error.
    async fn delete(&self, id: &SessionId) -> Result<(), StoreError>;

    /// Deletes every session of a user, returning how many were removed.
    async fn delete_all_for_user(&self, user_id: UserId) -> Result<u64, StoreError>;

    /// Deletes sessions that expired before `now`, returning how many were removed.
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}
