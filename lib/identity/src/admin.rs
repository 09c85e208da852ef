//! Role and account administration.
//!
//! Changes apply to stored users only. Sessions already issued keep their
//! role snapshot until they end.

use crate::error::{IdentityProviderError, StoreError};
use crate::provider::{Provider, validate_external_id};
use crate::role::Role;
use crate::store::{CredentialStore, SessionStore};
use portcullis_core::UserId;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// A provider account written as `provider:external_id`, e.g. `github:1234`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityRef {
    pub provider: Provider,
    pub external_id: String,
}

impl fmt::Display for IdentityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.external_id)
    }
}

impl FromStr for IdentityRef {
    type Err = IdentityProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (provider, external_id) =
            s.split_once(':')
                .ok_or_else(|| IdentityProviderError::InvalidIdentityRef {
                    value: s.to_string(),
                })?;
        let provider: Provider = provider.parse()?;
        let external_id = external_id.trim();
        validate_external_id(provider, external_id)?;
        Ok(Self {
            provider,
            external_id: external_id.to_string(),
        })
    }
}

/// Grants and revokes roles, and (de)activates accounts.
#[derive(Clone)]
pub struct RoleAdministrator {
    users: Arc<dyn CredentialStore>,
    sessions: Arc<dyn SessionStore>,
}

impl RoleAdministrator {
    #[must_use]
    pub fn new(users: Arc<dyn CredentialStore>, sessions: Arc<dyn SessionStore>) -> Self {
        Self { users, sessions }
    }

    /// Grants `role`. Returns false if the user already had it.
    ///
    /// # Errors
    ///
    /// Returns `UserNotFound` for an unknown user, or the store's error.
    #[instrument(skip(self))]
    pub async fn grant_role(&self, user_id: UserId, role: Role) -> Result<bool, StoreError> {
        let granted = self.users.add_role(user_id, role).await?;
        if granted {
            info!("role granted");
        }
        Ok(granted)
    }

    /// Revokes `role`. Returns false if the user did not have it.
    #[instrument(skip(self))]
    pub async fn revoke_role(&self, user_id: UserId, role: Role) -> Result<bool, StoreError> {
        let revoked = self.users.remove_role(user_id, role).await?;
        if revoked {
            info!("role revoked");
        }
        Ok(revoked)
    }

    /// Deactivates the user and ends all of their sessions.
    #[instrument(skip(self))]
    pub async fn deactivate(&self, user_id: UserId) -> Result<(), StoreError> {
        self.users.set_active(user_id, false).await?;
        let ended = self.sessions.delete_all_for_user(user_id).await?;
        info!(ended, "user deactivated");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn reactivate(&self, user_id: UserId) -> Result<(), StoreError> {
        self.users.set_active(user_id, true).await?;
        info!("user reactivated");
        Ok(())
    }

    /// Grants `Admin` to each listed identity that has already signed in.
    ///
    /// Identities without a local user are skipped. Returns the number of
    /// users that newly received the role.
    #[instrument(skip_all, fields(count = identities.len()))]
    pub async fn bootstrap_admins(&self, identities: &[IdentityRef]) -> Result<usize, StoreError> {
        let mut granted = 0;
        for identity in identities {
            let Some(user) = self
                .users
                .find_by_external_identity(identity.provider, &identity.external_id)
                .await?
            else {
                warn!(%identity, "bootstrap admin has not signed in yet");
                continue;
            };
            if self.grant_role(user.id(), Role::Admin).await? {
                granted += 1;
            }
        }
        Ok(granted)
    }
}
