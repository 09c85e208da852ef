//! Resolution of external identities to local users.
//!
//! `resolve` is create-or-get. Two first logins for the same provider
//! account can race; the store's uniqueness constraint lets exactly one of
//! them create the user, and the loser re-reads and returns the winner's
//! user instead of failing.

use crate::error::{LinkError, StoreError};
use crate::provider::{ProfileClaims, Provider, ProviderProfile, validate_external_id};
use crate::store::CredentialStore;
use crate::user::User;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Result of resolving an external identity.
#[derive(Debug, Clone)]
pub struct LinkOutcome {
    /// The local user linked to the external identity.
    pub user: User,
    /// True if this call created the user.
    pub is_new_user: bool,
}

/// Maps provider accounts to local users, creating users on first login.
#[derive(Clone)]
pub struct IdentityLinker {
    store: Arc<dyn CredentialStore>,
}

impl IdentityLinker {
    #[must_use]
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    /// Returns the user linked to `(provider, external_id)`, creating the
    /// user and link on first login.
    ///
    /// # Errors
    ///
    /// Returns `LinkError::Provider` if the external id is malformed and
    /// `LinkError::Store` if the store fails. A lost creation race is not an
    /// error.
    #[instrument(skip(self, claims), fields(provider = %provider))]
    pub async fn resolve(
        &self,
        provider: Provider,
        external_id: &str,
        claims: &ProfileClaims,
    ) -> Result<LinkOutcome, LinkError> {
        validate_external_id(provider, external_id)?;

        if let Some(user) = self
            .store
            .find_by_external_identity(provider, external_id)
            .await?
        {
            debug!(user_id = %user.id(), "external identity already linked");
            return Ok(LinkOutcome {
                user,
                is_new_user: false,
            });
        }

        let (user, link) = User::from_first_login(provider, external_id, claims);
        match self.store.create_with_link(&user, &link).await {
            Ok(()) => {
                info!(user_id = %user.id(), "created user on first login");
                Ok(LinkOutcome {
                    user,
                    is_new_user: true,
                })
            }
            Err(StoreError::DuplicateIdentity { .. }) => {
                debug!("lost first-login race, re-reading linked user");
                self.refetch_after_conflict(provider, external_id).await
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Convenience wrapper for a profile returned by an [`ExternalProvider`].
    ///
    /// [`ExternalProvider`]: crate::provider::ExternalProvider
    pub async fn resolve_profile(
        &self,
        profile: &ProviderProfile,
    ) -> Result<LinkOutcome, LinkError> {
        self.resolve(profile.provider, &profile.external_id, &profile.claims)
            .await
    }

    async fn refetch_after_conflict(
        &self,
        provider: Provider,
        external_id: &str,
    ) -> Result<LinkOutcome, LinkError> {
        match self
            .store
            .find_by_external_identity(provider, external_id)
            .await?
        {
            Some(user) => Ok(LinkOutcome {
                user,
                is_new_user: false,
            }),
            None => {
                warn!("identity conflict reported but no linked user found");
                Err(StoreError::DuplicateIdentity {
                    provider,
                    external_id: external_id.to_string(),
                }
                .into())
            }
        }
    }
}
