//! Local user accounts and the external identities linked to them.
//!
//! A user is created the first time someone signs in through an external
//! provider and is never deleted; deactivation is the end of its lifecycle.

use crate::provider::{ProfileClaims, Provider};
use crate::role::{Role, RoleSet};
use chrono::{DateTime, Utc};
use portcullis_core::UserId;
use serde::{Deserialize, Serialize};

/// Association between a provider account and a local user.
///
/// `(provider, external_id)` is unique across all users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalIdentityLink {
    pub provider: Provider,
    pub external_id: String,
    pub user_id: UserId,
    pub linked_at: DateTime<Utc>,
}

impl ExternalIdentityLink {
    #[must_use]
    pub fn new(provider: Provider, external_id: impl Into<String>, user_id: UserId) -> Self {
        Self {
            provider,
            external_id: external_id.into(),
            user_id,
            linked_at: Utc::now(),
        }
    }

    /// Returns true if this link is for the given provider account.
    #[must_use]
    pub fn is_for(&self, provider: Provider, external_id: &str) -> bool {
        self.provider == provider && self.external_id == external_id
    }
}

/// A local user account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    id: UserId,
    roles: RoleSet,
    links: Vec<ExternalIdentityLink>,
    email: Option<String>,
    display_name: Option<String>,
    active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl User {
    /// Creates an active user with no roles and no links.
    #[must_use]
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: UserId::new(),
            roles: RoleSet::none(),
            links: Vec::new(),
            email: None,
            display_name: None,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Creates the user for a first login, copying the profile claims.
    ///
    /// Returns the user together with the link that must be stored with it.
    #[must_use]
    pub fn from_first_login(
        provider: Provider,
        external_id: &str,
        claims: &ProfileClaims,
    ) -> (Self, ExternalIdentityLink) {
        let mut user = Self::new();
        user.email = claims.email.clone();
        user.display_name = claims.display_name.clone();
        let link = ExternalIdentityLink::new(provider, external_id, user.id);
        user.links.push(link.clone());
        (user, link)
    }

    /// Reconstitutes a user from storage.
    #[must_use]
    #[expect(clippy::too_many_arguments)]
    pub fn with_all_fields(
        id: UserId,
        roles: RoleSet,
        links: Vec<ExternalIdentityLink>,
        email: Option<String>,
        display_name: Option<String>,
        active: bool,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            roles,
            links,
            email,
            display_name,
            active,
            created_at,
            updated_at,
        }
    }

    #[must_use]
    pub fn id(&self) -> UserId {
        self.id
    }

    #[must_use]
    pub fn roles(&self) -> &RoleSet {
        &self.roles
    }

    #[must_use]
    pub fn links(&self) -> &[ExternalIdentityLink] {
        &self.links
    }

    /// Returns true if the given provider account is linked to this user.
    #[must_use]
    pub fn is_linked_to(&self, provider: Provider, external_id: &str) -> bool {
        self.links.iter().any(|l| l.is_for(provider, external_id))
    }

    #[must_use]
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    #[must_use]
    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    /// Returns false once the user has been deactivated.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Adds a role. Returns false if the user already had it.
    pub fn grant_role(&mut self, role: Role) -> bool {
        let changed = self.roles.insert(role);
        if changed {
            self.updated_at = Utc::now();
        }
        changed
    }

    /// Removes a role. Returns false if the user did not have it.
    pub fn revoke_role(&mut self, role: Role) -> bool {
        let changed = self.roles.remove(role);
        if changed {
            self.updated_at = Utc::now();
        }
        changed
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
        self.updated_at = Utc::now();
    }
}

impl Default for User {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_user_is_active_without_roles() {
        let user = User::new();
        assert!(user.is_active());
        assert!(user.roles().is_empty());
        assert!(user.links().is_empty());
        assert_eq!(user.created_at(), user.updated_at());
    }

    #[test]
    fn first_login_links_identity_and_copies_claims() {
        let claims = ProfileClaims::new()
            .with_email(Some("octo@example.com".to_string()))
            .with_display_name(Some("Octo".to_string()));

        let (user, link) = User::from_first_login(Provider::GitHub, "user123", &claims);

        assert_eq!(link.user_id, user.id());
        assert!(user.is_linked_to(Provider::GitHub, "user123"));
        assert!(!user.is_linked_to(Provider::Google, "user123"));
        assert_eq!(user.email(), Some("octo@example.com"));
        assert_eq!(user.display_name(), Some("Octo"));
        assert!(user.roles().is_empty());
    }

    #[test]
    fn grant_role_touches_timestamp_only_on_change() {
        let mut user = User::new();
        let original = user.updated_at();
        std::thread::sleep(std::time::Duration::from_millis(2));

        assert!(user.grant_role(Role::Admin));
        let after_grant = user.updated_at();
        assert!(after_grant > original);

        assert!(!user.grant_role(Role::Admin));
        assert_eq!(user.updated_at(), after_grant);
    }

    #[test]
    fn revoke_role_reports_absence() {
        let mut user = User::new();
        assert!(!user.revoke_role(Role::User));
        user.grant_role(Role::User);
        assert!(user.revoke_role(Role::User));
        assert!(user.roles().is_empty());
    }

    #[test]
    fn deactivation_is_reversible() {
        let mut user = User::new();
        user.set_active(false);
        assert!(!user.is_active());
        user.set_active(true);
        assert!(user.is_active());
    }

    #[test]
    fn with_all_fields_preserves_values() {
        let id = UserId::new();
        let created = Utc::now() - chrono::Duration::days(30);
        let updated = Utc::now() - chrono::Duration::days(1);
        let link = ExternalIdentityLink::new(Provider::Microsoft, "ms-1", id);

        let user = User::with_all_fields(
            id,
            RoleSet::none().with(Role::User),
            vec![link.clone()],
            Some("m@example.com".to_string()),
            None,
            false,
            created,
            updated,
        );

        assert_eq!(user.id(), id);
        assert!(user.roles().contains(Role::User));
        assert_eq!(user.links(), &[link]);
        assert_eq!(user.email(), Some("m@example.com"));
        assert!(user.display_name().is_none());
        assert!(!user.is_active());
        assert_eq!(user.created_at(), created);
        assert_eq!(user.updated_at(), updated);
    }
}
