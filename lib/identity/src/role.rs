//! Role types for coarse-grained access control.
//!
//! Roles are a static set fixed at deployment time. A user holds any
//! subset of them; holding `Admin` does not imply holding `User`.

use crate::error::PolicyError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// A named capability tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Regular member of the site.
    User,
    /// Site administrator.
    Admin,
}

impl Role {
    /// Every role known to this deployment.
    pub const ALL: [Role; 2] = [Role::User, Role::Admin];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Admin => "Admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|role| role.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| PolicyError::UnknownRole {
                role: s.to_string(),
            })
    }
}

/// The roles held by a user, or captured in a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleSet {
    roles: BTreeSet<Role>,
}

impl RoleSet {
    /// An empty role set.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Returns this set with `role` added.
    #[must_use]
    pub fn with(mut self, role: Role) -> Self {
        self.roles.insert(role);
        self
    }

    /// Adds a role. Returns false if it was already present.
    pub fn insert(&mut self, role: Role) -> bool {
        self.roles.insert(role)
    }

    /// Removes a role. Returns false if it was not present.
    pub fn remove(&mut self, role: Role) -> bool {
        self.roles.remove(&role)
    }

    #[must_use]
    pub fn contains(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.contains(Role::Admin)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = Role> + '_ {
        self.roles.iter().copied()
    }
}

impl FromIterator<Role> for RoleSet {
    fn from_iter<I: IntoIterator<Item = Role>>(iter: I) -> Self {
        Self {
            roles: iter.into_iter().collect(),
        }
    }
}
