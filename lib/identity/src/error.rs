//! Error types for the identity crate.
//!
//! Plain enums; callers wrap them in `portcullis_core::Result` where context is layered:
//! - `IdentityProviderError`: the external provider handed back something unusable
//! - `StoreError`: credential or session persistence failed
//! - `LinkError`: resolving an external identity to a local user failed
//! - `SessionCreationError`: a resolved user could not be given a session
//! - `PolicyError`: the static policy configuration is invalid
//!
//! Authorization denials are not errors; see [`crate::gate::Decision`].

use crate::provider::Provider;
use portcullis_core::UserId;
use std::fmt;

/// Failures attributable to an external identity provider or its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityProviderError {
    /// The provider name is not one we federate with.
    UnknownProvider { name: String },
    /// The provider is known but has no credentials configured.
    NotConfigured { provider: Provider },
    /// The profile returned by the provider is missing or has invalid fields.
    MalformedProfile { provider: Provider, reason: String },
    /// The code exchange or user-info request failed.
    ExchangeFailed { provider: Provider, reason: String },
    /// The callback state did not match the login attempt.
    CsrfMismatch { provider: Provider },
    /// An identity reference is not written as `provider:external_id`.
    InvalidIdentityRef { value: String },
}

impl fmt::Display for IdentityProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownProvider { name } => {
                write!(f, "unknown identity provider '{name}'")
            }
            Self::NotConfigured { provider } => {
                write!(f, "identity provider '{provider}' is not configured")
            }
            Self::MalformedProfile { provider, reason } => {
                write!(f, "malformed profile from '{provider}': {reason}")
            }
            Self::ExchangeFailed { provider, reason } => {
                write!(f, "code exchange with '{provider}' failed: {reason}")
            }
            Self::CsrfMismatch { provider } => {
                write!(f, "login state mismatch for '{provider}'")
            }
            Self::InvalidIdentityRef { value } => {
                write!(f, "'{value}' is not of the form provider:external_id")
            }
        }
    }
}

impl std::error::Error for IdentityProviderError {}

/// Errors from the credential and session stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Another user already owns this (provider, external id) pair.
    ///
    /// Raised by the uniqueness constraint when two first logins race.
    DuplicateIdentity {
        provider: Provider,
        external_id: String,
    },
    /// No user exists with this id.
    UserNotFound { user_id: UserId },
    /// The backing store could not be reached or rejected the operation.
    Unavailable { details: String },
    /// A stored record could not be decoded.
    Corrupt { details: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateIdentity {
                provider,
                external_id,
            } => {
                write!(f, "identity {provider}:{external_id} is already linked")
            }
            Self::UserNotFound { user_id } => {
                write!(f, "user not found: {user_id}")
            }
            Self::Unavailable { details } => {
                write!(f, "store unavailable: {details}")
            }
            Self::Corrupt { details } => {
                write!(f, "corrupt stored record: {details}")
            }
        }
    }
}

impl std::error::Error for StoreError {}

/// Errors from resolving an external identity to a local user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// The provider profile was unusable.
    Provider(IdentityProviderError),
    /// The credential store failed.
    Store(StoreError),
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Provider(e) => write!(f, "identity link rejected: {e}"),
            Self::Store(e) => write!(f, "identity link failed: {e}"),
        }
    }
}

impl std::error::Error for LinkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Provider(e) => Some(e),
            Self::Store(e) => Some(e),
        }
    }
}

impl From<IdentityProviderError> for LinkError {
    fn from(e: IdentityProviderError) -> Self {
        Self::Provider(e)
    }
}

impl From<StoreError> for LinkError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

/// Errors from issuing a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCreationError {
    /// The user has been deactivated and may not sign in.
    UserDeactivated { user_id: UserId },
    /// The configured lifetime is not positive or runs past the calendar.
    LifetimeOutOfRange { ttl_seconds: i64 },
    /// The session could not be persisted.
    Store(StoreError),
}

impl fmt::Display for SessionCreationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UserDeactivated { user_id } => {
                write!(f, "user {user_id} is deactivated")
            }
            Self::LifetimeOutOfRange { ttl_seconds } => {
                write!(f, "session lifetime of {ttl_seconds}s is out of range")
            }
            Self::Store(e) => write!(f, "session could not be stored: {e}"),
        }
    }
}

impl std::error::Error for SessionCreationError {}

impl From<StoreError> for SessionCreationError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

/// Errors in the static policy configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    /// The path prefix cannot be matched against request paths.
    InvalidPrefix { prefix: String, reason: String },
    /// The required role is not a known role.
    UnknownRole { role: String },
}

impl fmt::Display for PolicyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPrefix { prefix, reason } => {
                write!(f, "invalid policy prefix '{prefix}': {reason}")
            }
            Self::UnknownRole { role } => {
                write!(f, "unknown role '{role}'")
            }
        }
    }
}

impl std::error::Error for PolicyError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_provider_display() {
        let err = IdentityProviderError::UnknownProvider {
            name: "myspace".to_string(),
        };
        assert!(err.to_string().contains("myspace"));
    }

    #[test]
    fn malformed_profile_display_names_provider() {
        let err = IdentityProviderError::MalformedProfile {
            provider: Provider::GitHub,
            reason: "missing id".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("github"));
        assert!(msg.contains("missing id"));
    }

    #[test]
    fn duplicate_identity_display() {
        let err = StoreError::DuplicateIdentity {
            provider: Provider::Google,
            external_id: "1234".to_string(),
        };
        assert!(err.to_string().contains("google:1234"));
    }

    #[test]
    fn link_error_wraps_store_error() {
        let err: LinkError = StoreError::Unavailable {
            details: "connection refused".to_string(),
        }
        .into();
        assert!(matches!(err, LinkError::Store(_)));
        assert!(err.to_string().contains("connection refused"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn deactivated_display_names_user() {
        let user_id = UserId::new();
        let err = SessionCreationError::UserDeactivated { user_id };
        assert!(err.to_string().contains(&user_id.to_string()));
    }
}
