//! Error types for server operations.
//!
//! `AuthError` is returned by the login handlers and converted into a
//! response that never exposes internal details; those are logged instead.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use portcullis_identity::{
    IdentityProviderError, LinkError, PolicyError, Provider, SessionCreationError, StoreError,
};
use std::fmt;

use crate::auth::oauth::OAuthClientError;

/// Errors raised while handling login, callback, and logout requests.
#[derive(Debug)]
pub enum AuthError {
    /// Unknown or unconfigured provider, or a CSRF mismatch.
    Provider(IdentityProviderError),
    /// The callback arrived without the auth state cookie.
    MissingAuthState,
    /// The auth state cookie could not be read or names another provider.
    InvalidAuthState,
    /// The code exchange or user-info request failed.
    Exchange { provider: Provider, details: String },
    Link(LinkError),
    Session(SessionCreationError),
    Store(StoreError),
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Provider(e) => write!(f, "{e}"),
            Self::MissingAuthState => write!(f, "missing auth state"),
            Self::InvalidAuthState => write!(f, "invalid auth state"),
            Self::Exchange { provider, details } => {
                write!(f, "{provider} login failed: {details}")
            }
            Self::Link(e) => write!(f, "{e}"),
            Self::Session(e) => write!(f, "{e}"),
            Self::Store(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for AuthError {}

impl From<IdentityProviderError> for AuthError {
    fn from(e: IdentityProviderError) -> Self {
        Self::Provider(e)
    }
}

impl From<LinkError> for AuthError {
    fn from(e: LinkError) -> Self {
        Self::Link(e)
    }
}

impl From<SessionCreationError> for AuthError {
    fn from(e: SessionCreationError) -> Self {
        Self::Session(e)
    }
}

impl From<StoreError> for AuthError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::Provider(
                IdentityProviderError::UnknownProvider { .. }
                | IdentityProviderError::NotConfigured { .. },
            ) => (StatusCode::NOT_FOUND, "Unknown login provider"),
            Self::Provider(IdentityProviderError::CsrfMismatch { .. }) => {
                (StatusCode::BAD_REQUEST, "Invalid request state")
            }
            Self::MissingAuthState => (StatusCode::BAD_REQUEST, "Missing authentication state"),
            Self::InvalidAuthState => (StatusCode::BAD_REQUEST, "Invalid authentication state"),
            Self::Provider(_) | Self::Exchange { .. } | Self::Link(LinkError::Provider(_)) => {
                tracing::error!(error = %self, "external login failed");
                (StatusCode::BAD_GATEWAY, "Authentication failed")
            }
            Self::Session(SessionCreationError::UserDeactivated { user_id }) => {
                tracing::warn!(%user_id, "deactivated user attempted to sign in");
                (StatusCode::FORBIDDEN, "This account has been deactivated")
            }
            Self::Link(LinkError::Store(_))
            | Self::Session(SessionCreationError::Store(_))
            | Self::Session(SessionCreationError::LifetimeOutOfRange { .. })
            | Self::Store(_) => {
                tracing::error!(error = %self, "identity store error");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        };

        (status, message).into_response()
    }
}

/// Errors that stop the server from starting.
#[derive(Debug)]
pub enum StartupError {
    Config { details: String },
    Policy(PolicyError),
    BootstrapAdmin(IdentityProviderError),
    Provider(OAuthClientError),
    Database { details: String },
    Migration { details: String },
    Listen { address: String, details: String },
}

impl fmt::Display for StartupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { details } => write!(f, "invalid configuration: {details}"),
            Self::Policy(e) => write!(f, "invalid policy: {e}"),
            Self::BootstrapAdmin(e) => write!(f, "invalid bootstrap admin: {e}"),
            Self::Provider(e) => write!(f, "{e}"),
            Self::Database { details } => write!(f, "database connection failed: {details}"),
            Self::Migration { details } => write!(f, "database migration failed: {details}"),
            Self::Listen { address, details } => {
                write!(f, "failed to listen on {address}: {details}")
            }
        }
    }
}

impl std::error::Error for StartupError {}

#[cfg(test)]
mod tests {
    use super::*;
    use portcullis_core::UserId;

    #[test]
    fn status_codes() {
        let cases = [
            (
                AuthError::Provider(IdentityProviderError::UnknownProvider {
                    name: "myspace".to_string(),
                }),
                StatusCode::NOT_FOUND,
            ),
            (
                AuthError::Provider(IdentityProviderError::CsrfMismatch {
                    provider: Provider::GitHub,
                }),
                StatusCode::BAD_REQUEST,
            ),
            (AuthError::MissingAuthState, StatusCode::BAD_REQUEST),
            (
                AuthError::Exchange {
                    provider: Provider::Google,
                    details: "timeout".to_string(),
                },
                StatusCode::BAD_GATEWAY,
            ),
            (
                AuthError::Session(SessionCreationError::UserDeactivated {
                    user_id: UserId::new(),
                }),
                StatusCode::FORBIDDEN,
            ),
            (
                AuthError::Store(StoreError::Unavailable {
                    details: "down".to_string(),
                }),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(error.into_response().status(), expected);
        }
    }

    #[test]
    fn display_includes_context() {
        let err = AuthError::Exchange {
            provider: Provider::Twitter,
            details: "invalid_grant".to_string(),
        };
        assert_eq!(err.to_string(), "twitter login failed: invalid_grant");
    }
}
