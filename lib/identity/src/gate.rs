//! Per-request authorization decisions.

use crate::error::StoreError;
use crate::policy::PolicyRegistry;
use crate::role::Role;
use crate::session::{Session, SessionId};
use crate::store::SessionStore;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Why a request was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// The path is protected and the caller has no session.
    Unauthenticated,
    /// The caller's session has expired.
    SessionExpired,
    /// The session lacks the role the matching rule requires.
    MissingRole { required: Role },
}

impl DenyReason {
    /// Machine-readable reason code.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::SessionExpired => "session_expired",
            Self::MissingRole { .. } => "missing_role",
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

impl Decision {
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Result of authorizing by session token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenAuthorization {
    pub decision: Decision,
    /// The live session the token referred to, if any.
    pub session: Option<Session>,
}

/// Evaluates sessions against the policy registry.
#[derive(Debug, Clone)]
pub struct AuthorizationGate {
    policies: Arc<PolicyRegistry>,
}

impl AuthorizationGate {
    #[must_use]
    pub fn new(policies: Arc<PolicyRegistry>) -> Self {
        Self { policies }
    }

    #[must_use]
    pub fn policies(&self) -> &PolicyRegistry {
        &self.policies
    }

    /// Decides whether `session` may access `path` now.
    #[must_use]
    pub fn authorize(&self, session: Option<&Session>, path: &str) -> Decision {
        self.authorize_at(session, path, Utc::now())
    }

    /// Decides whether `session` may access `path` at time `now`.
    ///
    /// The result depends only on the arguments and the registry.
    #[must_use]
    pub fn authorize_at(&self, session: Option<&Session>, path: &str, now: DateTime<Utc>) -> Decision {
        if session.is_some_and(|s| s.is_expired_at(now)) {
            return Decision::Deny(DenyReason::SessionExpired);
        }

        let Some(rule) = self.policies.match_path(path) else {
            return Decision::Allow;
        };

        let Some(session) = session else {
            return Decision::Deny(DenyReason::Unauthenticated);
        };

        match rule.required_role() {
            Some(required) if !session.roles().contains(required) => {
                Decision::Deny(DenyReason::MissingRole { required })
            }
            _ => Decision::Allow,
        }
    }

    /// Resolves `token` through `sessions` and authorizes the request.
    ///
    /// An unknown token is treated as no session. An expired session is
    /// deleted and the request is denied with `session_expired`.
    ///
    /// # Errors
    ///
    /// Returns the store's error if the session lookup fails.
    pub async fn authorize_token(
        &self,
        sessions: &dyn SessionStore,
        token: Option<&SessionId>,
        path: &str,
    ) -> Result<TokenAuthorization, StoreError> {
        let now = Utc::now();
        let session = match token {
            Some(token) => sessions.find(token).await?,
            None => None,
        };

        let decision = self.authorize_at(session.as_ref(), path, now);
        debug!(path, decision = ?decision, "authorization decision");

        if let (Some(s), Decision::Deny(DenyReason::SessionExpired)) = (&session, decision) {
            sessions.delete(s.id()).await?;
            return Ok(TokenAuthorization {
                decision,
                session: None,
            });
        }

        Ok(TokenAuthorization { decision, session })
    }
}
