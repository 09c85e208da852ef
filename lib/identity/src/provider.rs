//! External identity providers and the profiles they hand back.
//!
//! Every provider is reduced to one capability, [`ExternalProvider`]: turn
//! an authorization code into a [`ProviderProfile`]. The differences between
//! providers (field names, nesting, numeric ids) are confined to
//! [`ProviderProfile::from_user_info`].

use crate::error::IdentityProviderError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Longest external id we accept from a provider.
pub const MAX_EXTERNAL_ID_LEN: usize = 256;

/// The identity providers a user can sign in with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Facebook,
    Twitter,
    Google,
    Microsoft,
    GitHub,
}

impl Provider {
    pub const ALL: [Provider; 5] = [
        Provider::Facebook,
        Provider::Twitter,
        Provider::Google,
        Provider::Microsoft,
        Provider::GitHub,
    ];

    /// Stable lowercase name used in routes, config keys, and storage.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Facebook => "facebook",
            Self::Twitter => "twitter",
            Self::Google => "google",
            Self::Microsoft => "microsoft",
            Self::GitHub => "github",
        }
    }

    /// Human-facing name for login pages.
    #[must_use]
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Facebook => "Facebook",
            Self::Twitter => "Twitter",
            Self::Google => "Google",
            Self::Microsoft => "Microsoft",
            Self::GitHub => "GitHub",
        }
    }

    fn profile_fields(&self) -> ProfileFields {
        match self {
            Self::GitHub => ProfileFields {
                envelope: None,
                id: "id",
                name: &["name", "login"],
                email: &["email"],
            },
            Self::Google => ProfileFields {
                envelope: None,
                id: "sub",
                name: &["name"],
                email: &["email"],
            },
            Self::Microsoft => ProfileFields {
                envelope: None,
                id: "id",
                name: &["displayName"],
                email: &["mail", "userPrincipalName"],
            },
            Self::Facebook => ProfileFields {
                envelope: None,
                id: "id",
                name: &["name"],
                email: &["email"],
            },
            Self::Twitter => ProfileFields {
                envelope: Some("data"),
                id: "id",
                name: &["name", "username"],
                email: &[],
            },
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = IdentityProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| IdentityProviderError::UnknownProvider {
                name: s.to_string(),
            })
    }
}

/// Where a provider puts the fields we read from its user-info payload.
struct ProfileFields {
    envelope: Option<&'static str>,
    id: &'static str,
    name: &'static [&'static str],
    email: &'static [&'static str],
}

/// Optional profile details copied onto a new user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileClaims {
    pub email: Option<String>,
    pub display_name: Option<String>,
}

impl ProfileClaims {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_email(mut self, email: Option<String>) -> Self {
        self.email = email;
        self
    }

    #[must_use]
    pub fn with_display_name(mut self, name: Option<String>) -> Self {
        self.display_name = name;
        self
    }
}

/// A validated profile returned by an external provider after login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderProfile {
    pub provider: Provider,
    pub external_id: String,
    pub claims: ProfileClaims,
}

impl ProviderProfile {
    /// Builds a profile from a provider's raw user-info response.
    ///
    /// # Errors
    ///
    /// Returns `MalformedProfile` if the payload is not an object, the id is
    /// missing or invalid, or a profile field has the wrong type.
    pub fn from_user_info(
        provider: Provider,
        user_info: &Value,
    ) -> Result<Self, IdentityProviderError> {
        let malformed =
            move |reason: String| IdentityProviderError::MalformedProfile { provider, reason };
        let fields = provider.profile_fields();

        let root = user_info
            .as_object()
            .ok_or_else(|| malformed("user info is not a JSON object".to_string()))?;
        let object = match fields.envelope {
            Some(key) => root
                .get(key)
                .and_then(Value::as_object)
                .ok_or_else(|| malformed(format!("missing '{key}' object")))?,
            None => root,
        };

        let external_id = match object.get(fields.id) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) if n.is_u64() || n.is_i64() => n.to_string(),
            Some(_) => return Err(malformed(format!("'{}' is not a string or integer", fields.id))),
            None => return Err(malformed(format!("missing '{}'", fields.id))),
        };
        validate_external_id(provider, &external_id)?;

        let claims = ProfileClaims {
            email: first_string(object, fields.email).map_err(malformed)?,
            display_name: first_string(object, fields.name).map_err(malformed)?,
        };

        Ok(Self {
            provider,
            external_id,
            claims,
        })
    }
}

/// First non-empty string among `keys`; null and absent fields are skipped.
fn first_string(object: &Map<String, Value>, keys: &[&str]) -> Result<Option<String>, String> {
    for key in keys {
        match object.get(*key) {
            None | Some(Value::Null) => continue,
            Some(Value::String(s)) if s.trim().is_empty() => continue,
            Some(Value::String(s)) => return Ok(Some(s.trim().to_string())),
            Some(_) => return Err(format!("'{key}' is not a string")),
        }
    }
    Ok(None)
}

/// Checks that an external id can key an identity link.
///
/// # Errors
///
/// Returns `MalformedProfile` for empty, oversized, or control-character ids.
pub fn validate_external_id(
    provider: Provider,
    external_id: &str,
) -> Result<(), IdentityProviderError> {
    let reason = if external_id.is_empty() {
        Some("external id is empty".to_string())
    } else if external_id.len() > MAX_EXTERNAL_ID_LEN {
        Some(format!("external id exceeds {MAX_EXTERNAL_ID_LEN} bytes"))
    } else if external_id.chars().any(char::is_control) {
        Some("external id contains control characters".to_string())
    } else {
        None
    };

    match reason {
        Some(reason) => Err(IdentityProviderError::MalformedProfile { provider, reason }),
        None => Ok(()),
    }
}

/// Data needed to send the user to a provider and validate the callback.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    /// URL to redirect the browser to.
    pub url: String,
    /// State parameter; must come back unchanged on the callback.
    pub csrf_token: String,
    /// PKCE verifier to present when exchanging the code.
    pub pkce_verifier: String,
}

/// A third-party identity service.
#[async_trait]
pub trait ExternalProvider: Send + Sync {
    /// Which provider this is.
    fn provider(&self) -> Provider;

    /// Starts a login: builds the redirect URL and the state to keep.
    fn authorization_request(&self) -> AuthorizationRequest;

    /// Exchanges a callback code for the signed-in user's profile.
    async fn exchange_code_for_profile(
        &self,
        code: &str,
        pkce_verifier: &str,
    ) -> portcullis_core::Result<ProviderProfile, IdentityProviderError>;
}
