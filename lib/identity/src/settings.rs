//! OAuth client settings for each external provider.
//!
//! Only the client credentials are required. Endpoints and scopes default to
//! each provider's well-known values and can be overridden, e.g. to point at
//! a test double.

use crate::provider::Provider;
use serde::{Deserialize, Serialize};

/// Well-known OAuth endpoints and default scopes for a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WellKnownEndpoints {
    pub authorize_url: &'static str,
    pub token_url: &'static str,
    pub user_info_url: &'static str,
    pub scopes: &'static str,
}

impl Provider {
    /// The provider's public OAuth endpoints.
    #[must_use]
    pub fn well_known_endpoints(&self) -> WellKnownEndpoints {
        match self {
            Self::Facebook => WellKnownEndpoints {
                authorize_url: "https://www.facebook.com/v19.0/dialog/oauth",
                token_url: "https://graph.facebook.com/v19.0/oauth/access_token",
                user_info_url: "https://graph.facebook.com/me?fields=id,name,email",
                scopes: "public_profile,email",
            },
            Self::Twitter => WellKnownEndpoints {
                authorize_url: "https://twitter.com/i/oauth2/authorize",
                token_url: "https://api.twitter.com/2/oauth2/token",
                user_info_url: "https://api.twitter.com/2/users/me",
                scopes: "users.read,tweet.read",
            },
            Self::Google => WellKnownEndpoints {
                authorize_url: "https://accounts.google.com/o/oauth2/v2/auth",
                token_url: "https://oauth2.googleapis.com/token",
                user_info_url: "https://openidconnect.googleapis.com/v1/userinfo",
                scopes: "openid,email,profile",
            },
            Self::Microsoft => WellKnownEndpoints {
                authorize_url: "https://login.microsoftonline.com/common/oauth2/v2.0/authorize",
                token_url: "https://login.microsoftonline.com/common/oauth2/v2.0/token",
                user_info_url: "https://graph.microsoft.com/v1.0/me",
                scopes: "openid,profile,email,User.Read",
            },
            Self::GitHub => WellKnownEndpoints {
                authorize_url: "https://github.com/login/oauth/authorize",
                token_url: "https://github.com/login/oauth/access_token",
                user_info_url: "https://api.github.com/user",
                scopes: "read:user,user:email",
            },
        }
    }
}

/// OAuth client settings for one provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSettings {
    client_id: String,
    client_secret: String,
    /// Comma-separated scopes; the provider default when absent.
    #[serde(default)]
    scopes: Option<String>,
    #[serde(default)]
    authorize_url: Option<String>,
    #[serde(default)]
    token_url: Option<String>,
    #[serde(default)]
    user_info_url: Option<String>,
}

impl ProviderSettings {
    #[must_use]
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            scopes: None,
            authorize_url: None,
            token_url: None,
            user_info_url: None,
        }
    }

    #[must_use]
    pub fn with_scopes(mut self, scopes: impl Into<String>) -> Self {
        self.scopes = Some(scopes.into());
        self
    }

    /// Overrides all three endpoints.
    #[must_use]
    pub fn with_endpoints(
        mut self,
        authorize_url: impl Into<String>,
        token_url: impl Into<String>,
        user_info_url: impl Into<String>,
    ) -> Self {
        self.authorize_url = Some(authorize_url.into());
        self.token_url = Some(token_url.into());
        self.user_info_url = Some(user_info_url.into());
        self
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub fn client_secret(&self) -> &str {
        &self.client_secret
    }

    /// Scopes to request, falling back to the provider's defaults.
    #[must_use]
    pub fn scopes(&self, provider: Provider) -> Vec<&str> {
        self.scopes
            .as_deref()
            .unwrap_or(provider.well_known_endpoints().scopes)
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect()
    }

    #[must_use]
    pub fn authorize_url(&self, provider: Provider) -> &str {
        self.authorize_url
            .as_deref()
            .unwrap_or(provider.well_known_endpoints().authorize_url)
    }

    #[must_use]
    pub fn token_url(&self, provider: Provider) -> &str {
        self.token_url
            .as_deref()
            .unwrap_or(provider.well_known_endpoints().token_url)
    }

    #[must_use]
    pub fn user_info_url(&self, provider: Provider) -> &str {
        self.user_info_url
            .as_deref()
            .unwrap_or(provider.well_known_endpoints().user_info_url)
    }
}

/// Settings for every provider; absent entries are disabled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub facebook: Option<ProviderSettings>,
    #[serde(default)]
    pub twitter: Option<ProviderSettings>,
    #[serde(default)]
    pub google: Option<ProviderSettings>,
    #[serde(default)]
    pub microsoft: Option<ProviderSettings>,
    #[serde(default)]
    pub github: Option<ProviderSettings>,
}

impl ProvidersConfig {
    #[must_use]
    pub fn get(&self, provider: Provider) -> Option<&ProviderSettings> {
        match provider {
            Provider::Facebook => self.facebook.as_ref(),
            Provider::Twitter => self.twitter.as_ref(),
            Provider::Google => self.google.as_ref(),
            Provider::Microsoft => self.microsoft.as_ref(),
            Provider::GitHub => self.github.as_ref(),
        }
    }

    /// Configured providers, in [`Provider::ALL`] order.
    pub fn enabled(&self) -> impl Iterator<Item = (Provider, &ProviderSettings)> {
        Provider::ALL
            .into_iter()
            .filter_map(|p| self.get(p).map(|s| (p, s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_come_from_provider() {
        let settings = ProviderSettings::new("id", "secret");

        assert_eq!(
            settings.authorize_url(Provider::GitHub),
            "https://github.com/login/oauth/authorize"
        );
        assert_eq!(
            settings.scopes(Provider::Google),
            vec!["openid", "email", "profile"]
        );
    }

    #[test]
    fn overrides_win() {
        let settings = ProviderSettings::new("id", "secret")
            .with_scopes("a, b,,c")
            .with_endpoints(
                "http://localhost/authorize",
                "http://localhost/token",
                "http://localhost/me",
            );

        assert_eq!(settings.scopes(Provider::Twitter), vec!["a", "b", "c"]);
        assert_eq!(settings.token_url(Provider::Twitter), "http://localhost/token");
        assert_eq!(
            settings.user_info_url(Provider::Twitter),
            "http://localhost/me"
        );
    }

    #[test]
    fn enabled_lists_only_configured_providers() {
        let config = ProvidersConfig {
            github: Some(ProviderSettings::new("gh", "s")),
            facebook: Some(ProviderSettings::new("fb", "s")),
            ..ProvidersConfig::default()
        };

        let enabled: Vec<_> = config.enabled().map(|(p, _)| p).collect();
        assert_eq!(enabled, vec![Provider::Facebook, Provider::GitHub]);
        assert!(config.get(Provider::Google).is_none());
    }

    #[test]
    fn deserializes_with_optional_fields_omitted() {
        let json = r#"{
            "github": {"client_id": "my-client", "client_secret": "secret"}
        }"#;

        let config: ProvidersConfig = serde_json::from_str(json).expect("deserialize");
        let github = config.get(Provider::GitHub).expect("github configured");

        assert_eq!(github.client_id(), "my-client");
        assert_eq!(
            github.user_info_url(Provider::GitHub),
            "https://api.github.com/user"
        );
        assert!(config.twitter.is_none());
    }
}
