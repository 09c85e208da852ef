//! OAuth 2.0 client for the external identity providers.
//!
//! One `OAuthProviderClient` per configured provider. The authorization
//! code flow always uses PKCE; after the code exchange the provider's
//! user-info endpoint is read and reduced to a `ProviderProfile`.

use async_trait::async_trait;
use oauth2::{
    AuthType, AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, PkceCodeChallenge,
    PkceCodeVerifier, RedirectUrl, Scope, TokenResponse, TokenUrl, basic::BasicClient,
};
use portcullis_identity::{
    AuthorizationRequest, ExternalProvider, IdentityProviderError, Provider, ProviderProfile,
    ProviderSettings,
};
use std::fmt;

/// Sent on user-info requests; GitHub rejects requests without one.
const USER_AGENT: &str = concat!("portcullis/", env!("CARGO_PKG_VERSION"));

/// OAuth client for a single provider.
pub struct OAuthProviderClient {
    provider: Provider,
    client_id: ClientId,
    client_secret: ClientSecret,
    auth_url: AuthUrl,
    token_url: TokenUrl,
    redirect_url: RedirectUrl,
    user_info_url: reqwest::Url,
    scopes: Vec<Scope>,
    http_client: reqwest::Client,
}

impl OAuthProviderClient {
    /// Creates a client whose callback is `{public_url}/auth/{provider}/callback`.
    ///
    /// # Errors
    ///
    /// Returns an error if any endpoint URL is invalid or the HTTP client
    /// cannot be built.
    pub fn new(
        provider: Provider,
        settings: &ProviderSettings,
        public_url: &str,
    ) -> Result<Self, OAuthClientError> {
        let invalid = move |field: &'static str| {
            move |e: oauth2::url::ParseError| OAuthClientError::InvalidUrl {
                provider,
                field,
                reason: e.to_string(),
            }
        };

        let auth_url = AuthUrl::new(settings.authorize_url(provider).to_string())
            .map_err(invalid("authorize_url"))?;
        let token_url = TokenUrl::new(settings.token_url(provider).to_string())
            .map_err(invalid("token_url"))?;
        let redirect_url = RedirectUrl::new(callback_url(public_url, provider))
            .map_err(invalid("public_url"))?;
        let user_info_url = reqwest::Url::parse(settings.user_info_url(provider))
            .map_err(invalid("user_info_url"))?;

        let http_client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| OAuthClientError::HttpClient {
                reason: e.to_string(),
            })?;

        Ok(Self {
            provider,
            client_id: ClientId::new(settings.client_id().to_string()),
            client_secret: ClientSecret::new(settings.client_secret().to_string()),
            auth_url,
            token_url,
            redirect_url,
            user_info_url,
            scopes: settings
                .scopes(provider)
                .into_iter()
                .map(|s| Scope::new(s.to_string()))
                .collect(),
            http_client,
        })
    }

    /// Where the provider sends the browser back to.
    #[must_use]
    pub fn redirect_url(&self) -> &str {
        self.redirect_url.as_str()
    }

    /// Twitter only accepts client credentials in a Basic auth header; the
    /// others are sent the credentials in the request body.
    fn auth_type(&self) -> AuthType {
        match self.provider {
            Provider::Twitter => AuthType::BasicAuth,
            _ => AuthType::RequestBody,
        }
    }

    fn exchange_failed(&self, reason: impl fmt::Display) -> IdentityProviderError {
        IdentityProviderError::ExchangeFailed {
            provider: self.provider,
            reason: reason.to_string(),
        }
    }

    async fn fetch_user_info(
        &self,
        access_token: &str,
    ) -> Result<serde_json::Value, IdentityProviderError> {
        self.http_client
            .get(self.user_info_url.clone())
            .bearer_auth(access_token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| self.exchange_failed(format!("user info request failed: {e}")))?
            .error_for_status()
            .map_err(|e| self.exchange_failed(format!("user info request rejected: {e}")))?
            .json()
            .await
            .map_err(|e| self.exchange_failed(format!("user info is not JSON: {e}")))
    }
}

/// The OAuth callback URL for `provider` under `public_url`.
#[must_use]
pub fn callback_url(public_url: &str, provider: Provider) -> String {
    format!(
        "{}/auth/{}/callback",
        public_url.trim_end_matches('/'),
        provider
    )
}

#[async_trait]
impl ExternalProvider for OAuthProviderClient {
    fn provider(&self) -> Provider {
        self.provider
    }

    fn authorization_request(&self) -> AuthorizationRequest {
        let client = BasicClient::new(self.client_id.clone())
            .set_auth_uri(self.auth_url.clone())
            .set_redirect_uri(self.redirect_url.clone());

        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();

        let (auth_url, csrf_token) = client
            .authorize_url(CsrfToken::new_random)
            .add_scopes(self.scopes.iter().cloned())
            .set_pkce_challenge(pkce_challenge)
            .url();

        AuthorizationRequest {
            url: auth_url.to_string(),
            csrf_token: csrf_token.secret().clone(),
            pkce_verifier: pkce_verifier.secret().clone(),
        }
    }

    async fn exchange_code_for_profile(
        &self,
        code: &str,
        pkce_verifier: &str,
    ) -> portcullis_core::Result<ProviderProfile, IdentityProviderError> {
        let client = BasicClient::new(self.client_id.clone())
            .set_client_secret(self.client_secret.clone())
            .set_token_uri(self.token_url.clone())
            .set_redirect_uri(self.redirect_url.clone())
            .set_auth_type(self.auth_type());

        let token_response = client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .set_pkce_verifier(PkceCodeVerifier::new(pkce_verifier.to_string()))
            .request_async(&self.http_client)
            .await
            .map_err(|e| self.exchange_failed(format!("token exchange failed: {e}")))?;

        let user_info = self
            .fetch_user_info(token_response.access_token().secret())
            .await?;

        Ok(ProviderProfile::from_user_info(self.provider, &user_info)?)
    }
}

/// Errors building an OAuth client from configuration.
#[derive(Debug)]
pub enum OAuthClientError {
    InvalidUrl {
        provider: Provider,
        field: &'static str,
        reason: String,
    },
    HttpClient {
        reason: String,
    },
}

impl fmt::Display for OAuthClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidUrl {
                provider,
                field,
                reason,
            } => write!(f, "invalid {field} for {provider}: {reason}"),
            Self::HttpClient { reason } => write!(f, "failed to create HTTP client: {reason}"),
        }
    }
}

impl std::error::Error for OAuthClientError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(provider: Provider) -> OAuthProviderClient {
        OAuthProviderClient::new(
            provider,
            &ProviderSettings::new("client-123", "secret"),
            "https://portcullis.example.com/",
        )
        .expect("valid settings")
    }

    #[test]
    fn redirect_url_is_per_provider() {
        assert_eq!(
            client(Provider::GitHub).redirect_url(),
            "https://portcullis.example.com/auth/github/callback"
        );
        assert_eq!(
            client(Provider::Microsoft).redirect_url(),
            "https://portcullis.example.com/auth/microsoft/callback"
        );
    }

    #[test]
    fn authorization_request_uses_pkce_and_state() {
        let request = client(Provider::Google).authorization_request();
        let url = reqwest::Url::parse(&request.url).expect("valid URL");
        let params: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        let param = |name: &str| {
            params
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.clone())
        };

        assert!(request.url.starts_with("https://accounts.google.com/o/oauth2/v2/auth"));
        assert_eq!(param("client_id").as_deref(), Some("client-123"));
        assert_eq!(param("response_type").as_deref(), Some("code"));
        assert_eq!(param("state").as_deref(), Some(request.csrf_token.as_str()));
        assert_eq!(param("code_challenge_method").as_deref(), Some("S256"));
        assert_eq!(param("scope").as_deref(), Some("openid email profile"));
        assert!(!request.pkce_verifier.is_empty());
    }

    #[test]
    fn each_request_gets_fresh_state() {
        let client = client(Provider::Facebook);
        let a = client.authorization_request();
        let b = client.authorization_request();
        assert_ne!(a.csrf_token, b.csrf_token);
        assert_ne!(a.pkce_verifier, b.pkce_verifier);
    }

    #[test]
    fn invalid_endpoint_is_rejected() {
        let settings = ProviderSettings::new("id", "secret").with_endpoints(
            "not a url",
            "https://example.com/token",
            "https://example.com/me",
        );

        let err = OAuthProviderClient::new(Provider::GitHub, &settings, "https://example.com")
            .err()
            .expect("invalid authorize URL");

        assert!(matches!(
            err,
            OAuthClientError::InvalidUrl {
                field: "authorize_url",
                ..
            }
        ));
    }

    #[test]
    fn twitter_uses_basic_auth() {
        assert!(matches!(
            client(Provider::Twitter).auth_type(),
            AuthType::BasicAuth
        ));
        assert!(matches!(
            client(Provider::GitHub).auth_type(),
            AuthType::RequestBody
        ));
    }
}
