//! Centralized server configuration.
//!
//! Loaded via the `config` crate from an optional `portcullis.toml` in the
//! working directory, overlaid with environment variables using `__` as
//! the nesting separator (e.g. `PROVIDERS__GITHUB__CLIENT_ID`).

use portcullis_identity::{
    IdentityProviderError, IdentityRef, PolicyError, PolicyRegistry, PolicyRule, ProvidersConfig,
};
use serde::Deserialize;
use std::path::Path;

/// Server configuration composed from library configs.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// PostgreSQL database connection URL.
    pub database_url: String,

    /// Address to listen on.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Externally visible base URL, used to build OAuth redirect URIs.
    pub public_url: String,

    #[serde(default)]
    pub session: SessionConfig,

    /// OAuth client settings; providers without settings are disabled.
    #[serde(default)]
    pub providers: ProvidersConfig,

    /// Protected path prefixes. The built-in rules apply when empty.
    #[serde(default)]
    pub policies: Vec<PolicyConfig>,

    #[serde(default = "default_login_path")]
    pub login_path: String,

    #[serde(default = "default_access_denied_path")]
    pub access_denied_path: String,

    /// Identities granted `Admin` at startup, as `provider:external_id`.
    #[serde(default)]
    pub bootstrap_admins: Vec<String>,
}

/// Session-related configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Session duration in minutes.
    #[serde(default = "default_session_duration_minutes")]
    pub duration_minutes: i64,

    /// Interval between session cleanup runs, in seconds.
    #[serde(default = "default_cleanup_interval_seconds")]
    pub cleanup_interval_seconds: u64,

    /// Whether to set the Secure flag on cookies (requires HTTPS).
    /// Set to false for local HTTP development.
    #[serde(default = "default_secure_cookies")]
    pub secure_cookies: bool,
}

/// One protected path prefix.
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyConfig {
    pub path_prefix: String,
    /// Role name; any signed-in user is admitted when absent.
    #[serde(default)]
    pub required_role: Option<String>,
}

fn default_bind_address() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_login_path() -> String {
    "/auth/login".to_string()
}

fn default_access_denied_path() -> String {
    "/Identity/Account/AccessDenied".to_string()
}

fn default_session_duration_minutes() -> i64 {
    30
}

fn default_cleanup_interval_seconds() -> u64 {
    300
}

fn default_secure_cookies() -> bool {
    true
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            duration_minutes: default_session_duration_minutes(),
            cleanup_interval_seconds: default_cleanup_interval_seconds(),
            secure_cookies: default_secure_cookies(),
        }
    }
}

impl SessionConfig {
    /// Longest session lifetime accepted: one year.
    pub const MAX_DURATION_MINUTES: i64 = 60 * 24 * 365;

    /// Rejects values the server cannot run with.
    ///
    /// # Errors
    ///
    /// Returns a description of the first offending field.
    pub fn validate(&self) -> Result<(), String> {
        if !(1..=Self::MAX_DURATION_MINUTES).contains(&self.duration_minutes) {
            return Err(format!(
                "session.duration_minutes must be between 1 and {}, got {}",
                Self::MAX_DURATION_MINUTES,
                self.duration_minutes
            ));
        }
        if self.cleanup_interval_seconds == 0 {
            return Err("session.cleanup_interval_seconds must be at least 1".to_string());
        }
        Ok(())
    }

    /// Session lifetime. Unrepresentable values saturate, and the issuer
    /// then refuses to create sessions with them.
    #[must_use]
    pub fn duration(&self) -> chrono::Duration {
        chrono::Duration::try_minutes(self.duration_minutes).unwrap_or(chrono::Duration::MAX)
    }

    #[must_use]
    pub fn cleanup_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.cleanup_interval_seconds)
    }
}

impl ServerConfig {
    /// Loads configuration from `portcullis.toml` (if present) and the
    /// environment.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Self::load(config::File::with_name("portcullis").required(false))
    }

    /// Loads configuration from the given file, overlaid with the environment.
    pub fn from_file(path: &Path) -> Result<Self, config::ConfigError> {
        Self::load(config::File::from(path))
    }

    fn load<S>(file: S) -> Result<Self, config::ConfigError>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let config: Self = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config
            .session
            .validate()
            .map_err(config::ConfigError::Message)?;
        Ok(config)
    }

    /// Builds the policy registry from `policies`, or the built-in rules if
    /// none are configured.
    ///
    /// # Errors
    ///
    /// Returns the first invalid prefix or unknown role.
    pub fn policy_registry(&self) -> Result<PolicyRegistry, PolicyError> {
        if self.policies.is_empty() {
            return Ok(PolicyRegistry::from_rules(PolicyRegistry::default_rules()));
        }
        let rules = self
            .policies
            .iter()
            .map(|p| PolicyRule::parse(&p.path_prefix, p.required_role.as_deref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(PolicyRegistry::from_rules(rules))
    }

    /// Parses `bootstrap_admins`.
    pub fn bootstrap_identities(&self) -> Result<Vec<IdentityRef>, IdentityProviderError> {
        self.bootstrap_admins.iter().map(|s| s.parse()).collect()
    }
}
