//! Static path-prefix policies.
//!
//! The registry is built once at startup and shared read-only. Matching is
//! segment-aware and ASCII case-insensitive; the longest matching prefix
//! wins.

use crate::error::PolicyError;
use crate::role::Role;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A protected path prefix.
///
/// A rule without a role admits any authenticated session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    path_prefix: String,
    required_role: Option<Role>,
}

impl PolicyRule {
    /// Creates a rule, normalizing the prefix.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPrefix` if the prefix contains whitespace, `?` or `#`.
    pub fn new(path_prefix: &str, required_role: Option<Role>) -> Result<Self, PolicyError> {
        Ok(Self {
            path_prefix: normalize_prefix(path_prefix)?,
            required_role,
        })
    }

    /// Creates a rule from configuration strings.
    ///
    /// # Errors
    ///
    /// Returns `UnknownRole` for an unrecognized role name, or `InvalidPrefix`.
    pub fn parse(path_prefix: &str, required_role: Option<&str>) -> Result<Self, PolicyError> {
        let role = required_role.map(str::parse::<Role>).transpose()?;
        Self::new(path_prefix, role)
    }

    #[must_use]
    pub fn path_prefix(&self) -> &str {
        &self.path_prefix
    }

    #[must_use]
    pub fn required_role(&self) -> Option<Role> {
        self.required_role
    }

    /// Returns true if `path` (already normalized and lowercased) falls under
    /// this rule.
    fn covers(&self, key: &str, path: &str) -> bool {
        key == "/"
            || path == key
            || (path.starts_with(key) && path.as_bytes().get(key.len()) == Some(&b'/'))
    }
}

fn normalize_prefix(raw: &str) -> Result<String, PolicyError> {
    let invalid = |reason: &str| PolicyError::InvalidPrefix {
        prefix: raw.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = raw.trim();
    if trimmed.chars().any(char::is_whitespace) {
        return Err(invalid("contains whitespace"));
    }
    if trimmed.contains(['?', '#']) {
        return Err(invalid("contains a query or fragment delimiter"));
    }

    let stripped = trimmed.trim_matches('/');
    if stripped.contains("//") {
        return Err(invalid("contains an empty segment"));
    }
    Ok(format!("/{stripped}"))
}

/// Strips query and fragment, removes a trailing slash, and lowercases.
fn normalize_request_path(path: &str) -> String {
    let end = path.find(['?', '#']).unwrap_or(path.len());
    let path = path[..end].trim_end_matches('/');
    let mut normalized = String::with_capacity(path.len() + 1);
    if !path.starts_with('/') {
        normalized.push('/');
    }
    normalized.push_str(path);
    normalized.make_ascii_lowercase();
    normalized
}

/// Builder for [`PolicyRegistry`].
#[derive(Debug, Default)]
pub struct PolicyRegistryBuilder {
    entries: Vec<(String, Option<Role>)>,
}

impl PolicyRegistryBuilder {
    /// Adds a rule. A later registration of the same prefix replaces an
    /// earlier one.
    #[must_use]
    pub fn register(mut self, path_prefix: impl Into<String>, required_role: Option<Role>) -> Self {
        self.entries.push((path_prefix.into(), required_role));
        self
    }

    /// Validates all registered prefixes and freezes the registry.
    ///
    /// # Errors
    ///
    /// Returns the first `PolicyError` encountered.
    pub fn build(self) -> Result<PolicyRegistry, PolicyError> {
        let rules = self
            .entries
            .into_iter()
            .map(|(prefix, role)| PolicyRule::new(&prefix, role))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(PolicyRegistry::from_valid_rules(rules))
    }
}

/// Immutable table of path policies.
#[derive(Debug, Clone, Default)]
pub struct PolicyRegistry {
    // Keyed by lowercased prefix; ordered longest first for matching.
    rules: Vec<(String, PolicyRule)>,
}

impl PolicyRegistry {
    #[must_use]
    pub fn builder() -> PolicyRegistryBuilder {
        PolicyRegistryBuilder::default()
    }

    /// Builds a registry from already validated rules.
    #[must_use]
    pub fn from_rules(rules: impl IntoIterator<Item = PolicyRule>) -> Self {
        Self::from_valid_rules(rules)
    }

    /// The rules used when configuration supplies none: `/Games` needs a
    /// session and `/Admin` needs the `Admin` role.
    #[must_use]
    pub fn default_rules() -> Vec<PolicyRule> {
        vec![
            PolicyRule {
                path_prefix: "/Games".to_string(),
                required_role: None,
            },
            PolicyRule {
                path_prefix: "/Admin".to_string(),
                required_role: Some(Role::Admin),
            },
        ]
    }

    fn from_valid_rules(rules: impl IntoIterator<Item = PolicyRule>) -> Self {
        let by_key: BTreeMap<String, PolicyRule> = rules
            .into_iter()
            .map(|rule| (rule.path_prefix.to_ascii_lowercase(), rule))
            .collect();
        let mut rules: Vec<_> = by_key.into_iter().collect();
        rules.sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        Self { rules }
    }

    /// Returns the most specific rule covering `path`, if any.
    #[must_use]
    pub fn match_path(&self, path: &str) -> Option<&PolicyRule> {
        let path = normalize_request_path(path);
        self.rules
            .iter()
            .find(|(key, rule)| rule.covers(key, &path))
            .map(|(_, rule)| rule)
    }

    /// All rules, longest prefix first.
    pub fn rules(&self) -> impl Iterator<Item = &PolicyRule> {
        self.rules.iter().map(|(_, rule)| rule)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
