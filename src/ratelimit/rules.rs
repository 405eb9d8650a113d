//! Named rate limit policies.
//!
//! Different endpoints warrant different budgets: login attempts are far
//! stricter than catalog reads. A [`PolicySet`] maps policy names to
//! [`LimitConfig`]s, with a default for any name it does not know.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use super::limiter::LimitConfig;
use crate::error::{Result, TollgateError};

/// Name of the fallback policy. It cannot be used for a named policy.
pub const DEFAULT_POLICY: &str = "default";

/// A set of named limit policies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicySet {
    /// Policy used for names not listed in `policies`
    #[serde(default)]
    pub default: LimitConfig,
    /// Map of policy name to its limits
    #[serde(default)]
    pub policies: HashMap<String, LimitConfig>,
}

impl PolicySet {
    /// Create a policy set with only the default policy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load policies from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let set: PolicySet = serde_yaml::from_str(yaml)
            .map_err(|e| TollgateError::Config(format!("Failed to parse rate limit policies: {}", e)))?;
        set.validate()?;
        debug!(policies = set.policies.len(), "Parsed rate limit policies");
        Ok(set)
    }

    /// Add or replace a named policy.
    pub fn insert(&mut self, name: impl Into<String>, config: LimitConfig) {
        self.policies.insert(name.into(), config);
    }

    /// The policy for `name`, or the default one.
    pub fn get(&self, name: &str) -> &LimitConfig {
        self.resolve(name).1
    }

    /// The name and limits of the policy that applies to `name`.
    ///
    /// Unknown names all resolve to [`DEFAULT_POLICY`].
    pub fn resolve<'a, 'b>(&'a self, name: &'b str) -> (&'b str, &'a LimitConfig) {
        match self.policies.get(name) {
            Some(config) => (name, config),
            None => (DEFAULT_POLICY, &self.default),
        }
    }

    /// Whether `name` has its own policy.
    pub fn contains(&self, name: &str) -> bool {
        self.policies.contains_key(name)
    }

    /// Every policy in the set, the default first.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &LimitConfig)> {
        std::iter::once((DEFAULT_POLICY, &self.default))
            .chain(self.policies.iter().map(|(name, config)| (name.as_str(), config)))
    }

    /// Check every policy, naming the first invalid one.
    pub fn validate(&self) -> Result<()> {
        self.default
            .validate()
            .map_err(|e| in_policy("default policy", e))?;

        if self.policies.contains_key(DEFAULT_POLICY) {
            return Err(TollgateError::Config(format!(
                "policy name '{}' is reserved; set the top-level default instead",
                DEFAULT_POLICY
            )));
        }

        for (name, config) in &self.policies {
            config
                .validate()
                .map_err(|e| in_policy(&format!("policy '{}'", name), e))?;
        }

        Ok(())
    }
}

fn in_policy(context: &str, err: TollgateError) -> TollgateError {
    match err {
        TollgateError::Config(msg) => TollgateError::Config(format!("{}: {}", context, msg)),
        other => other,
    }
}
