//! Authorizer configuration.
//!
//! Layered with figment: built-in defaults, then an optional YAML file, then
//! `FLEET_AUTHZ_*` environment variables.
//!
//! ```yaml
//! policy_path: /etc/fleet/policy.yaml
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use serde::{Deserialize, Serialize};

use crate::authorizer::Authorizer;
use crate::hook::AuthzHook;
use crate::policy::{PolicyError, RulePolicy};

pub const ENV_PREFIX: &str = "FLEET_AUTHZ_";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct RpcAuthConfig {
    /// Path to a rule document on disk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_path: Option<PathBuf>,
    /// Inline rule document. Mutually exclusive with `policy_path`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load authz config: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("no authz policy configured; set `policy` or `policy_path`")]
    MissingPolicy,

    #[error("both `policy` and `policy_path` are set")]
    AmbiguousPolicy,

    #[error(transparent)]
    Policy(#[from] PolicyError),
}

impl RpcAuthConfig {
    /// Load configuration from `path` (if given) and the environment. A named
    /// file must exist.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] when `path` is missing or a source fails
    /// to parse.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file_exact(path));
        }
        figment
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()
            .map_err(|e| ConfigError::Load(Box::new(e)))
    }

    /// Parse the configured policy document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingPolicy`] or [`ConfigError::AmbiguousPolicy`]
    /// for a bad source selection, or [`ConfigError::Policy`] when the
    /// document cannot be read or parsed.
    pub fn load_policy(&self) -> Result<RulePolicy, ConfigError> {
        match (&self.policy, &self.policy_path) {
            (Some(_), Some(_)) => Err(ConfigError::AmbiguousPolicy),
            (None, None) => Err(ConfigError::MissingPolicy),
            (Some(text), None) => Ok(RulePolicy::from_yaml(text)?),
            (None, Some(path)) => Ok(RulePolicy::from_path(path)?),
        }
    }
}

impl Authorizer {
    /// Build an authorizer from configuration and an ordered hook list.
    ///
    /// # Errors
    ///
    /// See [`RpcAuthConfig::load_policy`].
    pub fn from_config(
        config: &RpcAuthConfig,
        hooks: Vec<Arc<dyn AuthzHook>>,
    ) -> Result<Self, ConfigError> {
        let policy = config.load_policy()?;
        Ok(Self::new(Arc::new(policy), hooks))
    }
}
