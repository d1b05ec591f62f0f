//! Policy evaluation boundary.
//!
//! - [`PolicyEvaluator`]: capability the [`Authorizer`](crate::Authorizer) calls
//! - [`RulePolicy`]: declarative rule document evaluator
//! - [`ReloadablePolicy`]: hot-swappable wrapper with per-call snapshots

use std::path::PathBuf;

use async_trait::async_trait;

use crate::input::AuthInput;

pub mod reload;
pub mod rules;

pub use reload::ReloadablePolicy;
pub use rules::{Effect, PolicyDocument, Rule, RulePolicy};

/// Outcome of evaluating one input against the held policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyDecision {
    /// Whether access is granted.
    pub allowed: bool,
    /// Evaluator explanation. Logged, never returned to callers.
    pub diagnostic: Option<String>,
}

impl PolicyDecision {
    #[must_use]
    pub fn allow() -> Self {
        Self {
            allowed: true,
            diagnostic: None,
        }
    }

    #[must_use]
    pub fn deny() -> Self {
        Self {
            allowed: false,
            diagnostic: None,
        }
    }

    #[must_use]
    pub fn with_diagnostic(mut self, diagnostic: impl Into<String>) -> Self {
        self.diagnostic = Some(diagnostic.into());
        self
    }
}

/// Errors raised while building or evaluating a policy.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    /// The policy document is malformed.
    #[error("invalid policy document: {0}")]
    InvalidDocument(String),

    /// The policy document could not be read.
    #[error("failed to read policy from {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Evaluation itself failed (e.g. remote policy data unavailable).
    #[error("{0}")]
    Evaluation(String),
}

/// Capability wrapping the policy engine.
///
/// Implementations must be safe under unbounded concurrent invocation and
/// deterministic for a fixed policy snapshot and input.
#[async_trait]
pub trait PolicyEvaluator: Send + Sync {
    /// Decide whether `input` is permitted.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError`] if the policy could not be evaluated. This is
    /// distinct from a deny, which is `Ok` with `allowed == false`.
    async fn eval(&self, input: &AuthInput) -> Result<PolicyDecision, PolicyError>;
}
