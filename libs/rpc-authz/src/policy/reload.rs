//! Hot-reloadable policy handle.

use std::path::Path;
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use tracing::{info, warn};

use super::{PolicyDecision, PolicyError, PolicyEvaluator, RulePolicy};
use crate::input::AuthInput;

/// Evaluator whose underlying policy can be swapped at runtime.
///
/// Every `eval` works on one snapshot loaded up front, so a concurrent
/// [`replace`](Self::replace) is observed either fully or not at all.
pub struct ReloadablePolicy {
    current: ArcSwap<Arc<dyn PolicyEvaluator>>,
}

impl ReloadablePolicy {
    #[must_use]
    pub fn new(policy: Arc<dyn PolicyEvaluator>) -> Self {
        Self {
            current: ArcSwap::from_pointee(policy),
        }
    }

    /// Swap in a new policy. In-flight evaluations finish on the old one.
    pub fn replace(&self, policy: Arc<dyn PolicyEvaluator>) {
        self.current.store(Arc::new(policy));
    }

    /// Current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<dyn PolicyEvaluator> {
        let guard = self.current.load();
        Arc::clone(&**guard)
    }

    /// Re-read a rule document and swap it in. On failure the previous
    /// policy stays active.
    ///
    /// # Errors
    ///
    /// Returns the [`PolicyError`] from reading or parsing `path`.
    pub fn reload_from_path(&self, path: &Path) -> Result<(), PolicyError> {
        match RulePolicy::from_path(path) {
            Ok(policy) => {
                self.replace(Arc::new(policy));
                info!(path = %path.display(), "authz policy reloaded");
                Ok(())
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "authz policy reload failed; keeping previous policy");
                Err(e)
            }
        }
    }
}

#[async_trait]
impl PolicyEvaluator for ReloadablePolicy {
    async fn eval(&self, input: &AuthInput) -> Result<PolicyDecision, PolicyError> {
        let snapshot = self.snapshot();
        snapshot.eval(input).await
    }
}

impl std::fmt::Debug for ReloadablePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReloadablePolicy").finish_non_exhaustive()
    }
}
