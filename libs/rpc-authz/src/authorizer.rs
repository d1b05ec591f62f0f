//! Hook execution followed by policy evaluation.
//!
//! [`Authorizer`] is constructed once per policy and shared by every call;
//! its policy handle and hook list never change after construction.

use std::sync::Arc;

use tonic::Status;
use tracing::{Level, debug, trace};

use crate::context::CallContext;
use crate::hook::AuthzHook;
use crate::input::{AuthInput, AuthMessage};
use crate::policy::{PolicyError, PolicyEvaluator, RulePolicy};

/// Authorizes RPC calls against a policy.
///
/// Usable directly through [`eval`](Self::eval), or through the unary and
/// streaming bindings in [`crate::interceptor`]. Cheap to clone (`Arc`
/// inside).
///
/// The same policy is applied on client and server side; create two
/// authorizers when the two sides need distinct policies.
#[derive(Clone)]
pub struct Authorizer {
    policy: Arc<dyn PolicyEvaluator>,
    hooks: Arc<[Arc<dyn AuthzHook>]>,
}

impl Authorizer {
    /// Create an authorizer. `hooks` run in the given order on every
    /// evaluation.
    #[must_use]
    pub fn new(policy: Arc<dyn PolicyEvaluator>, hooks: Vec<Arc<dyn AuthzHook>>) -> Self {
        Self {
            policy,
            hooks: hooks.into(),
        }
    }

    /// Create an authorizer from a YAML rule document.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::InvalidDocument`] if the document is malformed.
    pub fn with_policy_document(
        document: &str,
        hooks: Vec<Arc<dyn AuthzHook>>,
    ) -> Result<Self, PolicyError> {
        let policy = RulePolicy::from_yaml(document)?;
        Ok(Self::new(Arc::new(policy), hooks))
    }

    /// Number of registered hooks.
    #[must_use]
    pub fn hook_count(&self) -> usize {
        self.hooks.len()
    }

    /// Evaluate `input` against the policy.
    ///
    /// Hooks run first and may mutate `input` regardless of the final
    /// outcome. The whole evaluation races the call's cancellation and
    /// deadline.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if `input` is `None`
    /// - the hook's own status if a hook rejects with a classified error
    /// - `Internal` for unclassified hook errors and evaluator failures
    /// - `PermissionDenied` if the policy does not permit the request
    /// - `Cancelled` / `DeadlineExceeded` if the call ends mid-evaluation
    #[tracing::instrument(skip_all, fields(method = tracing::field::Empty))]
    pub async fn eval(&self, ctx: &CallContext, input: Option<&mut AuthInput>) -> Result<(), Status> {
        let Some(input) = input else {
            return Err(Status::invalid_argument("policy input cannot be empty"));
        };
        tracing::Span::current().record("method", input.method.as_str());

        ctx.run(self.eval_input(ctx, input)).await
    }

    async fn eval_input(&self, ctx: &CallContext, input: &mut AuthInput) -> Result<(), Status> {
        if tracing::enabled!(Level::TRACE) {
            match input.to_json() {
                Ok(json) => trace!(input = %json, "evaluating authz policy"),
                Err(e) => trace!(error = %e, "can't marshal authz input"),
            }
        }

        for hook in &*self.hooks {
            if let Err(e) = hook.hook(ctx, input).await {
                let status = e.into_status();
                debug!(code = ?status.code(), reason = status.message(), "authz hook rejected request");
                return Err(status);
            }
        }

        if tracing::enabled!(Level::DEBUG) {
            match input.to_json() {
                Ok(json) => debug!(input = %json, "evaluating authz policy post hooks"),
                Err(e) => debug!(error = %e, "can't marshal authz input"),
            }
        }

        let decision = self
            .policy
            .eval(input)
            .await
            .map_err(|e| Status::internal(format!("authz policy evaluation error: {e}")))?;

        if !decision.allowed {
            debug!(
                diagnostic = decision.diagnostic.as_deref().unwrap_or_default(),
                "permission denied"
            );
            return Err(Status::permission_denied(
                "policy does not permit this request",
            ));
        }
        Ok(())
    }

    /// Build the input for `message` and evaluate it.
    pub(crate) async fn authorize_message<M>(
        &self,
        ctx: &CallContext,
        method: &str,
        message: &M,
    ) -> Result<(), Status>
    where
        M: AuthMessage + ?Sized,
    {
        let mut input = AuthInput::new(ctx, method, message)?;
        self.eval(ctx, Some(&mut input)).await
    }
}

impl std::fmt::Debug for Authorizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authorizer")
            .field("hooks", &self.hooks.len())
            .finish_non_exhaustive()
    }
}
