//! Pre-evaluation hooks.
//!
//! Hooks run in registration order on every evaluation, before the policy
//! sees the input. Each hook may enrich the [`AuthInput`] or reject the call
//! outright; the first failure stops the chain.

use std::net::SocketAddr;

use async_trait::async_trait;
use tonic::Status;

use crate::context::CallContext;
use crate::input::{AuthInput, HostAuthInput, NetAuthInput};

/// Failure returned by an [`AuthzHook`].
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    /// An already-classified RPC status. Returned to the caller unchanged,
    /// which lets a hook deny with its own reason.
    #[error(transparent)]
    Status(#[from] Status),

    /// Any other failure. Surfaces as `Internal`.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HookError {
    /// Unclassified failure with the given message.
    #[must_use]
    pub fn other(msg: impl std::fmt::Display) -> Self {
        Self::Other(anyhow::anyhow!("{msg}"))
    }

    pub(crate) fn into_status(self) -> Status {
        match self {
            Self::Status(status) => status,
            Self::Other(e) => Status::internal(format!("authz hook error: {e:#}")),
        }
    }
}

/// Extension invoked on populated input prior to policy evaluation.
///
/// May mutate the input in place or pre-emptively reject the request.
#[async_trait]
pub trait AuthzHook: Send + Sync {
    /// Run the hook.
    ///
    /// # Errors
    ///
    /// - [`HookError::Status`] to reject with a specific classification
    /// - [`HookError::Other`] for unexpected failures (reported as `Internal`)
    async fn hook(&self, ctx: &CallContext, input: &mut AuthInput) -> Result<(), HookError>;
}

/// Hook backed by a synchronous closure.
///
/// ```ignore
/// let hook = HookFn::new(|_ctx, input| {
///     input.extensions.insert("region".to_owned(), "eu-1".into());
///     Ok(())
/// });
/// ```
pub struct HookFn<F> {
    f: F,
}

impl<F> HookFn<F>
where
    F: Fn(&CallContext, &mut AuthInput) -> Result<(), HookError> + Send + Sync,
{
    #[must_use]
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> AuthzHook for HookFn<F>
where
    F: Fn(&CallContext, &mut AuthInput) -> Result<(), HookError> + Send + Sync,
{
    async fn hook(&self, ctx: &CallContext, input: &mut AuthInput) -> Result<(), HookError> {
        (self.f)(ctx, input)
    }
}

/// Runs the wrapped hook only when `condition` holds for the input.
pub struct HookIf<H, P> {
    hook: H,
    condition: P,
}

impl<H, P> HookIf<H, P>
where
    H: AuthzHook,
    P: Fn(&AuthInput) -> bool + Send + Sync,
{
    #[must_use]
    pub fn new(hook: H, condition: P) -> Self {
        Self { hook, condition }
    }
}

#[async_trait]
impl<H, P> AuthzHook for HookIf<H, P>
where
    H: AuthzHook,
    P: Fn(&AuthInput) -> bool + Send + Sync,
{
    async fn hook(&self, ctx: &CallContext, input: &mut AuthInput) -> Result<(), HookError> {
        if (self.condition)(input) {
            self.hook.hook(ctx, input).await
        } else {
            Ok(())
        }
    }
}

/// Records the serving host's listen address in `input.host.net`.
#[derive(Debug, Clone)]
pub struct HostNetHook {
    net: NetAuthInput,
}

impl HostNetHook {
    #[must_use]
    pub fn new(addr: SocketAddr) -> Self {
        Self { net: addr.into() }
    }
}

#[async_trait]
impl AuthzHook for HostNetHook {
    async fn hook(&self, _ctx: &CallContext, input: &mut AuthInput) -> Result<(), HookError> {
        input
            .host
            .get_or_insert_with(HostAuthInput::default)
            .net = Some(self.net.clone());
        Ok(())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn classified_error_is_kept() {
        let status = HookError::from(Status::permission_denied("not on call")).into_status();
        assert_eq!(status.code(), tonic::Code::PermissionDenied);
        assert_eq!(status.message(), "not on call");
    }

    #[test]
    fn unclassified_error_becomes_internal() {
        let status = HookError::other("ldap unreachable").into_status();
        assert_eq!(status.code(), tonic::Code::Internal);
        assert_eq!(status.message(), "authz hook error: ldap unreachable");
    }

    #[tokio::test]
    async fn host_net_hook_fills_host() {
        let hook = HostNetHook::new("10.0.0.7:50042".parse().unwrap());
        let mut input = AuthInput::default();

        hook.hook(&CallContext::default(), &mut input).await.unwrap();

        let net = input.host.and_then(|h| h.net).unwrap();
        assert_eq!(net.address, "10.0.0.7");
        assert_eq!(net.port, 50042);
    }

    #[tokio::test]
    async fn hook_if_skips_when_condition_is_false() {
        let hook = HookIf::new(
            HookFn::new(|_ctx: &CallContext, _input: &mut AuthInput| {
                Err(HookError::other("should not run"))
            }),
            |input: &AuthInput| input.method.starts_with("/Exec."),
        );
        let mut input = AuthInput {
            method: "/Logging.Logging/GetVerbosity".to_owned(),
            ..AuthInput::default()
        };

        assert!(hook.hook(&CallContext::default(), &mut input).await.is_ok());

        input.method = "/Exec.Exec/Run".to_owned();
        assert!(hook.hook(&CallContext::default(), &mut input).await.is_err());
    }
}
