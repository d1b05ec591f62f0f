#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! RPC authorization
//!
//! Gates every unary call and every streamed message against a policy:
//!
//! - [`AuthInput`] - structured document describing one call or message
//! - [`AuthzHook`] - ordered pre-evaluation extensions that may mutate or reject
//! - [`PolicyEvaluator`] - allow/deny capability ([`RulePolicy`], [`ReloadablePolicy`])
//! - [`Authorizer`] - runs the hooks, then the policy; exposes [`Authorizer::eval`]
//! - [`interceptor`] - unary server/client and streaming send/receive bindings
//! - [`RpcAuthConfig`] - figment-backed configuration
//!
//! ## Usage
//!
//! ```ignore
//! use rpc_authz::{Authorizer, HookFn, RpcAuthConfig};
//!
//! let cfg = RpcAuthConfig::load(Some(Path::new("/etc/fleet/authz.yaml")))?;
//! let authz = Authorizer::from_config(&cfg, vec![Arc::new(HookFn::new(tag_region))])?;
//!
//! // Unary server handler
//! authz
//!     .authorize_unary("/Exec.Exec/Run", request, |req| async move { run(req).await })
//!     .await?;
//!
//! // Client stream: every send is authorized
//! let (sink, body) = rpc_authz::interceptor::channel(16);
//! let mut sink = authz.authorize_client_stream(ctx, "/Exec.Exec/StreamingRun", sink);
//! sink.send(chunk).await?;
//! ```

pub mod authorizer;
pub mod config;
pub mod context;
pub mod hook;
pub mod input;
pub mod interceptor;
pub mod policy;

pub use authorizer::Authorizer;
pub use config::{ConfigError, RpcAuthConfig};
pub use context::{CallContext, CallContextBuilder};
pub use hook::{AuthzHook, HookError, HookFn, HookIf, HostNetHook};
pub use input::{
    AuthInput, AuthInputError, AuthMessage, CertAuthInput, HostAuthInput, NetAuthInput,
    PeerAuthInput, PrincipalAuthInput,
};
pub use interceptor::{
    AuthorizeLayer, AuthorizedSink, AuthorizedStream, MessageSink, Side, StreamState,
};
pub use policy::{
    Effect, PolicyDecision, PolicyDocument, PolicyError, PolicyEvaluator, ReloadablePolicy, Rule,
    RulePolicy,
};
