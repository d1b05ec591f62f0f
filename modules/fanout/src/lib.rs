#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Authorized one-to-many dispatch
//!
//! - [`Dispatcher`] - sends one request to N targets concurrently, each call
//!   gated by an [`rpc_authz::Authorizer`], and returns results ordered by
//!   target index
//! - [`render`] - per-target output/error rendering and the `exec`,
//!   logging-verbosity and proxy logging-verbosity command helpers
//! - [`services`] - request/reply messages and method names

pub mod dispatcher;
pub mod render;
pub mod services;

pub use dispatcher::{Dispatcher, TARGET_METADATA_KEY, Target, TargetResponse};
pub use render::{
    ExitStatus, OutputState, VERBOSITY_TIMEOUT, VerbosityAction, get_proxy_verbosity,
    get_verbosity, render_exec, render_proxy_verbosity, render_verbosity, run_exec,
    set_proxy_verbosity, set_verbosity,
};
