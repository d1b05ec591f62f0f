//! One logical call, N targets.

use std::future::Future;
use std::time::Duration;

use futures::future::join_all;
use rpc_authz::{AuthMessage, Authorizer};
use tonic::metadata::MetadataValue;
use tonic::{Request, Response, Status};
use tracing::{debug, field};

/// Metadata key carrying the target name on every per-target request.
pub const TARGET_METADATA_KEY: &str = "x-fleet-target";

/// A named connection to one target.
#[derive(Debug, Clone)]
pub struct Target<C> {
    pub name: String,
    pub conn: C,
}

/// Outcome of one target's call.
#[derive(Debug)]
pub struct TargetResponse<R> {
    pub target: String,
    pub index: usize,
    pub result: Result<R, Status>,
}

/// Sends one request to every target concurrently, each call gated by the
/// same [`Authorizer`] on the client side.
///
/// `C` is whatever handle performs a call against one target, typically a
/// generated tonic client over a `Channel`.
#[derive(Debug, Clone)]
pub struct Dispatcher<C> {
    authz: Authorizer,
    targets: Vec<Target<C>>,
}

impl<C: Clone> Dispatcher<C> {
    #[must_use]
    pub fn new(authz: Authorizer, targets: Vec<Target<C>>) -> Self {
        Self { authz, targets }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn target_names(&self) -> impl Iterator<Item = &str> {
        self.targets.iter().map(|t| t.name.as_str())
    }

    /// Call `method` on every target and collect the per-target results,
    /// ordered by target index.
    ///
    /// `call` performs the transport call for one target, e.g.
    /// `|mut client, req| async move { client.run(req).await }`. It is never
    /// invoked for a target whose request fails authorization.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` when the dispatcher has no targets. Failures
    /// of individual targets are reported in their [`TargetResponse`].
    #[tracing::instrument(skip_all, fields(method = method, targets = self.targets.len(), failed = field::Empty))]
    pub async fn one_many<Req, Resp, F, Fut>(
        &self,
        method: &str,
        request: &Req,
        call: F,
    ) -> Result<Vec<TargetResponse<Resp>>, Status>
    where
        Req: AuthMessage + Clone,
        F: Fn(C, Request<Req>) -> Fut,
        Fut: Future<Output = Result<Response<Resp>, Status>>,
    {
        self.dispatch(method, request, None, &call).await
    }

    /// Like [`one_many`](Self::one_many) with a deadline. Each per-target
    /// request carries the timeout so authorization observes it too. A target
    /// that has not answered when it passes gets `DeadlineExceeded` in its own
    /// [`TargetResponse`]; the others keep their results.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` when there are no targets.
    #[tracing::instrument(skip_all, fields(method = method, targets = self.targets.len(), failed = field::Empty))]
    pub async fn one_many_within<Req, Resp, F, Fut>(
        &self,
        timeout: Duration,
        method: &str,
        request: &Req,
        call: F,
    ) -> Result<Vec<TargetResponse<Resp>>, Status>
    where
        Req: AuthMessage + Clone,
        F: Fn(C, Request<Req>) -> Fut,
        Fut: Future<Output = Result<Response<Resp>, Status>>,
    {
        self.dispatch(method, request, Some(timeout), &call).await
    }

    /// Make one authorized call to `conn`, outside the target list. Used for
    /// requests addressed to the proxy itself rather than to the hosts behind
    /// it.
    ///
    /// # Errors
    ///
    /// The authorization failure, `DeadlineExceeded` once `timeout` passes, or
    /// whatever `call` returns.
    #[tracing::instrument(skip_all, fields(method = method))]
    pub async fn one_within<P, Req, Resp, F, Fut>(
        &self,
        conn: P,
        timeout: Duration,
        method: &str,
        request: &Req,
        call: F,
    ) -> Result<Resp, Status>
    where
        Req: AuthMessage + Clone,
        F: FnOnce(P, Request<Req>) -> Fut,
        Fut: Future<Output = Result<Response<Resp>, Status>>,
    {
        let mut req = Request::new(request.clone());
        req.set_timeout(timeout);
        self.authorized_call(method, req, Some(timeout), |req| call(conn, req))
            .await
            .inspect_err(|status| debug!(code = ?status.code(), "single call failed"))
    }

    async fn dispatch<Req, Resp, F, Fut>(
        &self,
        method: &str,
        request: &Req,
        timeout: Option<Duration>,
        call: &F,
    ) -> Result<Vec<TargetResponse<Resp>>, Status>
    where
        Req: AuthMessage + Clone,
        F: Fn(C, Request<Req>) -> Fut,
        Fut: Future<Output = Result<Response<Resp>, Status>>,
    {
        if self.targets.is_empty() {
            return Err(Status::invalid_argument("no targets to dispatch to"));
        }

        let calls = self.targets.iter().enumerate().map(|(index, target)| {
            let mut req = Request::new(request.clone());
            if let Ok(name) = MetadataValue::try_from(target.name.as_str()) {
                req.metadata_mut().insert(TARGET_METADATA_KEY, name);
            }
            if let Some(timeout) = timeout {
                req.set_timeout(timeout);
            }
            let conn = target.conn.clone();

            async move {
                let result = self
                    .authorized_call(method, req, timeout, |req| call(conn, req))
                    .await;
                if let Err(status) = &result {
                    debug!(host = %target.name, index, code = ?status.code(), "target call failed");
                }
                TargetResponse {
                    target: target.name.clone(),
                    index,
                    result,
                }
            }
        });

        let responses = join_all(calls).await;
        let failed = responses.iter().filter(|r| r.result.is_err()).count();
        tracing::Span::current().record("failed", failed);
        Ok(responses)
    }

    async fn authorized_call<Req, Resp, F, Fut>(
        &self,
        method: &str,
        req: Request<Req>,
        timeout: Option<Duration>,
        call: F,
    ) -> Result<Resp, Status>
    where
        Req: AuthMessage,
        F: FnOnce(Request<Req>) -> Fut,
        Fut: Future<Output = Result<Response<Resp>, Status>>,
    {
        let authorized = self.authz.authorize_client(method, req, call);
        let response = match timeout {
            Some(timeout) => tokio::time::timeout(timeout, authorized)
                .await
                .map_err(|_| {
                    Status::deadline_exceeded(format!(
                        "{method} did not complete within {}ms",
                        timeout.as_millis()
                    ))
                })?,
            None => authorized.await,
        };
        response.map(Response::into_inner)
    }
}
