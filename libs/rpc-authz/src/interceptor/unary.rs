//! Unary bindings: authorize the single request, then hand it on.

use std::future::Future;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use tonic::{Request, Response, Status};
use tower::{Layer, Service};
use tracing::debug;

use super::Side;
use crate::authorizer::Authorizer;
use crate::context::CallContext;
use crate::input::AuthMessage;

impl Authorizer {
    /// Server side: authorize `request` received on `method`, then run
    /// `handler`. The handler is never invoked when authorization fails.
    ///
    /// # Errors
    ///
    /// The authorization status on failure, otherwise the handler's result.
    pub async fn authorize_unary<M, R, H, Fut>(
        &self,
        method: &str,
        request: Request<M>,
        handler: H,
    ) -> Result<Response<R>, Status>
    where
        M: AuthMessage,
        H: FnOnce(Request<M>) -> Fut,
        Fut: Future<Output = Result<Response<R>, Status>>,
    {
        self.authorize_request(Side::Server, method, &request).await?;
        handler(request).await
    }

    /// Client side: authorize the outgoing `request` for `method`, then pass
    /// it to `invoker`. Nothing is sent when authorization fails.
    ///
    /// # Errors
    ///
    /// The authorization status on failure, otherwise the invoker's result.
    pub async fn authorize_client<M, R, I, Fut>(
        &self,
        method: &str,
        request: Request<M>,
        invoker: I,
    ) -> Result<Response<R>, Status>
    where
        M: AuthMessage,
        I: FnOnce(Request<M>) -> Fut,
        Fut: Future<Output = Result<Response<R>, Status>>,
    {
        self.authorize_request(Side::Client, method, &request).await?;
        invoker(request).await
    }

    async fn authorize_request<M: AuthMessage>(
        &self,
        side: Side,
        method: &str,
        request: &Request<M>,
    ) -> Result<(), Status> {
        let ctx = CallContext::from_request(request);
        self.authorize_message(&ctx, method, request.get_ref())
            .await
            .inspect_err(|status| {
                debug!(side = side.as_str(), method, code = ?status.code(), "unary call rejected");
            })
    }
}

/// [`Layer`] producing [`Authorize`] services for one method.
///
/// ```ignore
/// let svc = ServiceBuilder::new()
///     .layer(AuthorizeLayer::server(authz.clone(), "/Exec.Exec/Run"))
///     .service(run_handler);
/// ```
#[derive(Debug, Clone)]
pub struct AuthorizeLayer {
    authz: Authorizer,
    method: Arc<str>,
    side: Side,
}

impl AuthorizeLayer {
    /// Authorize requests before they reach the wrapped handler.
    #[must_use]
    pub fn server(authz: Authorizer, method: impl Into<Arc<str>>) -> Self {
        Self {
            authz,
            method: method.into(),
            side: Side::Server,
        }
    }

    /// Authorize requests before they reach the wrapped transport invoker.
    #[must_use]
    pub fn client(authz: Authorizer, method: impl Into<Arc<str>>) -> Self {
        Self {
            authz,
            method: method.into(),
            side: Side::Client,
        }
    }
}

impl<S> Layer<S> for AuthorizeLayer {
    type Service = Authorize<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Authorize {
            inner,
            authz: self.authz.clone(),
            method: Arc::clone(&self.method),
            side: self.side,
        }
    }
}

/// Unary service that authorizes each request before calling `inner`.
#[derive(Debug, Clone)]
pub struct Authorize<S> {
    inner: S,
    authz: Authorizer,
    method: Arc<str>,
    side: Side,
}

impl<S> Authorize<S> {
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    #[must_use]
    pub fn side(&self) -> Side {
        self.side
    }
}

impl<S, M, R> Service<Request<M>> for Authorize<S>
where
    S: Service<Request<M>, Response = Response<R>, Error = Status> + Clone + Send + 'static,
    S::Future: Send + 'static,
    M: AuthMessage + Send + Sync + 'static,
    R: Send + 'static,
{
    type Response = Response<R>;
    type Error = Status;
    type Future = BoxFuture<'static, Result<Response<R>, Status>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<M>) -> Self::Future {
        // The clone may not be ready; keep the one that was polled.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let authz = self.authz.clone();
        let method = Arc::clone(&self.method);
        let side = self.side;

        Box::pin(async move {
            authz.authorize_request(side, &method, &request).await?;
            inner.call(request).await
        })
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde::Serialize;
    use tonic::Code;
    use tower::ServiceExt;

    use super::*;

    const POLICY: &str = r#"
rules:
  - effect: allow
    methods: ["/Exec.Exec/Run"]
    message: { command: /bin/true }
"#;

    #[derive(Debug, Clone, Serialize)]
    struct RunRequest {
        command: String,
    }

    fn run(command: &str) -> Request<RunRequest> {
        Request::new(RunRequest {
            command: command.to_owned(),
        })
    }

    fn authz() -> Authorizer {
        Authorizer::with_policy_document(POLICY, vec![]).unwrap()
    }

    #[tokio::test]
    async fn server_handler_runs_only_when_allowed() {
        let calls = AtomicUsize::new(0);
        let handler = |req: Request<RunRequest>| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok::<_, Status>(Response::new(req.into_inner().command)) }
        };

        let ok = authz()
            .authorize_unary("/Exec.Exec/Run", run("/bin/true"), handler)
            .await
            .unwrap();
        assert_eq!(ok.into_inner(), "/bin/true");

        let denied = authz()
            .authorize_unary("/Exec.Exec/Run", run("/bin/rm"), handler)
            .await
            .unwrap_err();
        assert_eq!(denied.code(), Code::PermissionDenied);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn client_invoker_not_called_when_denied() {
        let sent = AtomicUsize::new(0);
        let invoker = |_req: Request<RunRequest>| {
            sent.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, Status>(Response::new(())) }
        };

        let status = authz()
            .authorize_client("/Exec.Exec/Kill", run("/bin/true"), invoker)
            .await
            .unwrap_err();

        assert_eq!(status.code(), Code::PermissionDenied);
        assert_eq!(sent.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn layer_wraps_tower_service() {
        let echo = tower::service_fn(|req: Request<RunRequest>| async move {
            Ok::<_, Status>(Response::new(req.into_inner().command))
        });
        let svc = AuthorizeLayer::server(authz(), "/Exec.Exec/Run").layer(echo);
        assert_eq!(svc.method(), "/Exec.Exec/Run");
        assert_eq!(svc.side(), Side::Server);

        let ok = svc.clone().oneshot(run("/bin/true")).await.unwrap();
        assert_eq!(ok.into_inner(), "/bin/true");

        let denied = svc.oneshot(run("/bin/sh")).await.unwrap_err();
        assert_eq!(denied.code(), Code::PermissionDenied);
    }
}
