//! Streaming bindings.
//!
//! Both wrappers authorize one message at a time, in stream order. A message
//! that fails authorization fails only its own `send` or receive; the stream
//! stays open. An error from the underlying transport faults the wrapper and
//! every later operation reports that same error.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Code, Request, Status};
use tracing::debug;

use crate::authorizer::Authorizer;
use crate::context::CallContext;
use crate::input::AuthMessage;

/// Lifecycle of one wrapped stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Open,
    Closed,
    Faulted,
}

/// First transport error seen by a wrapper, replayed by every later
/// operation.
fn replay(fault: Option<&(Code, String)>) -> Status {
    match fault {
        Some((code, message)) => Status::new(*code, message.clone()),
        None => Status::internal("stream faulted"),
    }
}

/// Outbound half of a client stream.
#[async_trait]
pub trait MessageSink: Send {
    type Message: Send + 'static;

    /// Transmit one message.
    async fn send(&mut self, message: Self::Message) -> Result<(), Status>;

    /// Signal that no more messages follow.
    async fn close_send(&mut self) -> Result<(), Status>;
}

/// [`MessageSink`] over a bounded channel. The paired [`ReceiverStream`] is
/// what a generated tonic client takes as its streaming request body.
pub struct ChannelSink<T> {
    tx: Option<mpsc::Sender<T>>,
}

/// Create a sink and the request stream it feeds.
#[must_use]
pub fn channel<T>(buffer: usize) -> (ChannelSink<T>, ReceiverStream<T>) {
    let (tx, rx) = mpsc::channel(buffer);
    (ChannelSink { tx: Some(tx) }, ReceiverStream::new(rx))
}

#[async_trait]
impl<T: Send + 'static> MessageSink for ChannelSink<T> {
    type Message = T;

    async fn send(&mut self, message: T) -> Result<(), Status> {
        let Some(tx) = &self.tx else {
            return Err(Status::failed_precondition("send on a closed stream"));
        };
        tx.send(message)
            .await
            .map_err(|_| Status::unavailable("stream receiver dropped"))
    }

    async fn close_send(&mut self) -> Result<(), Status> {
        self.tx = None;
        Ok(())
    }
}

impl<T> fmt::Debug for ChannelSink<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelSink")
            .field("closed", &self.tx.is_none())
            .finish()
    }
}

/// Client-side stream wrapper: authorizes every message before it is handed
/// to the inner sink.
pub struct AuthorizedSink<S> {
    inner: S,
    authz: Authorizer,
    method: Arc<str>,
    ctx: CallContext,
    state: StreamState,
    fault: Option<(Code, String)>,
}

impl<S> AuthorizedSink<S> {
    #[must_use]
    pub fn state(&self) -> StreamState {
        self.state
    }

    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    #[must_use]
    pub fn context(&self) -> &CallContext {
        &self.ctx
    }

    #[must_use]
    pub fn into_inner(self) -> S {
        self.inner
    }

}

#[async_trait]
impl<S> MessageSink for AuthorizedSink<S>
where
    S: MessageSink,
    S::Message: AuthMessage + Sync,
{
    type Message = S::Message;

    async fn send(&mut self, message: S::Message) -> Result<(), Status> {
        match self.state {
            StreamState::Open => {}
            StreamState::Closed => {
                return Err(Status::failed_precondition("send after close_send"));
            }
            StreamState::Faulted => return Err(replay(self.fault.as_ref())),
        }

        if let Err(status) = self
            .authz
            .authorize_message(&self.ctx, &self.method, &message)
            .await
        {
            debug!(method = %self.method, code = ?status.code(), "stream send rejected");
            return Err(status);
        }

        if let Err(status) = self.inner.send(message).await {
            self.fault = Some((status.code(), status.message().to_owned()));
            self.state = StreamState::Faulted;
            return Err(status);
        }
        Ok(())
    }

    async fn close_send(&mut self) -> Result<(), Status> {
        match self.state {
            StreamState::Closed => Ok(()),
            StreamState::Faulted => Err(replay(self.fault.as_ref())),
            StreamState::Open => {
                self.state = StreamState::Closed;
                self.inner.close_send().await
            }
        }
    }
}

impl<S> fmt::Debug for AuthorizedSink<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizedSink")
            .field("method", &self.method)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Server-side stream wrapper: every message pulled from the inner stream is
/// authorized before it is yielded.
pub struct AuthorizedStream<S, T> {
    inner: S,
    authz: Authorizer,
    method: Arc<str>,
    ctx: CallContext,
    state: StreamState,
    fault: Option<(Code, String)>,
    pending: Option<BoxFuture<'static, Result<T, Status>>>,
}

impl<S, T> AuthorizedStream<S, T> {
    #[must_use]
    pub fn state(&self) -> StreamState {
        self.state
    }

    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }
}

impl<S, T> AuthorizedStream<S, T>
where
    S: Stream<Item = Result<T, Status>> + Unpin,
    T: AuthMessage + Send + Sync + 'static,
{
    /// Receive the next authorized message, `Ok(None)` once the peer has
    /// finished sending.
    ///
    /// # Errors
    ///
    /// The authorization failure for this message, or the transport error.
    /// Once the transport has failed every call returns that error again.
    pub async fn message(&mut self) -> Result<Option<T>, Status> {
        self.next().await.transpose()
    }
}

impl<S, T> Stream for AuthorizedStream<S, T>
where
    S: Stream<Item = Result<T, Status>> + Unpin,
    T: AuthMessage + Send + Sync + 'static,
{
    type Item = Result<T, Status>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if let Some(pending) = this.pending.as_mut() {
                let result = ready!(pending.as_mut().poll(cx));
                this.pending = None;
                if let Err(status) = &result {
                    debug!(method = %this.method, code = ?status.code(), "stream message rejected");
                }
                return Poll::Ready(Some(result));
            }

            match this.state {
                StreamState::Open => {}
                StreamState::Closed => return Poll::Ready(None),
                StreamState::Faulted => {
                    return Poll::Ready(Some(Err(replay(this.fault.as_ref()))));
                }
            }

            match ready!(Pin::new(&mut this.inner).poll_next(cx)) {
                None => {
                    this.state = StreamState::Closed;
                    return Poll::Ready(None);
                }
                Some(Err(status)) => {
                    debug!(method = %this.method, code = ?status.code(), "stream transport failed");
                    this.fault = Some((status.code(), status.message().to_owned()));
                    this.state = StreamState::Faulted;
                    return Poll::Ready(Some(Err(status)));
                }
                Some(Ok(message)) => {
                    let authz = this.authz.clone();
                    let ctx = this.ctx.clone();
                    let method = Arc::clone(&this.method);
                    this.pending = Some(Box::pin(async move {
                        authz.authorize_message(&ctx, &method, &message).await?;
                        Ok(message)
                    }));
                }
            }
        }
    }
}

impl<S, T> fmt::Debug for AuthorizedStream<S, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizedStream")
            .field("method", &self.method)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Authorizer {
    /// Wrap the outbound half of an already-open client stream.
    #[must_use]
    pub fn authorize_client_stream<S: MessageSink>(
        &self,
        ctx: CallContext,
        method: impl Into<Arc<str>>,
        sink: S,
    ) -> AuthorizedSink<S> {
        AuthorizedSink {
            inner: sink,
            authz: self.clone(),
            method: method.into(),
            ctx,
            state: StreamState::Open,
            fault: None,
        }
    }

    /// Open a client stream with `open` and wrap it. Opening is not itself
    /// authorized; each message is.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if `open` fails.
    pub async fn open_client_stream<S, E, Fut>(
        &self,
        ctx: CallContext,
        method: impl Into<Arc<str>>,
        open: Fut,
    ) -> Result<AuthorizedSink<S>, Status>
    where
        S: MessageSink,
        E: fmt::Display,
        Fut: Future<Output = Result<S, E>>,
    {
        let method = method.into();
        let sink = open.await.map_err(|e| {
            debug!(method = %method, error = %e, "client stream open failed");
            Status::internal(format!("can't create client stream: {e}"))
        })?;
        Ok(self.authorize_client_stream(ctx, method, sink))
    }

    /// Wrap the inbound half of a server stream.
    #[must_use]
    pub fn authorize_server_stream<S, T>(
        &self,
        ctx: CallContext,
        method: impl Into<Arc<str>>,
        stream: S,
    ) -> AuthorizedStream<S, T>
    where
        S: Stream<Item = Result<T, Status>> + Unpin,
    {
        AuthorizedStream {
            inner: stream,
            authz: self.clone(),
            method: method.into(),
            ctx,
            state: StreamState::Open,
            fault: None,
            pending: None,
        }
    }

    /// Wrap the streaming body of an incoming request, taking the call
    /// context from its metadata and extensions.
    #[must_use]
    pub fn authorize_request_stream<S, T>(
        &self,
        method: impl Into<Arc<str>>,
        request: Request<S>,
    ) -> AuthorizedStream<S, T>
    where
        S: Stream<Item = Result<T, Status>> + Unpin,
    {
        let ctx = CallContext::from_request(&request);
        self.authorize_server_stream(ctx, method, request.into_inner())
    }
}
