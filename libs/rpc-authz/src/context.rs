//! Per-call context shared by the hook chain and the policy evaluator.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tonic::metadata::KeyAndValueRef;
use tonic::{Request, Status};

use crate::input::{CertAuthInput, NetAuthInput, PeerAuthInput, PrincipalAuthInput};

const GRPC_TIMEOUT_HEADER: &str = "grpc-timeout";
/// The gRPC wire format caps the `grpc-timeout` amount at 8 digits.
const GRPC_TIMEOUT_MAX_DIGITS: usize = 8;

/// Ambient context of one RPC call: peer identity, transport metadata and
/// the call's cancellation/deadline signal.
///
/// Cheap to clone; clones share the same cancellation token.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    peer: Option<PeerAuthInput>,
    metadata: BTreeMap<String, Vec<String>>,
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl CallContext {
    /// Create a new `CallContext` builder
    #[must_use]
    pub fn builder() -> CallContextBuilder {
        CallContextBuilder::default()
    }

    /// Derive the context of a `tonic` request.
    ///
    /// Picks up the remote address, ASCII metadata, a `grpc-timeout` deadline
    /// and any [`CancellationToken`], [`PrincipalAuthInput`] or
    /// [`CertAuthInput`] placed in the request extensions by earlier layers.
    #[must_use]
    pub fn from_request<T>(request: &Request<T>) -> Self {
        let mut builder = Self::builder();

        for entry in request.metadata().iter() {
            if let KeyAndValueRef::Ascii(key, value) = entry
                && let Ok(value) = value.to_str()
            {
                builder = builder.metadata(key.as_str(), value);
            }
        }

        let extensions = request.extensions();
        let principal = extensions.get::<PrincipalAuthInput>().cloned();
        let cert = extensions.get::<CertAuthInput>().cloned();
        let net = request.remote_addr().map(NetAuthInput::from);
        if principal.is_some() || cert.is_some() || net.is_some() {
            builder = builder.peer(PeerAuthInput {
                net,
                cert,
                principal,
            });
        }

        if let Some(token) = extensions.get::<CancellationToken>() {
            builder = builder.cancellation_token(token.clone());
        }

        if let Some(timeout) = request
            .metadata()
            .get(GRPC_TIMEOUT_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_grpc_timeout)
        {
            builder = builder.timeout(timeout);
        }

        builder.build()
    }

    #[must_use]
    pub fn peer(&self) -> Option<&PeerAuthInput> {
        self.peer.as_ref()
    }

    #[must_use]
    pub fn metadata(&self) -> &BTreeMap<String, Vec<String>> {
        &self.metadata
    }

    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Drive `fut` to completion unless the call is cancelled or its deadline
    /// passes first.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` or `DeadlineExceeded` when the call's signal fires
    /// before `fut` completes, otherwise whatever `fut` returns.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, Status>
    where
        F: Future<Output = Result<T, Status>>,
    {
        let deadline = self.deadline;
        let expired = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                Err(Status::cancelled("call cancelled during authorization"))
            }
            () = expired => {
                Err(Status::deadline_exceeded("deadline exceeded during authorization"))
            }
            res = fut => res,
        }
    }
}

/// Builder for [`CallContext`]. Without a token, [`build`](Self::build)
/// creates a fresh one owned by the context alone.
#[derive(Default)]
pub struct CallContextBuilder {
    peer: Option<PeerAuthInput>,
    metadata: BTreeMap<String, Vec<String>>,
    cancel: Option<CancellationToken>,
    deadline: Option<Instant>,
}

impl CallContextBuilder {
    /// Set the identity of the remote side.
    #[must_use]
    pub fn peer(mut self, peer: PeerAuthInput) -> Self {
        self.peer = Some(peer);
        self
    }

    /// Append a metadata value. Keys are lower-cased.
    #[must_use]
    pub fn metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata
            .entry(key.to_ascii_lowercase())
            .or_default()
            .push(value.to_owned());
        self
    }

    /// Tie the context to an externally owned cancellation signal.
    #[must_use]
    pub fn cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Absolute point after which evaluation reports `DeadlineExceeded`.
    #[must_use]
    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Set the deadline `timeout` from now. A timeout too large to be
    /// represented leaves the call without a deadline.
    #[must_use]
    pub fn timeout(self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.deadline(deadline),
            None => self,
        }
    }

    #[must_use]
    pub fn build(self) -> CallContext {
        CallContext {
            peer: self.peer,
            metadata: self.metadata,
            cancel: self.cancel.unwrap_or_default(),
            deadline: self.deadline,
        }
    }
}

/// Parse a `grpc-timeout` header value (`<amount><unit>`, unit one of
/// `H M S m u n`).
fn parse_grpc_timeout(value: &str) -> Option<Duration> {
    if value.len() < 2 || !value.is_ascii() {
        return None;
    }
    let (amount, unit) = value.split_at(value.len() - 1);
    if amount.len() > GRPC_TIMEOUT_MAX_DIGITS {
        return None;
    }
    let amount: u64 = amount.parse().ok()?;
    match unit {
        "H" => amount.checked_mul(3600).map(Duration::from_secs),
        "M" => amount.checked_mul(60).map(Duration::from_secs),
        "S" => Some(Duration::from_secs(amount)),
        "m" => Some(Duration::from_millis(amount)),
        "u" => Some(Duration::from_micros(amount)),
        "n" => Some(Duration::from_nanos(amount)),
        _ => None,
    }
}
