//! Structured authorization input presented to hooks and the policy evaluator.
//!
//! One [`AuthInput`] is built per unary call or per streamed message and
//! discarded once evaluation finishes.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tonic::{Request, Status};

use crate::context::CallContext;

/// Error raised when a message cannot be turned into policy input.
#[derive(Debug, thiserror::Error)]
pub enum AuthInputError {
    /// The message could not be represented as a structured value.
    #[error("unable to represent message of type {message_type} as policy input: {source}")]
    Unrepresentable {
        message_type: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl From<AuthInputError> for Status {
    fn from(e: AuthInputError) -> Self {
        Status::internal(format!("unable to create auth input: {e}"))
    }
}

/// Capability of a request/response type to serve as policy input.
///
/// Implemented for every `serde::Serialize` type. Conversion fails explicitly
/// for shapes the policy evaluator cannot consume (for example maps keyed by
/// non-string values).
pub trait AuthMessage {
    /// Type name reported to the policy as `input.type`.
    fn message_type(&self) -> &'static str;

    /// Convert the message into its structured representation.
    ///
    /// # Errors
    ///
    /// Returns [`AuthInputError::Unrepresentable`] if the message cannot be
    /// serialized into a JSON-like value.
    fn to_auth_value(&self) -> Result<Value, AuthInputError>;
}

impl<T: Serialize> AuthMessage for T {
    fn message_type(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn to_auth_value(&self) -> Result<Value, AuthInputError> {
        serde_json::to_value(self).map_err(|source| AuthInputError::Unrepresentable {
            message_type: std::any::type_name::<T>(),
            source,
        })
    }
}

/// Network coordinates of a peer or host.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetAuthInput {
    /// Transport network, e.g. `"tcp"`.
    pub network: String,
    pub address: String,
    pub port: u16,
}

impl From<SocketAddr> for NetAuthInput {
    fn from(addr: SocketAddr) -> Self {
        Self {
            network: "tcp".to_owned(),
            address: addr.ip().to_string(),
            port: addr.port(),
        }
    }
}

/// Attributes of the certificate a peer authenticated with.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CertAuthInput {
    pub subject: String,
    pub issuer: String,
    #[serde(default)]
    pub dns_names: Vec<String>,
    #[serde(default)]
    pub uris: Vec<String>,
}

/// Authenticated identity of a peer or host.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PrincipalAuthInput {
    pub id: String,
    #[serde(default)]
    pub groups: Vec<String>,
}

/// Information about the remote side of the call.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeerAuthInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub net: Option<NetAuthInput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert: Option<CertAuthInput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<PrincipalAuthInput>,
}

/// Information about the local side of the call. Usually filled by hooks.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostAuthInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub net: Option<NetAuthInput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<PrincipalAuthInput>,
}

/// The authorization document for one call or one streamed message.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AuthInput {
    /// Full RPC method, e.g. `/Exec.Exec/Run`.
    pub method: String,
    /// Type name of `message`.
    #[serde(rename = "type")]
    pub message_type: String,
    /// The request or response payload.
    pub message: Value,
    /// Lower-cased metadata keys mapped to their ASCII values.
    #[serde(default)]
    pub metadata: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer: Option<PeerAuthInput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<HostAuthInput>,
    /// Free-form attributes injected by hooks.
    #[serde(default)]
    pub extensions: Map<String, Value>,
}

impl AuthInput {
    /// Build the input for `message` sent or received on `method`.
    ///
    /// Peer and metadata attributes are copied from `ctx`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthInputError`] if the message cannot be represented.
    pub fn new<M: AuthMessage + ?Sized>(
        ctx: &CallContext,
        method: impl Into<String>,
        message: &M,
    ) -> Result<Self, AuthInputError> {
        Ok(Self {
            method: method.into(),
            message_type: message.message_type().to_owned(),
            message: message.to_auth_value()?,
            metadata: ctx.metadata().clone(),
            peer: ctx.peer().cloned(),
            host: None,
            extensions: Map::new(),
        })
    }

    /// Build the input from an incoming or outgoing `tonic` request.
    ///
    /// # Errors
    ///
    /// Returns [`AuthInputError`] if the request message cannot be represented.
    pub fn from_request<M: AuthMessage>(
        method: impl Into<String>,
        request: &Request<M>,
    ) -> Result<Self, AuthInputError> {
        let ctx = CallContext::from_request(request);
        Self::new(&ctx, method, request.get_ref())
    }

    /// Principal of the peer: the authenticated principal if any, else the
    /// certificate subject.
    #[must_use]
    pub fn peer_principal(&self) -> Option<&str> {
        let peer = self.peer.as_ref()?;
        peer.principal
            .as_ref()
            .map(|p| p.id.as_str())
            .or_else(|| peer.cert.as_ref().map(|c| c.subject.as_str()))
    }

    /// JSON rendering used for diagnostics.
    ///
    /// # Errors
    ///
    /// Returns the serializer error if an extension holds a value JSON cannot encode.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
