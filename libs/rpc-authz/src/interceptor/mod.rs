//! Lifecycle bindings that put the [`Authorizer`](crate::Authorizer) in
//! front of RPC calls.
//!
//! | call shape        | binding                                                        |
//! |-------------------|----------------------------------------------------------------|
//! | unary, server     | [`Authorizer::authorize_unary`](crate::Authorizer::authorize_unary), [`AuthorizeLayer::server`] |
//! | unary, client     | [`Authorizer::authorize_client`](crate::Authorizer::authorize_client), [`AuthorizeLayer::client`] |
//! | streaming, client | [`AuthorizedSink`]: each `send` is authorized before transmission |
//! | streaming, server | [`AuthorizedStream`]: each received message is authorized before delivery |

pub mod stream;
pub mod unary;

pub use stream::{AuthorizedSink, AuthorizedStream, ChannelSink, MessageSink, StreamState, channel};
pub use unary::{Authorize, AuthorizeLayer};

/// Which end of the call a binding runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// Incoming call, authorized before the handler runs.
    Server,
    /// Outgoing call, authorized before anything is sent.
    Client,
}

impl Side {
    /// Label used in log fields.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::Client => "client",
        }
    }
}
