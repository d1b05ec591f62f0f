//! Source of TLS identities and trust roots.

use async_trait::async_trait;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};

use crate::error::CredentialsError;

/// A certificate chain and its private key.
#[derive(Debug)]
pub struct Identity {
    pub chain: Vec<CertificateDer<'static>>,
    pub key: PrivateKeyDer<'static>,
}

/// Source of the TLS material used for mutually authenticated connections.
#[async_trait]
pub trait CredentialsLoader: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// CA pool a server uses to verify client certificates.
    async fn load_client_ca(&self) -> Result<Vec<CertificateDer<'static>>, CredentialsError>;

    /// CA pool a client uses to verify server certificates.
    async fn load_root_ca(&self) -> Result<Vec<CertificateDer<'static>>, CredentialsError>;

    async fn load_client_certificate(&self) -> Result<Identity, CredentialsError>;

    async fn load_server_certificate(&self) -> Result<Identity, CredentialsError>;

    /// Whether the material changed since it was last loaded; callers rebuild
    /// their TLS configuration when this returns `true`.
    fn certs_refreshed(&self) -> bool;
}
