//! Errors raised while locating or decoding credentials.

use std::path::PathBuf;

/// Failure to produce a credential.
#[derive(Debug, thiserror::Error)]
pub enum CredentialsError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid PEM in {}: {source}", .path.display())]
    Pem {
        path: PathBuf,
        #[source]
        source: rustls_pki_types::pem::Error,
    },

    #[error("no certificates found in {}", .0.display())]
    NoCertificates(PathBuf),

    #[error("failed to load mTLS config: {0}")]
    Config(#[from] Box<figment::Error>),
}
