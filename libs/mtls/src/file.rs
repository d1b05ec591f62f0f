//! PEM-file backed [`CredentialsLoader`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use parking_lot::Mutex;
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use tracing::debug;

use crate::config::FileLoaderConfig;
use crate::error::CredentialsError;
use crate::loader::{CredentialsLoader, Identity};

/// Loads credentials from the files named in a [`FileLoaderConfig`].
///
/// [`certs_refreshed`](CredentialsLoader::certs_refreshed) reports `true`
/// once any file read earlier has a newer modification time on disk.
pub struct FileCredentialsLoader {
    config: FileLoaderConfig,
    seen: Mutex<HashMap<PathBuf, SystemTime>>,
}

impl FileCredentialsLoader {
    pub const NAME: &'static str = "file";

    #[must_use]
    pub fn new(config: FileLoaderConfig) -> Self {
        Self {
            config,
            seen: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &FileLoaderConfig {
        &self.config
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>, CredentialsError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| CredentialsError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        if let Some(modified) = modified(path) {
            self.seen.lock().insert(path.to_path_buf(), modified);
        }
        debug!(loader = Self::NAME, path = %path.display(), "read credential file");
        Ok(bytes)
    }

    async fn certificates(
        &self,
        path: &Path,
    ) -> Result<Vec<CertificateDer<'static>>, CredentialsError> {
        let pem = self.read(path).await?;
        let certs = CertificateDer::pem_slice_iter(&pem)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| CredentialsError::Pem {
                path: path.to_path_buf(),
                source,
            })?;
        if certs.is_empty() {
            return Err(CredentialsError::NoCertificates(path.to_path_buf()));
        }
        Ok(certs)
    }

    async fn identity(&self, cert: &Path, key: &Path) -> Result<Identity, CredentialsError> {
        let chain = self.certificates(cert).await?;
        let pem = self.read(key).await?;
        let key = PrivateKeyDer::from_pem_slice(&pem).map_err(|source| CredentialsError::Pem {
            path: key.to_path_buf(),
            source,
        })?;
        Ok(Identity { chain, key })
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

#[async_trait]
impl CredentialsLoader for FileCredentialsLoader {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn load_client_ca(&self) -> Result<Vec<CertificateDer<'static>>, CredentialsError> {
        self.certificates(&self.config.root_ca).await
    }

    async fn load_root_ca(&self) -> Result<Vec<CertificateDer<'static>>, CredentialsError> {
        self.certificates(&self.config.root_ca).await
    }

    async fn load_client_certificate(&self) -> Result<Identity, CredentialsError> {
        self.identity(&self.config.client_cert, &self.config.client_key)
            .await
    }

    async fn load_server_certificate(&self) -> Result<Identity, CredentialsError> {
        self.identity(&self.config.server_cert, &self.config.server_key)
            .await
    }

    fn certs_refreshed(&self) -> bool {
        let seen = self.seen.lock();
        self.config.paths().into_iter().any(|path| {
            seen.get(path)
                .is_some_and(|loaded| modified(path).is_some_and(|now| now > *loaded))
        })
    }
}

impl std::fmt::Debug for FileCredentialsLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileCredentialsLoader")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
