//! File locations for [`FileCredentialsLoader`](crate::FileCredentialsLoader).

use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use serde::{Deserialize, Serialize};

use crate::error::CredentialsError;

pub const ENV_PREFIX: &str = "FLEET_MTLS_";

const CONFIG_DIR: &str = ".fleet";

/// PEM file paths. Every field defaults to a file under `~/.fleet/`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct FileLoaderConfig {
    /// This client's certificate chain.
    pub client_cert: PathBuf,
    pub client_key: PathBuf,
    /// The server's certificate chain.
    pub server_cert: PathBuf,
    pub server_key: PathBuf,
    /// Root of trust for remote identities.
    pub root_ca: PathBuf,
}

impl Default for FileLoaderConfig {
    fn default() -> Self {
        let base = dirs::home_dir().unwrap_or_default().join(CONFIG_DIR);
        Self::under(&base)
    }
}

impl FileLoaderConfig {
    /// Default file names rooted at `dir`.
    #[must_use]
    pub fn under(dir: &Path) -> Self {
        Self {
            client_cert: dir.join("client.pem"),
            client_key: dir.join("client.key"),
            server_cert: dir.join("leaf.pem"),
            server_key: dir.join("leaf.key"),
            root_ca: dir.join("root.pem"),
        }
    }

    /// Defaults, overridden by `path` (if given) and `FLEET_MTLS_*` variables.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialsError::Config`] when `path` is missing or a source
    /// fails to parse.
    pub fn load(path: Option<&Path>) -> Result<Self, CredentialsError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file_exact(path));
        }
        figment
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()
            .map_err(|e| CredentialsError::Config(Box::new(e)))
    }

    pub(crate) fn paths(&self) -> [&Path; 5] {
        [
            &self.client_cert,
            &self.client_key,
            &self.server_cert,
            &self.server_key,
            &self.root_ca,
        ]
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn default_file_names() {
        let cfg = FileLoaderConfig::under(Path::new("/home/op/.fleet"));
        assert_eq!(cfg.client_cert, Path::new("/home/op/.fleet/client.pem"));
        assert_eq!(cfg.client_key, Path::new("/home/op/.fleet/client.key"));
        assert_eq!(cfg.server_cert, Path::new("/home/op/.fleet/leaf.pem"));
        assert_eq!(cfg.server_key, Path::new("/home/op/.fleet/leaf.key"));
        assert_eq!(cfg.root_ca, Path::new("/home/op/.fleet/root.pem"));
    }

    #[test]
    fn default_lives_under_config_dir() {
        let cfg = FileLoaderConfig::default();
        assert!(cfg.root_ca.ends_with(".fleet/root.pem"));
    }

    #[test]
    fn yaml_overrides_single_field() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mtls.yaml");
        std::fs::write(&path, "root_ca: /etc/fleet/ca.pem\n").unwrap();

        let cfg = FileLoaderConfig::load(Some(&path)).unwrap();
        assert_eq!(cfg.root_ca, Path::new("/etc/fleet/ca.pem"));
        assert_eq!(cfg.client_cert, FileLoaderConfig::default().client_cert);
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.yaml");

        assert!(matches!(
            FileLoaderConfig::load(Some(&path)),
            Err(CredentialsError::Config(_))
        ));
    }
}
