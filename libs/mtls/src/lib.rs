#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Mutual-TLS credential loading
//!
//! - [`CredentialsLoader`] - capability that yields CA pools and identities
//! - [`FileCredentialsLoader`] - reads PEM files named by [`FileLoaderConfig`]
//!
//! Loaders are constructed explicitly and handed to whatever builds the TLS
//! configuration; there is no global registry.

pub mod config;
pub mod error;
pub mod file;
pub mod loader;

pub use config::FileLoaderConfig;
pub use error::CredentialsError;
pub use file::FileCredentialsLoader;
pub use loader::{CredentialsLoader, Identity};
