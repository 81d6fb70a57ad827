//! Durable object storage.
//!
//! Uploaded files already live in object storage when a job is created; the
//! worker only downloads them to a local temp path and asks for access URLs.

mod config;
mod http;
mod local;

pub use config::{StorageBackend, StorageConfig};
pub use http::HttpObjectStorage;
pub use local::LocalObjectStorage;

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

/// Errors from object storage.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Object not found: {key}")]
    NotFound { key: String },

    #[error("Invalid object key: {key}")]
    InvalidKey { key: String },

    #[error("Storage request failed with status {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Storage network error: {0}")]
    Network(String),

    #[error("Storage is not configured: {0}")]
    NotConfigured(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Worth another delivery attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Io(_) => true,
            Self::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

/// A file fetched to local disk.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadedObject {
    pub path: PathBuf,
    pub size_bytes: u64,
    /// Hex SHA-256 of the downloaded bytes.
    pub sha256: String,
}

/// Trait for object storage backends.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Returns the name of this backend.
    fn name(&self) -> &str;

    /// Download an object to `local_path`, replacing any existing file.
    async fn download_to_path(
        &self,
        key: &str,
        local_path: &Path,
    ) -> Result<DownloadedObject, StorageError>;

    /// URL a remote service can fetch the object from.
    async fn access_url(&self, key: &str) -> Result<String, StorageError>;
}

/// Create the storage backend selected by configuration.
pub fn create_object_storage(
    config: &StorageConfig,
) -> Result<Arc<dyn ObjectStorage>, StorageError> {
    match config.backend {
        StorageBackend::Local => Ok(Arc::new(LocalObjectStorage::new(
            config.root.clone(),
            config.public_base_url.clone(),
        ))),
        StorageBackend::Http => {
            let base_url = config.base_url.clone().ok_or_else(|| {
                StorageError::NotConfigured("http storage needs base_url".to_string())
            })?;
            Ok(Arc::new(HttpObjectStorage::new(
                base_url,
                config.public_base_url.clone(),
                config.request_timeout_secs,
            )?))
        }
    }
}

/// Reject keys that are empty, absolute or escape the storage root.
pub(crate) fn validate_key(key: &str) -> Result<(), StorageError> {
    let invalid = || StorageError::InvalidKey {
        key: key.to_string(),
    };
    if key.trim().is_empty() || key.starts_with('/') || key.contains('\\') {
        return Err(invalid());
    }
    for component in Path::new(key).components() {
        if !matches!(component, Component::Normal(_)) {
            return Err(invalid());
        }
    }
    Ok(())
}

/// Percent-encode each path segment of a key.
pub(crate) fn encode_key(key: &str) -> String {
    key.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
