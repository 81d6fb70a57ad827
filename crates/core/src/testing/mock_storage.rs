//! Mock object storage for testing.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::storage::{DownloadedObject, ObjectStorage, StorageError};

/// In-memory implementation of the ObjectStorage trait.
///
/// Objects are byte buffers keyed by storage key. Downloads write the bytes
/// to the requested path, so the rest of the pipeline sees a real file.
#[derive(Debug, Default)]
pub struct MockObjectStorage {
    objects: Arc<RwLock<HashMap<String, Vec<u8>>>>,
    /// Keys downloaded so far, in order.
    downloads: Arc<RwLock<Vec<String>>>,
    /// If set, the next download fails with this error.
    next_error: Arc<RwLock<Option<StorageError>>>,
}

impl MockObjectStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object.
    pub async fn put(&self, key: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.objects.write().await.insert(key.into(), bytes.into());
    }

    /// Remove an object.
    pub async fn remove(&self, key: &str) {
        self.objects.write().await.remove(key);
    }

    /// Keys downloaded so far.
    pub async fn downloads(&self) -> Vec<String> {
        self.downloads.read().await.clone()
    }

    /// Configure the next download to fail with the given error.
    pub async fn set_next_error(&self, error: StorageError) {
        *self.next_error.write().await = Some(error);
    }
}

#[async_trait]
impl ObjectStorage for MockObjectStorage {
    fn name(&self) -> &str {
        "mock"
    }

    async fn download_to_path(
        &self,
        key: &str,
        local_path: &Path,
    ) -> Result<DownloadedObject, StorageError> {
        self.downloads.write().await.push(key.to_string());

        if let Some(error) = self.next_error.write().await.take() {
            return Err(error);
        }

        let bytes = self
            .objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                key: key.to_string(),
            })?;

        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(local_path, &bytes).await?;

        Ok(DownloadedObject {
            path: local_path.to_path_buf(),
            size_bytes: bytes.len() as u64,
            sha256: format!("{:x}", Sha256::digest(&bytes)),
        })
    }

    async fn access_url(&self, key: &str) -> Result<String, StorageError> {
        Ok(format!("https://storage.test/{key}"))
    }
}
