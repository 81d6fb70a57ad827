//! HTTP object storage: `GET {base_url}/{key}` streams the object.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use sha2::{Digest, Sha256};
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::debug;

use super::{encode_key, validate_key, DownloadedObject, ObjectStorage, StorageError};

/// Objects served over plain HTTP.
pub struct HttpObjectStorage {
    client: Client,
    base_url: String,
    public_base_url: Option<String>,
}

impl HttpObjectStorage {
    pub fn new(
        base_url: String,
        public_base_url: Option<String>,
        timeout_secs: u64,
    ) -> Result<Self, StorageError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| StorageError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            public_base_url,
        })
    }

    fn base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url(), encode_key(key))
    }
}

#[async_trait]
impl ObjectStorage for HttpObjectStorage {
    fn name(&self) -> &str {
        "http"
    }

    async fn download_to_path(
        &self,
        key: &str,
        local_path: &Path,
    ) -> Result<DownloadedObject, StorageError> {
        validate_key(key)?;
        let url = self.object_url(key);
        debug!(%url, "Downloading object");

        let mut response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| StorageError::Network(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(StorageError::NotFound {
                key: key.to_string(),
            });
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(StorageError::Http {
                status: status.as_u16(),
                message,
            });
        }

        if let Some(parent) = local_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut writer = BufWriter::new(File::create(local_path).await?);
        let mut hasher = Sha256::new();
        let mut total_bytes = 0u64;

        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| StorageError::Network(e.to_string()))?
        {
            hasher.update(&chunk);
            writer.write_all(&chunk).await?;
            total_bytes += chunk.len() as u64;
        }
        writer.flush().await?;

        Ok(DownloadedObject {
            path: local_path.to_path_buf(),
            size_bytes: total_bytes,
            sha256: format!("{:x}", hasher.finalize()),
        })
    }

    async fn access_url(&self, key: &str) -> Result<String, StorageError> {
        validate_key(key)?;
        Ok(match &self.public_base_url {
            Some(base) => format!("{}/{}", base.trim_end_matches('/'), encode_key(key)),
            None => self.object_url(key),
        })
    }
}
