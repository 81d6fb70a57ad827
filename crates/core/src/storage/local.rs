//! Filesystem-backed object storage.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};

use super::{encode_key, validate_key, DownloadedObject, ObjectStorage, StorageError};

const BUFFER_SIZE: usize = 64 * 1024;

/// Objects stored as files under a root directory.
pub struct LocalObjectStorage {
    root: PathBuf,
    public_base_url: Option<String>,
}

impl LocalObjectStorage {
    pub fn new(root: PathBuf, public_base_url: Option<String>) -> Self {
        Self {
            root,
            public_base_url,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl ObjectStorage for LocalObjectStorage {
    fn name(&self) -> &str {
        "local"
    }

    async fn download_to_path(
        &self,
        key: &str,
        local_path: &Path,
    ) -> Result<DownloadedObject, StorageError> {
        let source = self.object_path(key)?;

        let source_file = File::open(&source).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound {
                    key: key.to_string(),
                }
            } else {
                StorageError::Io(e)
            }
        })?;

        if let Some(parent) = local_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let dest_file = File::create(local_path).await?;

        let mut reader = BufReader::with_capacity(BUFFER_SIZE, source_file);
        let mut writer = BufWriter::with_capacity(BUFFER_SIZE, dest_file);
        let mut hasher = Sha256::new();
        let mut total_bytes = 0u64;
        let mut buffer = vec![0u8; BUFFER_SIZE];

        loop {
            let bytes_read = reader.read(&mut buffer).await?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
            writer.write_all(&buffer[..bytes_read]).await?;
            total_bytes += bytes_read as u64;
        }
        writer.flush().await?;

        Ok(DownloadedObject {
            path: local_path.to_path_buf(),
            size_bytes: total_bytes,
            sha256: format!("{:x}", hasher.finalize()),
        })
    }

    async fn access_url(&self, key: &str) -> Result<String, StorageError> {
        let path = self.object_path(key)?;
        match &self.public_base_url {
            Some(base) => Ok(format!("{}/{}", base.trim_end_matches('/'), encode_key(key))),
            None => Ok(format!("file://{}", path.display())),
        }
    }
}
