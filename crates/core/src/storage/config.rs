//! Storage configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Which object storage backend to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// Objects are files under `root`.
    #[default]
    Local,
    /// Objects are fetched with `GET {base_url}/{key}`.
    Http,
}

/// Object storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    /// Root directory for the local backend.
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Base URL for the http backend.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Public URL prefix handed to remote services.
    #[serde(default)]
    pub public_base_url: Option<String>,

    /// Download timeout for the http backend in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_root() -> PathBuf {
    PathBuf::from("./data/uploads")
}

fn default_request_timeout() -> u64 {
    600
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            root: default_root(),
            base_url: None,
            public_base_url: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl StorageConfig {
    /// Local storage rooted at `root`.
    pub fn local(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }
}
