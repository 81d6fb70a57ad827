//! Metadata extraction from canonical FITS images.
//!
//! Every field is optional and read independently: a header without `EXPTIME`
//! still yields its `OBJECT`, and so on. Extraction only fails when the file
//! cannot be opened or has no valid primary header.

mod fits_extractor;
mod types;

pub use fits_extractor::FitsMetadataExtractor;
pub use types::ImageMetadata;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during metadata extraction.
#[derive(Debug, Error)]
pub enum ExtractorError {
    #[error("Image not found: {path}")]
    NotFound { path: PathBuf },

    #[error("Unreadable image {path}: {reason}")]
    Unreadable { path: PathBuf, reason: String },

    #[error("Extraction task failed: {0}")]
    Task(String),
}

/// Reads structured metadata from a canonical image.
#[async_trait]
pub trait MetadataExtractor: Send + Sync {
    /// Returns the name of this extractor implementation.
    fn name(&self) -> &str;

    async fn extract(&self, path: &Path) -> Result<ImageMetadata, ExtractorError>;
}
