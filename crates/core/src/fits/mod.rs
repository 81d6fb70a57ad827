//! FITS access through cfitsio.
//!
//! FITS is the canonical image form of the pipeline. Only the primary header
//! matters downstream: acquisition metadata and provenance live in its
//! keywords. Pixel data is never interpreted.

mod header;
mod image;

pub use header::{validate, PrimaryHeader};
pub use image::{update_keys, KeyValue, NewImage};

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while reading or writing FITS files.
#[derive(Debug, Error)]
pub enum FitsError {
    #[error("FITS file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("primary HDU is not an image: {}", path.display())]
    NotImage { path: PathBuf },

    #[error("cfitsio error: {0}")]
    Fitsio(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<fitsio::errors::Error> for FitsError {
    fn from(error: fitsio::errors::Error) -> Self {
        Self::Fitsio(error.to_string())
    }
}
