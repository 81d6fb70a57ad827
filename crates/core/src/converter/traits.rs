//! Trait definitions for the converter module.

use async_trait::async_trait;

use super::error::ConverterError;
use super::types::{ConversionJob, ConversionResult, ImageFormat};

/// A converter that normalizes images into canonical FITS.
#[async_trait]
pub trait FormatConverter: Send + Sync {
    /// Returns the name of this converter implementation.
    fn name(&self) -> &str;

    /// Converts `job.input_path` into a FITS file at `job.output_path`.
    ///
    /// Writes exactly one output file and never modifies the input.
    async fn convert(&self, job: ConversionJob) -> Result<ConversionResult, ConverterError>;

    /// Validates that the converter is properly configured and ready.
    async fn validate(&self) -> Result<(), ConverterError>;

    /// Whether this converter accepts the given file name.
    fn supports(&self, filename: &str) -> bool {
        ImageFormat::from_filename(filename).is_some()
    }
}
