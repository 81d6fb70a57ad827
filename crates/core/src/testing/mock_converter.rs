//! Mock converter for testing.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::converter::{
    ConversionJob, ConversionResult, ConverterError, FormatConverter, ImageFormat, COPY_METHOD,
};
use crate::fits::{self, FitsError, KeyValue, NewImage};

/// Mock implementation of the FormatConverter trait.
///
/// Stands in for the external tool:
/// - FITS inputs are copied, like the real converter
/// - Other inputs whose bytes happen to hold a FITS header keep that header,
///   which is how tests embed "EXIF" metadata into a fake JPEG
/// - Anything else becomes a bare 64×48 image
///
/// Every output gets `ORIGFMT` and `ORIGFILE` provenance keywords.
#[derive(Debug, Default)]
pub struct MockConverter {
    jobs: Arc<RwLock<Vec<ConversionJob>>>,
    next_error: Arc<RwLock<Option<ConverterError>>>,
}

impl MockConverter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Conversion jobs seen so far.
    pub async fn recorded_jobs(&self) -> Vec<ConversionJob> {
        self.jobs.read().await.clone()
    }

    /// Get the number of conversions performed.
    pub async fn conversion_count(&self) -> usize {
        self.jobs.read().await.len()
    }

    /// Configure the next conversion to fail with the given error.
    pub async fn set_next_error(&self, error: ConverterError) {
        *self.next_error.write().await = Some(error);
    }

    /// Write the converted image for a non-canonical input.
    fn write_output(input: &Path, output: &Path, format: ImageFormat) -> Result<(), FitsError> {
        let mut provenance = vec![(
            "ORIGFMT".to_string(),
            KeyValue::Text(format.label().to_string()),
        )];
        if let Some(name) = input.file_name().and_then(|n| n.to_str()) {
            provenance.push(("ORIGFILE".to_string(), KeyValue::Text(name.to_string())));
        }

        if let Err(e) = std::fs::remove_file(output) {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(e.into());
            }
        }

        if fits::validate(input).is_ok() {
            std::fs::copy(input, output)?;
            fits::update_keys(output, &provenance)
        } else {
            let mut image = NewImage::new(64, 48);
            image.keys = provenance;
            image.write(output)
        }
    }
}

#[async_trait]
impl FormatConverter for MockConverter {
    fn name(&self) -> &str {
        "mock"
    }

    async fn convert(&self, job: ConversionJob) -> Result<ConversionResult, ConverterError> {
        self.jobs.write().await.push(job.clone());

        if let Some(error) = self.next_error.write().await.take() {
            return Err(error);
        }

        let format = ImageFormat::from_path(&job.input_path).ok_or_else(|| {
            ConverterError::unsupported(
                job.input_path
                    .extension()
                    .and_then(|e| e.to_str())
                    .unwrap_or(""),
            )
        })?;

        let input = tokio::fs::read(&job.input_path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConverterError::InputNotFound {
                    path: job.input_path.clone(),
                }
            } else {
                ConverterError::Io(e)
            }
        })?;

        let method = if format.is_canonical() {
            if job.input_path != job.output_path {
                tokio::fs::write(&job.output_path, &input).await?;
            }
            COPY_METHOD.to_string()
        } else {
            let (input_path, output_path) = (job.input_path.clone(), job.output_path.clone());
            tokio::task::spawn_blocking(move || Self::write_output(&input_path, &output_path, format))
                .await
                .map_err(|e| ConverterError::conversion_failed(e.to_string(), None))?
                .map_err(|e| ConverterError::conversion_failed(e.to_string(), None))?;
            "mock".to_string()
        };
        let output_size_bytes = tokio::fs::metadata(&job.output_path).await?.len();

        Ok(ConversionResult {
            job_id: job.job_id,
            output_path: job.output_path,
            original_format: format,
            method,
            camera: None,
            is_bayer: Some(false),
            output_size_bytes,
            duration_ms: 0,
        })
    }

    async fn validate(&self) -> Result<(), ConverterError> {
        Ok(())
    }
}
