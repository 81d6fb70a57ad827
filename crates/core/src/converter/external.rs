//! External-tool based converter implementation.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::config::ConverterConfig;
use super::error::ConverterError;
use super::traits::FormatConverter;
use super::types::{ConversionJob, ConversionResult, ImageFormat, ToolReport, COPY_METHOD};
use crate::fits;
use crate::metrics;

/// Converter that shells out to a conversion tool for non-FITS inputs.
pub struct ExternalToolConverter {
    config: ConverterConfig,
}

impl ExternalToolConverter {
    pub fn new(config: ConverterConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(ConverterConfig::default())
    }

    pub fn config(&self) -> &ConverterConfig {
        &self.config
    }

    /// Check that `path` opens as a FITS file with an image primary HDU.
    async fn validate_fits(path: &Path) -> Result<(), String> {
        let path = path.to_path_buf();
        match tokio::task::spawn_blocking(move || fits::validate(&path)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(e) => Err(format!("header validation task failed: {e}")),
        }
    }

    async fn copy_canonical(
        &self,
        job: &ConversionJob,
        start: Instant,
    ) -> Result<ConversionResult, ConverterError> {
        Self::validate_fits(&job.input_path)
            .await
            .map_err(|reason| ConverterError::InvalidCanonical { reason })?;

        // Canonical inputs may already sit at the output path.
        if job.input_path != job.output_path {
            tokio::fs::copy(&job.input_path, &job.output_path).await?;
        }
        let size = tokio::fs::metadata(&job.output_path).await?.len();

        debug!(job_id = %job.job_id, "Canonical input copied");
        Ok(ConversionResult {
            job_id: job.job_id.clone(),
            output_path: job.output_path.clone(),
            original_format: ImageFormat::Fits,
            method: COPY_METHOD.to_string(),
            camera: None,
            is_bayer: None,
            output_size_bytes: size,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn run_tool(
        &self,
        job: &ConversionJob,
        format: ImageFormat,
        input_size: u64,
        start: Instant,
    ) -> Result<ConversionResult, ConverterError> {
        // A stale artifact from an earlier attempt must not be mistaken for
        // fresh output.
        match tokio::fs::remove_file(&job.output_path).await {
            Ok(()) => debug!(job_id = %job.job_id, "Removed stale conversion output"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(ConverterError::Io(e)),
        }

        let mut command = Command::new(&self.config.program);
        if let Some(script) = &self.config.script {
            command.arg(script);
        }
        command
            .args(&self.config.extra_args)
            .arg(&job.input_path)
            .arg(&job.output_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropping the wait future on timeout kills the child.
            .kill_on_drop(true);

        let child = command.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConverterError::ToolNotFound {
                    path: self.config.program.clone(),
                }
            } else {
                ConverterError::Io(e)
            }
        })?;

        let timeout_secs = self.config.timeout_secs_for(input_size);
        debug!(
            job_id = %job.job_id,
            format = %format,
            timeout_secs,
            "Running conversion tool"
        );

        let output = match timeout(self.config.timeout_for(input_size), child.wait_with_output())
            .await
        {
            Ok(result) => result?,
            Err(_) => {
                warn!(job_id = %job.job_id, timeout_secs, "Conversion tool timed out");
                return Err(ConverterError::Timeout { timeout_secs });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let stderr = (!stderr.is_empty()).then_some(stderr);
        let report = ToolReport::from_stdout(&stdout);

        if !output.status.success() {
            let reason = report
                .and_then(|r| r.error)
                .unwrap_or_else(|| format!("tool exited with code: {:?}", output.status.code()));
            return Err(ConverterError::conversion_failed(reason, stderr));
        }

        let report = report.ok_or_else(|| ConverterError::ParseError {
            reason: "tool printed no JSON report".to_string(),
        })?;
        if !report.success {
            return Err(ConverterError::conversion_failed(
                report
                    .error
                    .unwrap_or_else(|| "tool reported failure".to_string()),
                stderr,
            ));
        }

        let output_meta = tokio::fs::metadata(&job.output_path)
            .await
            .map_err(|_| ConverterError::conversion_failed("Output file not created", stderr.clone()))?;
        Self::validate_fits(&job.output_path)
            .await
            .map_err(|reason| {
                ConverterError::conversion_failed(format!("Output is not valid FITS: {reason}"), None)
            })?;

        Ok(ConversionResult {
            job_id: job.job_id.clone(),
            output_path: job.output_path.clone(),
            original_format: format,
            method: report.method.unwrap_or_else(|| "external".to_string()),
            camera: report.camera,
            is_bayer: report.is_bayer,
            output_size_bytes: output_meta.len(),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

#[async_trait]
impl FormatConverter for ExternalToolConverter {
    fn name(&self) -> &str {
        "external_tool"
    }

    async fn convert(&self, job: ConversionJob) -> Result<ConversionResult, ConverterError> {
        let start = Instant::now();

        let format = ImageFormat::from_path(&job.input_path).ok_or_else(|| {
            ConverterError::unsupported(
                job.input_path
                    .extension()
                    .and_then(|e| e.to_str())
                    .unwrap_or("")
                    .to_string(),
            )
        })?;

        let input_meta = tokio::fs::metadata(&job.input_path).await.map_err(|_| {
            ConverterError::InputNotFound {
                path: job.input_path.clone(),
            }
        })?;

        if let Some(parent) = job.output_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|_| {
                ConverterError::OutputDirectoryFailed {
                    path: parent.to_path_buf(),
                }
            })?;
        }

        let result = if format.is_canonical() {
            self.copy_canonical(&job, start).await
        } else {
            self.run_tool(&job, format, input_meta.len(), start).await
        };

        let outcome = if result.is_ok() { "success" } else { "error" };
        metrics::CONVERSIONS_TOTAL
            .with_label_values(&[format.label(), outcome])
            .inc();
        metrics::CONVERSION_DURATION
            .with_label_values(&[format.label()])
            .observe(start.elapsed().as_secs_f64());

        if let Ok(ref converted) = result {
            info!(
                job_id = %job.job_id,
                format = %format,
                method = %converted.method,
                duration_ms = converted.duration_ms,
                "Conversion finished"
            );
        }
        result
    }

    async fn validate(&self) -> Result<(), ConverterError> {
        if let Some(script) = &self.config.script {
            if tokio::fs::metadata(script).await.is_err() {
                return Err(ConverterError::ToolNotFound {
                    path: script.clone(),
                });
            }
            return Ok(());
        }

        let result = Command::new(&self.config.program)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ConverterError::ToolNotFound {
                path: self.config.program.clone(),
            }),
            Err(e) => Err(ConverterError::Io(e)),
        }
    }
}
