//! Per-job pipeline.
//!
//! Drives one job through download, conversion, extraction, plate solving
//! and matching. Each stage boundary is persisted before the stage starts,
//! so a crash leaves the last known stage on the job rather than `PENDING`.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::catalog::{CatalogStore, NewImageRecord};
use crate::converter::{ConversionJob, FormatConverter, ImageFormat};
use crate::coordinates::SkyPosition;
use crate::extractor::{ImageMetadata, MetadataExtractor};
use crate::job::{
    ErrorKind, ExtractedFields, JobCompletion, JobFailure, JobStatus, JobStore, ProcessingJob,
};
use crate::matcher::{CoordinateSource, MatchQuery, TargetMatcher};
use crate::metrics;
use crate::queue::{Lease, WorkQueue};
use crate::solver::{PlateSolver, SolveOptions, SolveOutcome, SolveRequest, SolverError};
use crate::storage::{ObjectStorage, StorageError};

use super::config::WorkerConfig;
use super::temp::TempFiles;
use super::types::{JobProgress, PipelineFailure};

/// Everything a pipeline run needs, shared by all concurrent runs.
pub(crate) struct PipelineContext {
    pub(crate) config: WorkerConfig,
    pub(crate) jobs: Arc<dyn JobStore>,
    pub(crate) catalog: Arc<dyn CatalogStore>,
    pub(crate) queue: Arc<dyn WorkQueue>,
    pub(crate) storage: Arc<dyn ObjectStorage>,
    pub(crate) converter: Arc<dyn FormatConverter>,
    pub(crate) extractor: Arc<dyn MetadataExtractor>,
    pub(crate) solver: Arc<dyn PlateSolver>,
    pub(crate) matcher: TargetMatcher,
    pub(crate) progress: broadcast::Sender<JobProgress>,
}

/// Observes how long each stage took.
struct StageTimer {
    stage: JobStatus,
    started: Instant,
}

impl StageTimer {
    fn start(stage: JobStatus) -> Self {
        Self {
            stage,
            started: Instant::now(),
        }
    }

    fn switch(&mut self, next: JobStatus) {
        self.observe();
        self.stage = next;
        self.started = Instant::now();
    }

    fn observe(&self) {
        metrics::STAGE_DURATION
            .with_label_values(&[self.stage.as_str()])
            .observe(self.started.elapsed().as_secs_f64());
    }
}

type StageResult<T> = Result<T, PipelineFailure>;

impl PipelineContext {
    /// Handle one queue delivery: run the pipeline under the job timeout and
    /// settle the queue entry according to the result.
    pub(crate) async fn deliver(&self, lease: Lease) {
        let job_id = lease.job_id.clone();
        let started = Instant::now();
        info!(job_id = %job_id, attempt = lease.attempt, "Processing job");

        let timeout = self.config.job_timeout();
        let result = match tokio::time::timeout(timeout, self.run(&job_id)).await {
            Ok(result) => result,
            Err(_) => {
                let stage = self
                    .jobs
                    .get(&job_id)
                    .ok()
                    .flatten()
                    .map(|job| job.status)
                    .unwrap_or(JobStatus::Pending);
                Err(PipelineFailure::Fatal(
                    JobFailure::new(
                        ErrorKind::JobTimeout,
                        stage,
                        format!("Job exceeded the {}s processing timeout", timeout.as_secs()),
                    )
                    .with_field("timeout_secs", timeout.as_secs()),
                ))
            }
        };

        match result {
            Ok(Some(job)) => {
                self.record_finished(&job, started);
                self.ack(&job_id);
            }
            Ok(None) => self.ack(&job_id),
            Err(PipelineFailure::Aborted(reason)) => {
                warn!(job_id = %job_id, reason = %reason, "Dropping delivery");
                self.ack(&job_id);
            }
            Err(PipelineFailure::Fatal(failure)) => {
                self.fail(&job_id, &failure, started);
                self.ack(&job_id);
            }
            Err(PipelineFailure::Retryable(failure)) => {
                if self.config.retry.has_attempts_left(lease.attempt) {
                    let delay = self.config.retry.delay_for(lease.attempt);
                    let retry_at = Utc::now()
                        + chrono::Duration::from_std(delay)
                            .unwrap_or_else(|_| chrono::Duration::seconds(60));
                    warn!(
                        job_id = %job_id,
                        attempt = lease.attempt,
                        delay_secs = delay.as_secs_f64(),
                        error = %failure,
                        "Job attempt failed, scheduling redelivery"
                    );
                    metrics::QUEUE_REDELIVERIES.inc();
                    if let Err(e) = self.queue.nack(&job_id, retry_at, &failure.to_string()) {
                        error!(job_id = %job_id, error = %e, "Failed to release queue entry");
                    }
                } else {
                    let exhausted = JobFailure::new(
                        ErrorKind::QueueDeliveryFailure,
                        failure.stage,
                        format!(
                            "Gave up after {} delivery attempts: {}",
                            lease.attempt, failure.message
                        ),
                    )
                    .with_field("attempts", lease.attempt)
                    .with_field("last_error_kind", failure.kind.as_str());
                    self.fail(&job_id, &exhausted, started);
                    self.ack(&job_id);
                }
            }
        }
    }

    /// Run the pipeline for a job. Returns `None` when the job had already
    /// left the pipeline and there was nothing to do.
    pub(crate) async fn run(&self, job_id: &str) -> StageResult<Option<ProcessingJob>> {
        let job = self
            .jobs
            .get(job_id)
            .map_err(|e| PipelineFailure::from_job_error(e, JobStatus::Pending))?
            .ok_or_else(|| PipelineFailure::Aborted(format!("job {} no longer exists", job_id)))?;

        if job.status.is_terminal() {
            debug!(job_id = %job_id, status = %job.status, "Job already finished, skipping");
            return Ok(None);
        }

        let job = if job.status.is_in_flight() {
            warn!(job_id = %job_id, status = %job.status, "Restarting redelivered job");
            self.jobs
                .restart(job_id)
                .map_err(|e| PipelineFailure::from_job_error(e, JobStatus::Pending))?
        } else {
            job
        };

        let mut temp = TempFiles::new();
        let result = self.process(job, &mut temp).await;
        temp.cleanup().await;
        result.map(Some)
    }

    async fn process(&self, job: ProcessingJob, temp: &mut TempFiles) -> StageResult<ProcessingJob> {
        let mut timer = StageTimer::start(JobStatus::Pending);

        let (format, extension) = classify(&job)?;

        tokio::fs::create_dir_all(&self.config.temp_dir)
            .await
            .map_err(|e| {
                PipelineFailure::Retryable(JobFailure::new(
                    ErrorKind::StorageFailure,
                    JobStatus::Pending,
                    format!("Failed to create temp directory: {}", e),
                ))
            })?;

        let source_path = temp.track(
            self.config
                .temp_dir
                .join(format!("{}.source.{}", job.id, extension)),
        );
        let downloaded = self
            .storage
            .download_to_path(&job.storage_key, &source_path)
            .await
            .map_err(|e| storage_failure(e, &job.storage_key))?;
        debug!(
            job_id = %job.id,
            size_bytes = downloaded.size_bytes,
            sha256 = %downloaded.sha256,
            "Downloaded source file"
        );

        // Conversion
        let fits_path = if format.is_canonical() {
            temp.track(&source_path)
        } else {
            self.advance(&job.id, JobStatus::Converting, &mut timer)?;
            let output = temp.track(self.config.temp_dir.join(format!("{}.fits", job.id)));
            let result = self
                .converter
                .convert(ConversionJob::new(&job.id, &source_path, &output))
                .await
                .map_err(|e| {
                    let mut failure = JobFailure::new(
                        ErrorKind::ConversionFailure,
                        JobStatus::Converting,
                        e.to_string(),
                    )
                    .with_field("format", format.label())
                    .with_field("converter", self.converter.name());
                    if let Some(stderr) = e.stderr() {
                        failure = failure.with_field("stderr", stderr);
                    }
                    PipelineFailure::Fatal(failure)
                })?;
            info!(
                job_id = %job.id,
                format = format.label(),
                method = %result.method,
                duration_ms = result.duration_ms,
                "Converted to FITS"
            );
            temp.track(result.output_path)
        };

        // Extraction
        self.advance(&job.id, JobStatus::Extracting, &mut timer)?;
        let metadata = self.extractor.extract(&fits_path).await.map_err(|e| {
            PipelineFailure::Fatal(
                JobFailure::new(ErrorKind::ExtractionFailure, JobStatus::Extracting, e.to_string())
                    .with_field("extractor", self.extractor.name()),
            )
        })?;
        let mut job = self
            .jobs
            .record_extraction(&job.id, ExtractedFields::from(&metadata))
            .map_err(|e| PipelineFailure::from_job_error(e, JobStatus::Extracting))?;

        let mut position = metadata
            .position()
            .map(|p| (p, CoordinateSource::Metadata));
        let mut solve_error = None;

        // Plate solving, only without usable coordinates
        if let Some((pos, _)) = &position {
            info!(job_id = %job.id, position = %pos, "Coordinates found in metadata, skipping plate solve");
        } else {
            self.advance(&job.id, JobStatus::PlateSolving, &mut timer)?;
            match self.solve(&job, &metadata, &fits_path).await? {
                Ok(outcome) => {
                    let calibration = &outcome.calibration;
                    info!(
                        job_id = %job.id,
                        solver = %outcome.solver,
                        position = %SkyPosition::new(calibration.ra, calibration.dec),
                        "Plate solve succeeded"
                    );
                    job = self
                        .jobs
                        .record_calibration(&job.id, calibration)
                        .map_err(|e| PipelineFailure::from_job_error(e, JobStatus::PlateSolving))?;
                    position = Some((
                        SkyPosition::new(calibration.ra, calibration.dec),
                        CoordinateSource::PlateSolve,
                    ));
                }
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, kind = e.kind(), "Plate solve failed");
                    solve_error = Some(e);
                }
            }
        }

        // Matching
        self.advance(&job.id, JobStatus::Matching, &mut timer)?;
        let mut query = MatchQuery::new().with_name_hint(metadata.name_hint());
        if let Some((pos, source)) = position {
            query = query.with_position(pos, source);
        }
        let found = self
            .matcher
            .find_match(&query)
            .map_err(|e| PipelineFailure::from_catalog_error(e, JobStatus::Matching))?;
        timer.observe();

        let Some(found) = found else {
            return self.finish_unmatched(&job, solve_error);
        };

        let record = self
            .catalog
            .create_image_record(NewImageRecord {
                user_id: job.user_id.clone(),
                target_id: found.target_id().to_string(),
                job_id: Some(job.id.clone()),
                storage_key: job.storage_key.clone(),
                original_filename: job.original_filename.clone(),
                match_method: found.method,
                ra: job.ra,
                dec: job.dec,
                exposure_time: job.exposure_time,
                total_integration_time: job.total_integration_time,
                filter_name: job.filter_name.clone(),
                capture_date: job.capture_date,
                metadata: job.metadata.clone(),
            })
            .map_err(|e| PipelineFailure::from_catalog_error(e, JobStatus::Matching))?;

        match self
            .catalog
            .mark_target_captured(&job.user_id, found.target_id())
        {
            Ok(true) => debug!(job_id = %job.id, target_id = %found.target_id(), "Wishlist entry marked captured"),
            Ok(false) => {}
            Err(e) => warn!(job_id = %job.id, error = %e, "Failed to update wishlist"),
        }

        metrics::MATCHES_TOTAL
            .with_label_values(&[found.method.as_str()])
            .inc();

        let job = self
            .jobs
            .complete(
                &job.id,
                JobCompletion {
                    target_id: found.target_id().to_string(),
                    method: found.method,
                    image_record_id: record.id.clone(),
                },
            )
            .map_err(|e| PipelineFailure::from_job_error(e, JobStatus::Matching))?;

        info!(
            job_id = %job.id,
            target = %found.target.label(),
            method = %found.method,
            image_record_id = %record.id,
            "Job completed"
        );
        self.publish(&job);
        Ok(job)
    }

    /// No target found. A solve that could not finish fails the job; a
    /// definitive "no solution" or no solve at all needs an operator.
    fn finish_unmatched(
        &self,
        job: &ProcessingJob,
        solve_error: Option<SolverError>,
    ) -> StageResult<ProcessingJob> {
        if let Some(e) = solve_error.filter(|e| !e.is_definitive()) {
            let kind = if e.is_timeout() {
                ErrorKind::SolveTimeout
            } else {
                ErrorKind::SolveFailure
            };
            return Err(PipelineFailure::Fatal(
                JobFailure::new(kind, JobStatus::PlateSolving, e.to_string())
                    .with_field("solver", self.solver.name())
                    .with_field("solver_error", e.kind()),
            ));
        }

        let job = self
            .jobs
            .mark_needs_target(&job.id)
            .map_err(|e| PipelineFailure::from_job_error(e, JobStatus::Matching))?;
        info!(
            job_id = %job.id,
            name_hint = ?job.target_name_hint,
            ra = ?job.ra,
            dec = ?job.dec,
            "No target match, job needs a target"
        );
        self.publish(&job);
        Ok(job)
    }

    /// Build and send the solve request. The outer error is for failures of
    /// our own (reading the temp file); the inner one is the solver's answer.
    async fn solve(
        &self,
        job: &ProcessingJob,
        metadata: &ImageMetadata,
        fits_path: &Path,
    ) -> StageResult<Result<SolveOutcome, SolverError>> {
        let image = tokio::fs::read(fits_path).await.map_err(|e| {
            PipelineFailure::Retryable(JobFailure::new(
                ErrorKind::StorageFailure,
                JobStatus::PlateSolving,
                format!("Failed to read canonical image: {}", e),
            ))
        })?;

        let mut options = SolveOptions::default();
        if let Some(fov) = metadata.field_of_view_deg() {
            options = options.with_fov(fov);
        }
        if let Some(factor) = self.config.downsample_for(image.len() as u64) {
            options = options.with_downsample(factor);
        }
        if let (Some(width), Some(height)) = (dimension(metadata.width), dimension(metadata.height)) {
            options = options.with_dimensions(width, height);
        }

        let filename = fits_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}.fits", job.id));
        let mut request = SolveRequest::new(image, filename).with_options(options);

        match self.storage.access_url(&job.storage_key).await {
            Ok(url) => request = request.with_source_url(url),
            Err(e) => debug!(job_id = %job.id, error = %e, "No access URL for source file"),
        }

        debug!(
            job_id = %job.id,
            solver = self.solver.name(),
            size_mb = request.size_mb(),
            "Submitting plate solve"
        );
        Ok(self.solver.solve(request).await)
    }

    fn advance(&self, job_id: &str, status: JobStatus, timer: &mut StageTimer) -> StageResult<()> {
        timer.switch(status);
        let job = self
            .jobs
            .set_status(job_id, status)
            .map_err(|e| PipelineFailure::from_job_error(e, status))?;
        debug!(job_id = %job_id, status = %status, "Stage started");
        self.publish(&job);
        Ok(())
    }

    /// Write a failure to the job.
    fn fail(&self, job_id: &str, failure: &JobFailure, started: Instant) {
        match self.jobs.mark_failed(job_id, failure) {
            Ok(job) => {
                error!(
                    job_id = %job_id,
                    kind = failure.kind.as_str(),
                    stage = %failure.stage,
                    error = %failure.message,
                    "Job failed"
                );
                self.record_finished(&job, started);
                self.publish(&job);
            }
            Err(e) => error!(job_id = %job_id, error = %e, "Failed to record job failure"),
        }
    }

    fn ack(&self, job_id: &str) {
        if let Err(e) = self.queue.ack(job_id) {
            error!(job_id = %job_id, error = %e, "Failed to acknowledge queue entry");
        }
    }

    pub(crate) fn publish(&self, job: &ProcessingJob) {
        // No subscribers is fine.
        let _ = self.progress.send(JobProgress::new(&job.id, job.status));
    }

    fn record_finished(&self, job: &ProcessingJob, started: Instant) {
        let outcome = match job.status {
            JobStatus::Completed => "completed",
            JobStatus::NeedsTarget => "needs_target",
            JobStatus::Failed => "failed",
            _ => return,
        };
        metrics::JOBS_FINISHED.with_label_values(&[outcome]).inc();
        metrics::JOB_DURATION
            .with_label_values(&[outcome])
            .observe(started.elapsed().as_secs_f64());
    }
}

/// Resolve the source format and the lowercase extension used for the
/// temp file name.
fn classify(job: &ProcessingJob) -> StageResult<(ImageFormat, String)> {
    let extension = Path::new(&job.original_filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);

    match (ImageFormat::from_filename(&job.original_filename), extension) {
        (Some(format), Some(extension)) => Ok((format, extension)),
        (_, extension) => Err(PipelineFailure::Fatal(
            JobFailure::new(
                ErrorKind::UnsupportedFormat,
                JobStatus::Pending,
                format!("Unsupported file format: {}", job.original_filename),
            )
            .with_field("extension", extension.unwrap_or_default()),
        )),
    }
}

fn storage_failure(error: StorageError, key: &str) -> PipelineFailure {
    let failure = JobFailure::new(
        ErrorKind::StorageFailure,
        JobStatus::Pending,
        format!("Failed to download source file: {}", error),
    )
    .with_field("storage_key", key);
    if error.is_retryable() {
        PipelineFailure::Retryable(failure)
    } else {
        PipelineFailure::Fatal(failure)
    }
}

fn dimension(value: Option<i64>) -> Option<u32> {
    value.filter(|v| *v > 0).and_then(|v| u32::try_from(v).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::CreateJobRequest;

    fn job_named(filename: &str) -> ProcessingJob {
        let store = crate::job::SqliteJobStore::in_memory().unwrap();
        store
            .create(CreateJobRequest::new("user-1", format!("uploads/{filename}"), filename))
            .unwrap()
    }

    #[test]
    fn test_classify_keeps_lowercase_extension() {
        let (format, extension) = classify(&job_named("Light_001.CR2")).unwrap();
        assert_eq!(format, ImageFormat::Raw);
        assert_eq!(extension, "cr2");
    }

    #[test]
    fn test_classify_rejects_unknown_extension() {
        match classify(&job_named("notes.txt")) {
            Err(PipelineFailure::Fatal(failure)) => {
                assert_eq!(failure.kind, ErrorKind::UnsupportedFormat);
                assert_eq!(failure.fields["extension"], "txt");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            classify(&job_named("no_extension")),
            Err(PipelineFailure::Fatal(_))
        ));
    }

    #[test]
    fn test_storage_failure_classification() {
        let missing = storage_failure(
            StorageError::NotFound {
                key: "uploads/a.fits".into(),
            },
            "uploads/a.fits",
        );
        assert!(matches!(missing, PipelineFailure::Fatal(_)));

        let network = storage_failure(StorageError::Network("reset".into()), "uploads/a.fits");
        assert!(matches!(network, PipelineFailure::Retryable(_)));
    }

    #[test]
    fn test_dimension_rejects_non_positive() {
        assert_eq!(dimension(Some(4096)), Some(4096));
        assert_eq!(dimension(Some(0)), None);
        assert_eq!(dimension(None), None);
    }
}
