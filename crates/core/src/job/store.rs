//! Job storage trait and errors.

use thiserror::Error;

use super::{
    CreateJobRequest, ExtractedFields, JobCompletion, JobFailure, JobFilter, JobStatus,
    ProcessingJob,
};
use crate::solver::Calibration;

/// Error type for job operations.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Cannot {operation} job {job_id}: current status is {current}")]
    InvalidState {
        job_id: String,
        current: JobStatus,
        operation: String,
    },

    #[error("Database error: {0}")]
    Database(String),
}

impl JobError {
    pub(crate) fn invalid_state(job: &ProcessingJob, operation: &str) -> Self {
        Self::InvalidState {
            job_id: job.id.clone(),
            current: job.status,
            operation: operation.to_string(),
        }
    }
}

/// Trait for job storage backends.
///
/// Every mutation checks the current status first; a job that has left the
/// pipeline can only be changed by `retry`, `complete_manually` or `delete`.
pub trait JobStore: Send + Sync {
    /// Create a new job in `PENDING`.
    fn create(&self, request: CreateJobRequest) -> Result<ProcessingJob, JobError>;

    /// Get a job by ID.
    fn get(&self, id: &str) -> Result<Option<ProcessingJob>, JobError>;

    /// List jobs matching the filter, newest first.
    fn list(&self, filter: &JobFilter) -> Result<Vec<ProcessingJob>, JobError>;

    /// Count jobs matching the filter.
    fn count(&self, filter: &JobFilter) -> Result<i64, JobError>;

    /// Number of jobs per status. Statuses with no jobs are included as zero.
    fn count_by_status(&self) -> Result<Vec<(JobStatus, i64)>, JobError>;

    /// Put a redelivered job back to `PENDING`, clearing partial results.
    /// A job already `PENDING` is returned unchanged.
    fn restart(&self, id: &str) -> Result<ProcessingJob, JobError>;

    /// Advance to an in-flight stage. Never moves backwards.
    fn set_status(&self, id: &str, status: JobStatus) -> Result<ProcessingJob, JobError>;

    /// Store extracted metadata.
    fn record_extraction(
        &self,
        id: &str,
        fields: ExtractedFields,
    ) -> Result<ProcessingJob, JobError>;

    /// Store a plate-solve result and its centre as the job's coordinates.
    fn record_calibration(
        &self,
        id: &str,
        calibration: &Calibration,
    ) -> Result<ProcessingJob, JobError>;

    /// Finish the job with a target match.
    fn complete(&self, id: &str, completion: JobCompletion) -> Result<ProcessingJob, JobError>;

    /// Finish the job without a match.
    fn mark_needs_target(&self, id: &str) -> Result<ProcessingJob, JobError>;

    /// Finish the job with an error.
    fn mark_failed(&self, id: &str, failure: &JobFailure) -> Result<ProcessingJob, JobError>;

    /// Operator retry: `FAILED` back to `PENDING` with results and errors cleared.
    fn retry(&self, id: &str) -> Result<ProcessingJob, JobError>;

    /// Operator assignment from `NEEDS_TARGET` or `FAILED` straight to `COMPLETED`.
    fn complete_manually(
        &self,
        id: &str,
        target_id: &str,
        image_record_id: &str,
    ) -> Result<ProcessingJob, JobError>;

    /// Permanently delete a job. Returns the deleted job.
    fn delete(&self, id: &str) -> Result<ProcessingJob, JobError>;

    /// Jobs the pipeline has not finished, oldest first.
    fn list_unfinished(&self) -> Result<Vec<ProcessingJob>, JobError>;
}
