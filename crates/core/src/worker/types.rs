//! Types for the pipeline worker.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::CatalogError;
use crate::job::{JobError, JobFailure, JobStatus};
use crate::queue::QueueError;

/// Errors returned by worker operations.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Job store error.
    #[error("job store error: {0}")]
    Job(#[from] JobError),

    /// Work queue error.
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// Catalog error.
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Target not found in the catalog.
    #[error("target not found: {0}")]
    TargetNotFound(String),
}

/// Progress event sent on every status change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    pub job_id: String,
    pub status: JobStatus,
    pub percent: u8,
}

impl JobProgress {
    pub fn new(job_id: impl Into<String>, status: JobStatus) -> Self {
        Self {
            job_id: job_id.into(),
            status,
            percent: status.progress_percent(),
        }
    }
}

/// Current state of the worker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerStatus {
    /// Whether the dispatch loop is running.
    pub running: bool,
    /// Concurrency ceiling.
    pub concurrency: usize,
    /// Jobs currently being processed.
    pub active_jobs: usize,
    /// Entries in the work queue, leased or not.
    pub queue_depth: usize,
    /// Job counts keyed by status.
    pub jobs_by_status: Vec<(JobStatus, i64)>,
}

/// Why a pipeline run stopped before a terminal status.
#[derive(Debug, Clone)]
pub(crate) enum PipelineFailure {
    /// Write the failure to the job now; redelivery cannot help.
    Fatal(JobFailure),
    /// Worth another queue delivery while attempts remain.
    Retryable(JobFailure),
    /// The job vanished or another actor moved it; drop the delivery.
    Aborted(String),
}

impl PipelineFailure {
    pub(crate) fn from_job_error(error: JobError, stage: JobStatus) -> Self {
        match error {
            JobError::NotFound(_) | JobError::InvalidState { .. } => {
                Self::Aborted(error.to_string())
            }
            JobError::Database(message) => Self::Retryable(JobFailure::new(
                crate::job::ErrorKind::StorageFailure,
                stage,
                format!("Job store error: {}", message),
            )),
        }
    }

    pub(crate) fn from_catalog_error(error: CatalogError, stage: JobStatus) -> Self {
        Self::Retryable(JobFailure::new(
            crate::job::ErrorKind::StorageFailure,
            stage,
            format!("Catalog error: {}", error),
        ))
    }
}
