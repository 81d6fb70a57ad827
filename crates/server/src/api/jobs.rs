//! Processing job API handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use skyingest_core::{CreateJobRequest, JobFilter, JobOutcome, JobStatus, ProcessingJob};

use super::error::{api_error, job_error, worker_error, ApiError};
use crate::state::AppState;

/// Maximum allowed limit for job queries
const MAX_LIMIT: i64 = 1000;

/// Default limit for job queries
const DEFAULT_LIMIT: i64 = 100;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for creating a job
#[derive(Debug, Deserialize)]
pub struct CreateJobBody {
    pub user_id: String,
    /// Key of the already uploaded file in object storage
    pub storage_key: String,
    pub original_filename: String,
}

/// Query parameters for listing jobs
#[derive(Debug, Deserialize)]
pub struct ListJobsParams {
    pub status: Option<String>,
    pub user_id: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Request body for manual target assignment
#[derive(Debug, Deserialize)]
pub struct AssignTargetBody {
    pub target_id: String,
}

/// A job with its derived progress and outcome
#[derive(Debug, Serialize)]
pub struct JobResponse {
    #[serde(flatten)]
    pub job: ProcessingJob,
    pub progress_percent: u8,
    /// Sexagesimal rendering of the recorded position
    pub position: Option<String>,
    pub outcome: Option<JobOutcome>,
}

impl From<ProcessingJob> for JobResponse {
    fn from(job: ProcessingJob) -> Self {
        Self {
            progress_percent: job.progress_percent(),
            position: job.position().map(|p| p.to_string()),
            outcome: job.outcome(),
            job,
        }
    }
}

/// Response for listing jobs
#[derive(Debug, Serialize)]
pub struct ListJobsResponse {
    pub jobs: Vec<JobResponse>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

// ============================================================================
// Handlers
// ============================================================================

/// Create a job for an uploaded file and queue it
pub async fn create_job(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateJobBody>,
) -> Result<(StatusCode, Json<JobResponse>), ApiError> {
    for (field, value) in [
        ("user_id", &body.user_id),
        ("storage_key", &body.storage_key),
        ("original_filename", &body.original_filename),
    ] {
        if value.trim().is_empty() {
            return Err(api_error(
                StatusCode::BAD_REQUEST,
                format!("{field} must not be empty"),
            ));
        }
    }

    let request = CreateJobRequest::new(body.user_id, body.storage_key, body.original_filename);
    let job = state.worker().submit(request).map_err(worker_error)?;
    Ok((StatusCode::CREATED, Json(JobResponse::from(job))))
}

/// Get a job by ID
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobResponse>, ApiError> {
    match state.job_store().get(&id).map_err(job_error)? {
        Some(job) => Ok(Json(JobResponse::from(job))),
        None => Err(api_error(
            StatusCode::NOT_FOUND,
            format!("Job not found: {id}"),
        )),
    }
}

/// List jobs with optional filters
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListJobsParams>,
) -> Result<Json<ListJobsResponse>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    let mut filter = JobFilter::new().with_limit(limit).with_offset(offset);

    if let Some(ref status) = params.status {
        let status = JobStatus::parse(status).ok_or_else(|| {
            api_error(
                StatusCode::BAD_REQUEST,
                format!("Unknown job status: {status}"),
            )
        })?;
        filter = filter.with_status(status);
    }

    if let Some(ref user_id) = params.user_id {
        filter = filter.with_user_id(user_id);
    }

    let jobs = state.job_store().list(&filter).map_err(job_error)?;

    // Total without pagination
    let count_filter = JobFilter {
        limit: i64::MAX,
        offset: 0,
        ..filter.clone()
    };
    let total = state.job_store().count(&count_filter).map_err(job_error)?;

    Ok(Json(ListJobsResponse {
        jobs: jobs.into_iter().map(JobResponse::from).collect(),
        total,
        limit,
        offset,
    }))
}

/// Delete a job. A queued entry for it is dropped when next delivered.
pub async fn delete_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobResponse>, ApiError> {
    let job = state.job_store().delete(&id).map_err(job_error)?;
    info!(job_id = %job.id, status = %job.status, "Job deleted");
    Ok(Json(JobResponse::from(job)))
}

/// Re-run a failed job from the start
pub async fn retry_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobResponse>, ApiError> {
    let job = state.worker().retry(&id).map_err(worker_error)?;
    Ok(Json(JobResponse::from(job)))
}

/// Complete a job with an operator-chosen target
pub async fn assign_target(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<AssignTargetBody>,
) -> Result<Json<JobResponse>, ApiError> {
    if body.target_id.trim().is_empty() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "target_id must not be empty",
        ));
    }
    let job = state
        .worker()
        .assign_target(&id, &body.target_id)
        .map_err(worker_error)?;
    Ok(Json(JobResponse::from(job)))
}
