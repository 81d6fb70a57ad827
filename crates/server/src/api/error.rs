//! Error responses shared by the API handlers.

use axum::{http::StatusCode, Json};
use serde::Serialize;
use skyingest_core::{CatalogError, JobError, WorkerError};

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// What a failing handler returns.
pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

pub fn job_error(error: JobError) -> ApiError {
    match error {
        JobError::NotFound(id) => api_error(StatusCode::NOT_FOUND, format!("Job not found: {id}")),
        e @ JobError::InvalidState { .. } => api_error(StatusCode::CONFLICT, e.to_string()),
        e @ JobError::Database(_) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

pub fn catalog_error(error: CatalogError) -> ApiError {
    match error {
        e @ CatalogError::InvalidTarget(_) => api_error(StatusCode::BAD_REQUEST, e.to_string()),
        e @ CatalogError::NotFound(_) => api_error(StatusCode::NOT_FOUND, e.to_string()),
        e @ CatalogError::Database(_) => {
            api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

pub fn worker_error(error: WorkerError) -> ApiError {
    match error {
        WorkerError::Job(e) => job_error(e),
        WorkerError::Catalog(e) => catalog_error(e),
        WorkerError::TargetNotFound(id) => {
            api_error(StatusCode::NOT_FOUND, format!("Target not found: {id}"))
        }
        e @ WorkerError::Queue(_) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}
