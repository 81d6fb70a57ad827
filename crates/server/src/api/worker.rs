//! Worker and solver status handlers.

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use skyingest_core::solver::SolverHealth;

use super::error::{api_error, ApiError};
use crate::state::AppState;

/// Worker status response
#[derive(Debug, Serialize)]
pub struct WorkerStatusResponse {
    pub running: bool,
    pub concurrency: usize,
    pub active_jobs: usize,
    pub queue_depth: usize,
    pub jobs_by_status: BTreeMap<String, i64>,
}

/// Solver health response
#[derive(Debug, Serialize)]
pub struct SolverHealthResponse {
    pub solver: String,
    #[serde(flatten)]
    pub health: SolverHealth,
}

/// Get pipeline worker status
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<WorkerStatusResponse> {
    let status = state.worker().status().await;
    Json(WorkerStatusResponse {
        running: status.running,
        concurrency: status.concurrency,
        active_jobs: status.active_jobs,
        queue_depth: status.queue_depth,
        jobs_by_status: status
            .jobs_by_status
            .into_iter()
            .map(|(s, n)| (s.as_str().to_string(), n))
            .collect(),
    })
}

/// Probe the configured plate solver. Unhealthy answers are 503.
pub async fn solver_health(
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<SolverHealthResponse>), ApiError> {
    let solver = state.solver();
    let health = solver.health().await.map_err(|e| {
        api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            format!("Solver {} unreachable: {e}", solver.name()),
        )
    })?;

    let status = if health.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    Ok((
        status,
        Json(SolverHealthResponse {
            solver: solver.name().to_string(),
            health,
        }),
    ))
}
