//! Catalog target API handlers.
//!
//! Targets are seeded by operators; the pipeline only reads them.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use tracing::info;
use skyingest_core::catalog::NewTarget;
use skyingest_core::Target;

use super::error::{api_error, catalog_error, ApiError};
use crate::state::AppState;

/// Add a target to the catalog
pub async fn create_target(
    State(state): State<Arc<AppState>>,
    Json(body): Json<NewTarget>,
) -> Result<(StatusCode, Json<Target>), ApiError> {
    let target = state.catalog().insert_target(body).map_err(catalog_error)?;
    info!(target_id = %target.id, name = %target.name, "Target added");
    Ok((StatusCode::CREATED, Json(target)))
}

/// Get a target by ID
pub async fn get_target(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Target>, ApiError> {
    state
        .catalog()
        .get_target(&id)
        .map_err(catalog_error)?
        .map(Json)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("Target not found: {id}")))
}
