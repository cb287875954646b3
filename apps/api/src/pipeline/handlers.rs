//! Axum route handlers for the Runs API.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::run::{RunConfig, RunState, RunStatus};
use crate::state::AppState;
use crate::store::RunFilter;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRunResponse {
    pub run_id: Uuid,
    pub status: RunStatus,
}

/// POST /api/v1/runs
///
/// Runs the pipeline to completion before responding. The body is parsed by
/// hand so that shape errors surface as `INVALID_CONFIG`.
pub async fn handle_create_run(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<CreateRunResponse>), AppError> {
    let config = RunConfig::from_json(body)?;
    let run = state.orchestrator.create_run(config).await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateRunResponse {
            run_id: run.id,
            status: run.status,
        }),
    ))
}

/// GET /api/v1/runs
pub async fn handle_list_runs(
    State(state): State<AppState>,
    Query(filter): Query<RunFilter>,
) -> Result<Json<Vec<RunState>>, AppError> {
    Ok(Json(state.orchestrator.list_runs(&filter).await?))
}

/// GET /api/v1/runs/:id
pub async fn handle_get_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RunState>, AppError> {
    Ok(Json(state.orchestrator.get_run(id).await?))
}
