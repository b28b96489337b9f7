// ABOUTME: Run, stop, status and output endpoints backed by the session registry
// ABOUTME: Run requests carry the entry file plus optional limits in one camelCase body

use super::AppState;
use crate::error::AppError;
use axum::{
    extract::{Path, State},
    response::Json,
};
use runbox_runner::{ExecutionSnapshot, RunOptions, RunOutcome, StopResult, WorkspaceStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

/// Body of `POST /api/workspaces/{workspace_id}/run`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    /// Entry file relative to the workspace root; empty runs `index.html`.
    #[serde(default)]
    pub file: String,
    #[serde(flatten)]
    pub options: RunOptions,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputResponse {
    pub workspace_id: String,
    pub output: String,
}

pub async fn run(
    Path(workspace_id): Path<String>,
    State(state): State<AppState>,
    Json(request): Json<RunRequest>,
) -> Result<Json<Value>, AppError> {
    info!("Run requested for {}/{}", workspace_id, request.file);

    let outcome = state
        .registry
        .run(&workspace_id, &request.file, request.options)
        .await?;

    Ok(Json(run_response(&outcome)?))
}

/// The outcome's JSON with a top-level `success` flag for every strategy.
pub fn run_response(outcome: &RunOutcome) -> Result<Value, AppError> {
    let mut value = serde_json::to_value(outcome)
        .map_err(|e| AppError::Internal(format!("failed to encode run outcome: {}", e)))?;
    if let Value::Object(map) = &mut value {
        map.insert("success".to_string(), Value::Bool(outcome.success()));
    }
    Ok(value)
}

pub async fn stop(
    Path(workspace_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<StopResult>, AppError> {
    Ok(Json(state.registry.stop(&workspace_id).await?))
}

pub async fn status(
    Path(workspace_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<WorkspaceStatus>, AppError> {
    Ok(Json(state.registry.status(&workspace_id).await?))
}

pub async fn output(
    Path(workspace_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<OutputResponse>, AppError> {
    let output = state.registry.output(&workspace_id).await?;
    Ok(Json(OutputResponse {
        workspace_id,
        output,
    }))
}

pub async fn active_executions(State(state): State<AppState>) -> Json<Vec<ExecutionSnapshot>> {
    Json(state.registry.active_executions().await)
}
