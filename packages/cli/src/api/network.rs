// ABOUTME: Per-workspace network profile endpoints
// ABOUTME: Read the effective profile, replace it, or fall back to the process default

use super::AppState;
use crate::error::AppError;
use axum::{
    extract::{Path, State},
    response::Json,
};
use runbox_runner::{validation::validate_workspace_id, NetworkProfile};
use serde::Serialize;
use tracing::info;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileResponse {
    pub workspace_id: String,
    pub profile: NetworkProfile,
    /// False when the process default applies.
    pub custom: bool,
}

fn describe(state: &AppState, workspace_id: String) -> ProfileResponse {
    let network = state.registry.network();
    ProfileResponse {
        custom: network.get(&workspace_id).is_some(),
        profile: network.effective(&workspace_id),
        workspace_id,
    }
}

pub async fn get_profile(
    Path(workspace_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<ProfileResponse>, AppError> {
    validate_workspace_id(&workspace_id)?;
    Ok(Json(describe(&state, workspace_id)))
}

pub async fn set_profile(
    Path(workspace_id): Path<String>,
    State(state): State<AppState>,
    Json(profile): Json<NetworkProfile>,
) -> Result<Json<ProfileResponse>, AppError> {
    validate_workspace_id(&workspace_id)?;
    state.registry.network().set(&workspace_id, profile)?;
    info!(
        "Network profile for {}: {}ms latency, {} failure rate",
        workspace_id, profile.latency_ms, profile.failure_rate
    );
    Ok(Json(describe(&state, workspace_id)))
}

pub async fn clear_profile(
    Path(workspace_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<ProfileResponse>, AppError> {
    validate_workspace_id(&workspace_id)?;
    if state.registry.network().clear(&workspace_id).is_some() {
        info!("Network profile for {} cleared", workspace_id);
    }
    Ok(Json(describe(&state, workspace_id)))
}
