use super::AppState;
use crate::error::AppError;
use axum::{
    extract::{Path, State},
    response::Json,
};
use runbox_runner::{list_files, WorkspaceFile};

/// List every file in a workspace, paths relative to its root.
pub async fn list_workspace_files(
    Path(workspace_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Vec<WorkspaceFile>>, AppError> {
    let root = state.registry.workspaces().root(&workspace_id).await?;
    Ok(Json(list_files(&root).await?))
}
