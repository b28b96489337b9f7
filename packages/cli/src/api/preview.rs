// ABOUTME: Static preview routes serving workspace files over HTTP
// ABOUTME: Applies the workspace network profile before serving; path problems are plain 404s

use super::AppState;
use crate::error::AppError;
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use tracing::debug;

pub async fn serve_index(
    Path(workspace_id): Path<String>,
    State(state): State<AppState>,
) -> Response {
    serve(&state, &workspace_id, "").await
}

pub async fn serve_file(
    Path((workspace_id, path)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Response {
    serve(&state, &workspace_id, &path).await
}

async fn serve(state: &AppState, workspace_id: &str, path: &str) -> Response {
    let profile = state.registry.network().effective(workspace_id);
    if !profile.is_noop() {
        if profile.latency_ms > 0 {
            tokio::time::sleep(profile.latency()).await;
        }
        if profile.should_fail(rand::random::<f64>()) {
            debug!("Simulated network failure for {}/{}", workspace_id, path);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "ok": false, "error": "Simulated network failure" })),
            )
                .into_response();
        }
    }

    match state.preview.serve(workspace_id, path).await {
        Ok(content) => (
            [
                (header::CONTENT_TYPE, content.content_type),
                (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
            ],
            content.bytes,
        )
            .into_response(),
        Err(e) if e.status_code() == 404 => {
            debug!("Preview miss for {}/{}: {}", workspace_id, path, e);
            (StatusCode::NOT_FOUND, "Not found").into_response()
        }
        Err(e) => AppError::from(e).into_response(),
    }
}
