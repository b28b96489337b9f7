use super::AppState;
use crate::error::AppError;
use axum::{extract::State, response::Json};
use serde_json::{json, Value};
use std::time::{SystemTime, UNIX_EPOCH};

fn unix_timestamp() -> Result<u64, AppError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|e| AppError::Internal(format!("system clock before unix epoch: {}", e)))
}

pub async fn health_check() -> Result<Json<Value>, AppError> {
    Ok(Json(json!({
        "status": "healthy",
        "timestamp": unix_timestamp()?,
        "version": env!("CARGO_PKG_VERSION"),
        "service": "runbox"
    })))
}

/// Health plus runner details: container runtime and live executions.
pub async fn status_check(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let active = state.registry.active_executions().await;
    let config = state.registry.config();

    Ok(Json(json!({
        "status": "healthy",
        "timestamp": unix_timestamp()?,
        "version": env!("CARGO_PKG_VERSION"),
        "service": "runbox",
        "runner": {
            "version": runbox_runner::VERSION,
            "containerRuntime": state.registry.container_runtime(),
            "jsStrategy": config.js_strategy,
            "activeExecutions": active.len(),
            "leasedPorts": state.registry.ports().leased_count(),
        }
    })))
}
