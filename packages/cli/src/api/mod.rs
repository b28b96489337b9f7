use axum::{
    routing::{get, post},
    Router,
};
use runbox_runner::{PreviewServer, SessionRegistry};
use std::sync::Arc;

pub mod events;
pub mod files;
pub mod health;
pub mod network;
pub mod preview;
pub mod runs;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub registry: SessionRegistry,
    pub preview: PreviewServer,
}

impl AppState {
    pub fn new(registry: SessionRegistry) -> Self {
        let preview = PreviewServer::new(Arc::clone(registry.workspaces()));
        Self { registry, preview }
    }
}

pub fn create_router(state: AppState) -> Router {
    let workspace_routes = Router::new()
        .route("/run", post(runs::run))
        .route("/stop", post(runs::stop))
        .route("/status", get(runs::status))
        .route("/output", get(runs::output))
        .route("/events", get(events::stream_events))
        .route("/files", get(files::list_workspace_files))
        .route(
            "/network",
            get(network::get_profile)
                .put(network::set_profile)
                .delete(network::clear_profile),
        );

    Router::new()
        .route("/api/health", get(health::health_check))
        .route("/api/status", get(health::status_check))
        .route("/api/executions", get(runs::active_executions))
        .nest("/api/workspaces/{workspace_id}", workspace_routes)
        .route("/preview/{workspace_id}", get(preview::serve_index))
        .route("/preview/{workspace_id}/{*path}", get(preview::serve_file))
        .with_state(state)
}
