// ABOUTME: Router-level tests for the HTTP API
// ABOUTME: Shared helpers build an app over temp workspaces and a scripted container runtime

mod api_tests;
mod health_tests;
mod preview_tests;

use crate::api::{create_router, AppState};
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use runbox_runner::{DirectoryWorkspaceStore, RunnerConfig, ScriptedRuntime, SessionRegistry};
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

pub(crate) struct TestApp {
    pub router: Router,
    pub registry: SessionRegistry,
    pub runtime: Arc<ScriptedRuntime>,
    pub base: TempDir,
}

impl TestApp {
    pub fn new() -> Self {
        let base = TempDir::new().unwrap();
        let config = RunnerConfig {
            workspaces_path: base.path().to_path_buf(),
            port_range: 9100..=9109,
            probe_host_ports: false,
            ..RunnerConfig::default()
        };
        let runtime = Arc::new(ScriptedRuntime::new());
        let registry = SessionRegistry::new(
            config,
            Arc::new(DirectoryWorkspaceStore::new(base.path())),
            runtime.clone(),
        );
        let router = create_router(AppState::new(registry.clone()));
        Self {
            router,
            registry,
            runtime,
            base,
        }
    }

    pub fn workspace(&self, id: &str, files: &[(&str, &str)]) {
        let root = self.base.path().join(id);
        std::fs::create_dir_all(&root).unwrap();
        for (name, content) in files {
            let path = root.join(name);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(path, content).unwrap();
        }
    }

    pub async fn send(&self, request: Request<Body>) -> axum::response::Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, uri: &str) -> axum::response::Response {
        self.send(Request::get(uri).body(Body::empty()).unwrap())
            .await
    }

    pub async fn json(&self, method: &str, uri: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = self.send(request).await;
        let status = response.status();
        (status, body_json(response).await)
    }

    pub async fn get_json(&self, uri: &str) -> (StatusCode, Value) {
        let response = self.get(uri).await;
        let status = response.status();
        (status, body_json(response).await)
    }
}

pub(crate) async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

pub(crate) async fn body_json(response: axum::response::Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}
