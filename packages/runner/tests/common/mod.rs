// ABOUTME: Shared helpers for runner integration tests
// ABOUTME: Builds a registry over temp workspaces and a scripted container runtime

#![allow(dead_code)]

use runbox_runner::{
    DirectoryWorkspaceStore, ExecutionState, LogEvent, LogSubscription, RunnerConfig,
    ScriptedRuntime, SessionRegistry, WorkspaceStatus,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub struct Harness {
    pub registry: SessionRegistry,
    pub runtime: Arc<ScriptedRuntime>,
    pub base: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(configure: impl FnOnce(&mut RunnerConfig)) -> Self {
        let base = TempDir::new().unwrap();
        let mut config = RunnerConfig {
            workspaces_path: base.path().to_path_buf(),
            port_range: 9100..=9109,
            probe_host_ports: false,
            ..RunnerConfig::default()
        };
        configure(&mut config);

        let runtime = Arc::new(ScriptedRuntime::new());
        let registry = SessionRegistry::new(
            config,
            Arc::new(DirectoryWorkspaceStore::new(base.path())),
            runtime.clone(),
        );
        Self {
            registry,
            runtime,
            base,
        }
    }

    /// Create a workspace directory holding `files`.
    pub fn workspace(&self, id: &str, files: &[(&str, &str)]) -> PathBuf {
        let root = self.base.path().join(id);
        std::fs::create_dir_all(&root).unwrap();
        for (name, content) in files {
            let path = root.join(name);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(path, content).unwrap();
        }
        root
    }
}

/// Poll until the workspace reaches `state`.
pub async fn wait_for_state(
    registry: &SessionRegistry,
    workspace_id: &str,
    state: ExecutionState,
) -> WorkspaceStatus {
    for _ in 0..200 {
        let status = registry.status(workspace_id).await.unwrap();
        if status.state == state {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("workspace {} never reached {}", workspace_id, state);
}

/// Everything already delivered to a subscription.
pub fn drain(subscription: &mut LogSubscription) -> Vec<LogEvent> {
    let mut events = Vec::new();
    while let Some(event) = subscription.try_recv() {
        events.push(event);
    }
    events
}
