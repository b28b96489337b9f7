//! Runbox Runner - on-demand execution and live preview of workspace code
//!
//! A run request is dispatched by file extension to one of three strategies:
//! static preview, an embedded script sandbox, or an isolated container. The
//! [`SessionRegistry`] owns the single active execution of every workspace,
//! and the [`LogRelay`] fans execution output out to subscribers.

pub mod config;
pub mod container;
pub mod env;
pub mod error;
pub mod network;
pub mod paths;
pub mod ports;
pub mod preview;
pub mod registry;
pub mod relay;
pub mod sandbox;
pub mod strategy;
pub mod types;
pub mod validation;
pub mod workspace;

// Re-export key types and functions for easier use
pub use config::{JsStrategy, ResourceCeiling, RunnerConfig};
pub use container::{
    ContainerRuntime, DockerRuntime, RuntimeError, RuntimeKind, ScriptedRuntime, UnavailableRuntime,
};
pub use error::{RunnerError, RunnerResult};
pub use network::{NetworkProfile, NetworkProfiles};
pub use ports::{PortLease, PortPool};
pub use preview::{PreviewContent, PreviewServer};
pub use registry::SessionRegistry;
pub use relay::{EventEmitter, LogRelay, LogSubscription};
pub use sandbox::{SandboxExecutor, SandboxOutcome};
pub use strategy::{Dispatch, StrategyTable};
pub use types::{
    ExecutionSnapshot, ExecutionState, Lifecycle, LogEvent, LogLevel, RunMode,
    RunOptions, RunOutcome, StopResult, Strategy, StreamKind, WorkspaceStatus,
};
pub use workspace::{list_files, DirectoryWorkspaceStore, WorkspaceFile, WorkspaceStore};

use std::sync::Arc;
use tracing::{info, warn};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Connect to the local Docker daemon, or fall back to a runtime that refuses
/// container launches when it cannot be reached.
pub async fn connect_container_runtime() -> Arc<dyn ContainerRuntime> {
    let docker = match DockerRuntime::connect() {
        Ok(docker) => docker,
        Err(e) => {
            warn!("Docker is not available, container runs are disabled: {}", e);
            return Arc::new(UnavailableRuntime::new(e.to_string()));
        }
    };
    match docker.ping().await {
        Ok(()) => {
            info!("Connected to Docker");
            Arc::new(docker)
        }
        Err(e) => {
            warn!("Docker is not responding, container runs are disabled: {}", e);
            Arc::new(UnavailableRuntime::new(e.to_string()))
        }
    }
}

/// Initialize the runner service.
///
/// Creates the workspace base directory if needed, connects the container
/// runtime and starts a [`SessionRegistry`] with its deadline reaper.
///
/// # Examples
///
/// ```no_run
/// use runbox_runner::{init, RunnerConfig, RunOptions};
///
/// #[tokio::main]
/// async fn main() {
///     let registry = init(RunnerConfig::from_env()).await.expect("Failed to initialize runner");
///     let outcome = registry.run("demo", "index.html", RunOptions::default()).await;
///     println!("{:?}", outcome);
///     registry.shutdown().await;
/// }
/// ```
pub async fn init(config: RunnerConfig) -> RunnerResult<SessionRegistry> {
    tokio::fs::create_dir_all(&config.workspaces_path).await?;
    let workspaces: Arc<dyn WorkspaceStore> =
        Arc::new(DirectoryWorkspaceStore::new(config.workspaces_path.clone()));
    let runtime = connect_container_runtime().await;

    info!(
        "Runner ready: workspaces at {}, js strategy {:?}, ports {}-{}, container runtime {}",
        config.workspaces_path.display(),
        config.js_strategy,
        config.port_range.start(),
        config.port_range.end(),
        runtime.name()
    );
    Ok(SessionRegistry::start(config, workspaces, runtime))
}
