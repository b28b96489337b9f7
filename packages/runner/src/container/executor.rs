// ABOUTME: Container executor launching runtime images against a workspace
// ABOUTME: Owns port leases and the log-follow task of every container it started

use super::{
    ContainerRuntime, ContainerSpec, PortMapping, RuntimeImage, RuntimeKind, VolumeMount,
};
use crate::config::{ResourceCeiling, RunnerConfig};
use crate::error::{RunnerError, RunnerResult};
use crate::network::NetworkProfiles;
use crate::ports::PortPool;
use crate::relay::EventEmitter;
use crate::types::{RunMode, RunOptions};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Inputs for one container launch.
#[derive(Debug, Clone)]
pub struct LaunchRequest<'a> {
    pub execution_id: Uuid,
    pub workspace_id: &'a str,
    /// Canonical workspace root, mounted into the container.
    pub root: &'a Path,
    /// Entry file relative to the root, already normalized.
    pub entry_file: &'a str,
    pub runtime: RuntimeKind,
    pub options: &'a RunOptions,
}

/// How a container process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerExit {
    pub code: Option<i64>,
    pub error: Option<String>,
}

impl ContainerExit {
    pub fn is_success(&self) -> bool {
        self.code == Some(0)
    }
}

/// A container that reached the running state.
#[derive(Debug)]
pub struct LaunchedContainer {
    pub execution_id: Uuid,
    pub container_id: String,
    pub port: u16,
    pub preview_url: String,
    pub limits: ResourceCeiling,
    /// Resolves after the last output line once the process exits. Closed
    /// without a value when the executor terminates the container first.
    pub exit: oneshot::Receiver<ContainerExit>,
}

struct ActiveContainer {
    container_id: String,
    port: u16,
    monitor: JoinHandle<()>,
}

/// Returns a port to the pool when dropped unless disarmed.
struct LeaseGuard<'a> {
    ports: &'a PortPool,
    port: u16,
    armed: bool,
}

impl<'a> LeaseGuard<'a> {
    fn new(ports: &'a PortPool, port: u16) -> Self {
        Self {
            ports,
            port,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for LeaseGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.ports.release(self.port);
        }
    }
}

pub struct ContainerExecutor {
    runtime: Arc<dyn ContainerRuntime>,
    ports: Arc<PortPool>,
    network: NetworkProfiles,
    shared: ResourceCeiling,
    dedicated: ResourceCeiling,
    preview_host: String,
    stop_timeout: Duration,
    active: Mutex<HashMap<Uuid, ActiveContainer>>,
}

impl ContainerExecutor {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        ports: Arc<PortPool>,
        network: NetworkProfiles,
        config: &RunnerConfig,
    ) -> Self {
        Self {
            runtime,
            ports,
            network,
            shared: config.shared,
            dedicated: config.dedicated,
            preview_host: config.preview_host.clone(),
            stop_timeout: config.stop_grace,
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn runtime_name(&self) -> &'static str {
        self.runtime.name()
    }

    pub fn ports(&self) -> &Arc<PortPool> {
        &self.ports
    }

    pub fn active_count(&self) -> usize {
        let active = self.active.lock().unwrap_or_else(|p| p.into_inner());
        active.len()
    }

    fn ceiling(&self, mode: RunMode) -> ResourceCeiling {
        match mode {
            RunMode::Shared => self.shared,
            RunMode::Dedicated => self.dedicated,
        }
    }

    fn build_spec(
        &self,
        request: &LaunchRequest<'_>,
        image: &RuntimeImage,
        host_port: u16,
        limits: ResourceCeiling,
    ) -> ContainerSpec {
        let network = self.network.effective(request.workspace_id);
        let mut env = image.env();
        env.extend(network.env_vars());

        let execution = request.execution_id.simple().to_string();
        let labels = HashMap::from([
            ("runbox.managed".to_string(), "true".to_string()),
            (
                "runbox.workspace".to_string(),
                request.workspace_id.to_string(),
            ),
            ("runbox.execution".to_string(), execution.clone()),
            ("runbox.entry".to_string(), request.entry_file.to_string()),
        ]);

        ContainerSpec {
            name: format!("runbox-{}-{}", request.workspace_id, &execution[..12]),
            image: image.image.to_string(),
            command: image.command(request.entry_file),
            working_dir: Some(image.working_dir().to_string()),
            env,
            mounts: vec![VolumeMount {
                host_path: request.root.display().to_string(),
                container_path: image.mount_path.to_string(),
                readonly: image.mount.is_read_only(),
            }],
            port: PortMapping {
                host_port,
                container_port: image.container_port,
            },
            cpus: limits.cpus,
            memory_mb: limits.memory_mb,
            labels,
        }
    }

    /// Lease a port, start the container and begin relaying its output.
    ///
    /// Any failure after the lease returns the port before reporting
    /// `LaunchFailed`.
    pub async fn launch(
        &self,
        request: LaunchRequest<'_>,
        emitter: EventEmitter,
    ) -> RunnerResult<LaunchedContainer> {
        let image = RuntimeImage::for_kind(request.runtime);
        let lease = self.ports.acquire(request.execution_id)?;
        let guard = LeaseGuard::new(&self.ports, lease.port);

        let limits = self
            .ceiling(request.options.mode)
            .clamp(request.options.cpu_limit, request.options.memory_limit);
        let spec = self.build_spec(&request, image, lease.port, limits);

        info!(
            "Launching {} for execution {} on port {} ({} CPUs, {} MB)",
            image.image, request.execution_id, lease.port, limits.cpus, limits.memory_mb
        );

        let container_id = self.runtime.launch(&spec).await.map_err(|e| {
            warn!(
                "Container launch for execution {} failed: {}",
                request.execution_id, e
            );
            RunnerError::launch_failed(e.to_string())
        })?;

        let (exit_tx, exit_rx) = oneshot::channel();
        let monitor = tokio::spawn(monitor_container(
            Arc::clone(&self.runtime),
            container_id.clone(),
            emitter,
            exit_tx,
        ));

        {
            let mut active = self.active.lock().unwrap_or_else(|p| p.into_inner());
            active.insert(
                request.execution_id,
                ActiveContainer {
                    container_id: container_id.clone(),
                    port: lease.port,
                    monitor,
                },
            );
        }
        guard.disarm();

        let preview_url = format!(
            "http://{}:{}{}",
            self.preview_host,
            lease.port,
            image.url_path(request.entry_file)
        );

        Ok(LaunchedContainer {
            execution_id: request.execution_id,
            container_id,
            port: lease.port,
            preview_url,
            limits,
            exit: exit_rx,
        })
    }

    /// Stop output relaying, force-stop and remove the container, and return
    /// its port. Idempotent; returns whether anything was running.
    ///
    /// The port is released even when the runtime fails to stop the container.
    pub async fn terminate(&self, execution_id: Uuid) -> bool {
        let entry = {
            let mut active = self.active.lock().unwrap_or_else(|p| p.into_inner());
            active.remove(&execution_id)
        };
        let Some(container) = entry else {
            return false;
        };
        let _lease = LeaseGuard::new(&self.ports, container.port);

        container.monitor.abort();
        debug!(
            "Terminating container {} for execution {}",
            container.container_id, execution_id
        );

        match tokio::time::timeout(self.stop_timeout, self.runtime.kill(&container.container_id))
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Failed to kill container {}: {}", container.container_id, e),
            Err(_) => warn!(
                "Timed out killing container {} after {:?}",
                container.container_id, self.stop_timeout
            ),
        }

        match tokio::time::timeout(
            self.stop_timeout,
            self.runtime.remove(&container.container_id),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(
                "Failed to remove container {}: {}",
                container.container_id, e
            ),
            Err(_) => warn!(
                "Timed out removing container {} after {:?}",
                container.container_id, self.stop_timeout
            ),
        }

        true
    }

    /// Terminate every container this executor started.
    pub async fn terminate_all(&self) {
        let ids: Vec<Uuid> = {
            let active = self.active.lock().unwrap_or_else(|p| p.into_inner());
            active.keys().copied().collect()
        };
        for id in ids {
            self.terminate(id).await;
        }
    }
}

async fn monitor_container(
    runtime: Arc<dyn ContainerRuntime>,
    container_id: String,
    emitter: EventEmitter,
    exit_tx: oneshot::Sender<ContainerExit>,
) {
    match runtime.follow_logs(&container_id).await {
        Ok(mut lines) => {
            while let Some(output) = lines.recv().await {
                emitter.output(output.stream, output.line);
            }
        }
        Err(e) => warn!("Cannot follow output of container {}: {}", container_id, e),
    }

    let exit = match runtime.wait(&container_id).await {
        Ok(code) => ContainerExit {
            code: Some(code),
            error: None,
        },
        Err(e) => ContainerExit {
            code: None,
            error: Some(e.to_string()),
        },
    };
    debug!("Container {} exited with {:?}", container_id, exit.code);
    let _ = exit_tx.send(exit);
}
