// ABOUTME: Docker-backed container runtime
// ABOUTME: Uses bollard to pull, create, start, follow, wait on and remove run containers

use super::{ContainerOutput, ContainerRuntime, ContainerSpec, LineBuffer, RuntimeError};
use crate::types::StreamKind;
use async_trait::async_trait;
use bollard::{
    container::{
        Config, CreateContainerOptions, KillContainerOptions, LogOutput, LogsOptions,
        RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
    },
    errors::Error as DockerError,
    image::CreateImageOptions,
    models::{HostConfig, PortBinding},
    Docker,
};
use futures::StreamExt;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

const DEFAULT_PULL_TIMEOUT: Duration = Duration::from_secs(600);
const PIDS_LIMIT: i64 = 256;
/// Capabilities no run container needs. Apache still needs SETUID/SETGID to drop privileges.
const DROPPED_CAPABILITIES: &[&str] = &["NET_RAW", "MKNOD", "SYS_CHROOT", "AUDIT_WRITE"];

pub struct DockerRuntime {
    client: Docker,
    pull_timeout: Duration,
}

impl DockerRuntime {
    /// Connect using the standard Docker environment (socket or `DOCKER_HOST`).
    pub fn connect() -> Result<Self, RuntimeError> {
        let client = Docker::connect_with_defaults()
            .map_err(|e| RuntimeError::Unavailable(e.to_string()))?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: Docker) -> Self {
        Self {
            client,
            pull_timeout: DEFAULT_PULL_TIMEOUT,
        }
    }

    /// Whether the daemon answers.
    pub async fn ping(&self) -> Result<(), RuntimeError> {
        self.client
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| RuntimeError::Unavailable(e.to_string()))
    }

    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
        match self.client.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(RuntimeError::Image(e.to_string())),
        }
    }

    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        info!("Pulling image {} (timeout: {:?})", image, self.pull_timeout);

        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };
        let mut stream = self.client.create_image(Some(options), None, None);

        let pulled = tokio::time::timeout(self.pull_timeout, async {
            while let Some(result) = stream.next().await {
                let info = result
                    .map_err(|e| RuntimeError::Image(format!("pull of {} failed: {}", image, e)))?;
                if let Some(error) = info.error {
                    return Err(RuntimeError::Image(format!(
                        "pull of {} failed: {}",
                        image, error
                    )));
                }
                if let Some(status) = info.status {
                    debug!("Pull status for {}: {}", image, status);
                }
            }
            Ok(())
        })
        .await;

        match pulled {
            Ok(result) => result,
            Err(_) => Err(RuntimeError::Image(format!(
                "timed out pulling {} after {:?}",
                image, self.pull_timeout
            ))),
        }
    }
}

/// Translate a launch spec into a bollard container config.
pub fn container_config(spec: &ContainerSpec) -> Config<String> {
    let container_port = format!("{}/tcp", spec.port.container_port);
    let exposed_ports = HashMap::from([(container_port.clone(), HashMap::new())]);
    let port_bindings = HashMap::from([(
        container_port,
        Some(vec![PortBinding {
            host_ip: Some("0.0.0.0".to_string()),
            host_port: Some(spec.port.host_port.to_string()),
        }]),
    )]);

    let binds: Vec<String> = spec
        .mounts
        .iter()
        .map(|m| {
            format!(
                "{}:{}:{}",
                m.host_path,
                m.container_path,
                if m.readonly { "ro" } else { "rw" }
            )
        })
        .collect();

    let env: Vec<String> = spec
        .env
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();

    let memory_bytes = (spec.memory_mb * 1024 * 1024) as i64;
    let host_config = HostConfig {
        binds: Some(binds),
        port_bindings: Some(port_bindings),
        nano_cpus: Some((spec.cpus * 1_000_000_000.0) as i64),
        memory: Some(memory_bytes),
        memory_swap: Some(memory_bytes),
        pids_limit: Some(PIDS_LIMIT),
        cap_drop: Some(DROPPED_CAPABILITIES.iter().map(|c| c.to_string()).collect()),
        security_opt: Some(vec!["no-new-privileges".to_string()]),
        ..Default::default()
    };

    Config {
        image: Some(spec.image.clone()),
        cmd: spec.command.clone(),
        env: Some(env),
        working_dir: spec.working_dir.clone(),
        labels: Some(spec.labels.clone()),
        exposed_ports: Some(exposed_ports),
        host_config: Some(host_config),
        ..Default::default()
    }
}

/// Missing containers and containers that already stopped count as stopped.
fn is_gone(error: &DockerError) -> bool {
    matches!(
        error,
        DockerError::DockerResponseServerError {
            status_code: 404 | 409,
            ..
        }
    )
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn launch(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        info!("Launching container {} from {}", spec.name, spec.image);

        if !self.image_exists(&spec.image).await? {
            self.pull_image(&spec.image).await?;
        }

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };
        let created = self
            .client
            .create_container(Some(options), container_config(spec))
            .await
            .map_err(|e| RuntimeError::Create(e.to_string()))?;
        debug!("Created container {}", created.id);

        if let Err(e) = self
            .client
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await
        {
            // A port conflict lands here; do not leave the created container behind.
            if let Err(remove_err) = self.remove(&created.id).await {
                warn!(
                    "Failed to remove container {} after start failure: {}",
                    created.id, remove_err
                );
            }
            return Err(RuntimeError::Start(e.to_string()));
        }

        Ok(created.id)
    }

    async fn follow_logs(
        &self,
        container_id: &str,
    ) -> Result<mpsc::UnboundedReceiver<ContainerOutput>, RuntimeError> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: true,
            ..Default::default()
        };
        let logs = self.client.logs(container_id, Some(options));
        let (tx, rx) = mpsc::unbounded_channel();
        let container_id = container_id.to_string();

        tokio::spawn(async move {
            let mut stream = Box::pin(logs);
            let mut stdout = LineBuffer::default();
            let mut stderr = LineBuffer::default();

            while let Some(result) = stream.next().await {
                let (kind, lines) = match result {
                    Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                        (StreamKind::Stdout, stdout.push(&message))
                    }
                    Ok(LogOutput::StdErr { message }) => {
                        (StreamKind::Stderr, stderr.push(&message))
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        error!("Log stream for container {} failed: {}", container_id, e);
                        break;
                    }
                };
                for line in lines {
                    if tx.send(ContainerOutput { stream: kind, line }).is_err() {
                        return;
                    }
                }
            }

            let remainders = [
                (StreamKind::Stdout, &mut stdout),
                (StreamKind::Stderr, &mut stderr),
            ];
            for (kind, buffer) in remainders {
                if let Some(line) = buffer.flush() {
                    let _ = tx.send(ContainerOutput { stream: kind, line });
                }
            }
        });

        Ok(rx)
    }

    async fn wait(&self, container_id: &str) -> Result<i64, RuntimeError> {
        let options = WaitContainerOptions {
            condition: "not-running".to_string(),
        };
        let mut stream = self.client.wait_container(container_id, Some(options));
        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports non-zero exits as an error carrying the code.
            Some(Err(DockerError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(RuntimeError::Logs(e.to_string())),
            None => Err(RuntimeError::Logs(format!(
                "wait stream for {} ended without a status",
                container_id
            ))),
        }
    }

    async fn kill(&self, container_id: &str) -> Result<(), RuntimeError> {
        debug!("Killing container {}", container_id);
        let options = KillContainerOptions { signal: "SIGKILL" };
        match self.client.kill_container(container_id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if is_gone(&e) => Ok(()),
            Err(e) => Err(RuntimeError::Stop(e.to_string())),
        }
    }

    async fn remove(&self, container_id: &str) -> Result<(), RuntimeError> {
        debug!("Removing container {}", container_id);
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        match self
            .client
            .remove_container(container_id, Some(options))
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if is_gone(&e) => Ok(()),
            Err(e) => Err(RuntimeError::Stop(e.to_string())),
        }
    }
}
