// ABOUTME: Container executor seam: runtime trait, launch specs and the image table
// ABOUTME: Docker backs the trait in production, a scripted in-memory runtime in tests

pub mod docker;
pub mod executor;
mod images;
pub mod scripted;

pub use docker::DockerRuntime;
pub use executor::{ContainerExecutor, ContainerExit, LaunchRequest, LaunchedContainer};
pub use images::{MountMode, RuntimeImage, RuntimeKind};
pub use scripted::ScriptedRuntime;

use crate::types::StreamKind;
use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuntimeError {
    #[error("Container runtime unavailable: {0}")]
    Unavailable(String),

    #[error("Image error: {0}")]
    Image(String),

    #[error("Failed to create container: {0}")]
    Create(String),

    #[error("Failed to start container: {0}")]
    Start(String),

    #[error("Failed to stop container: {0}")]
    Stop(String),

    #[error("Container log stream failed: {0}")]
    Logs(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMount {
    pub host_path: String,
    pub container_path: String,
    pub readonly: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMapping {
    pub host_port: u16,
    pub container_port: u16,
}

/// Everything a runtime needs to create and start one container.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub command: Option<Vec<String>>,
    pub working_dir: Option<String>,
    pub env: Vec<(String, String)>,
    pub mounts: Vec<VolumeMount>,
    pub port: PortMapping,
    pub cpus: f64,
    pub memory_mb: u64,
    pub labels: HashMap<String, String>,
}

/// One line of container output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerOutput {
    pub stream: StreamKind,
    pub line: String,
}

/// Operations the container executor needs from a container engine.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    fn name(&self) -> &'static str;

    /// Create and start a container, returning its id once the process exists.
    async fn launch(&self, spec: &ContainerSpec) -> Result<String, RuntimeError>;

    /// Follow combined output. The channel closes when the container exits.
    async fn follow_logs(
        &self,
        container_id: &str,
    ) -> Result<mpsc::UnboundedReceiver<ContainerOutput>, RuntimeError>;

    /// Wait for exit and return the exit code.
    async fn wait(&self, container_id: &str) -> Result<i64, RuntimeError>;

    /// Force-stop. Stopping an already stopped or missing container succeeds.
    async fn kill(&self, container_id: &str) -> Result<(), RuntimeError>;

    async fn remove(&self, container_id: &str) -> Result<(), RuntimeError>;
}

/// Stand-in used when no container engine is reachable.
///
/// Static and sandboxed runs keep working; container runs fail with
/// `LaunchFailed` carrying the connection diagnostic.
#[derive(Debug, Clone)]
pub struct UnavailableRuntime {
    reason: String,
}

impl UnavailableRuntime {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl ContainerRuntime for UnavailableRuntime {
    fn name(&self) -> &'static str {
        "unavailable"
    }

    async fn launch(&self, _spec: &ContainerSpec) -> Result<String, RuntimeError> {
        Err(RuntimeError::Unavailable(self.reason.clone()))
    }

    async fn follow_logs(
        &self,
        _container_id: &str,
    ) -> Result<mpsc::UnboundedReceiver<ContainerOutput>, RuntimeError> {
        Err(RuntimeError::Unavailable(self.reason.clone()))
    }

    async fn wait(&self, _container_id: &str) -> Result<i64, RuntimeError> {
        Err(RuntimeError::Unavailable(self.reason.clone()))
    }

    async fn kill(&self, _container_id: &str) -> Result<(), RuntimeError> {
        Ok(())
    }

    async fn remove(&self, _container_id: &str) -> Result<(), RuntimeError> {
        Ok(())
    }
}

/// Reassembles lines from arbitrarily split output chunks.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: String,
}

impl LineBuffer {
    /// Append a chunk and return the lines it completed, without terminators.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.push_str(&String::from_utf8_lossy(chunk));
        let mut lines = Vec::new();
        while let Some(index) = self.pending.find('\n') {
            let mut line: String = self.pending.drain(..=index).collect();
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
            lines.push(line);
        }
        lines
    }

    /// Remaining partial line, if any.
    pub fn flush(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.pending))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_buffer_joins_split_chunks() {
        let mut buffer = LineBuffer::default();
        assert!(buffer.push(b"hel").is_empty());
        assert_eq!(buffer.push(b"lo\r\nwor"), vec!["hello".to_string()]);
        assert_eq!(buffer.push(b"ld\n\n"), vec!["world".to_string(), String::new()]);
        assert_eq!(buffer.flush(), None);
        buffer.push(b"tail");
        assert_eq!(buffer.flush(), Some("tail".to_string()));
    }

    #[tokio::test]
    async fn test_unavailable_runtime_refuses_launch() {
        let runtime = UnavailableRuntime::new("no docker socket");
        let spec = ContainerSpec {
            name: "x".to_string(),
            image: "php:8.3-apache".to_string(),
            command: None,
            working_dir: None,
            env: Vec::new(),
            mounts: Vec::new(),
            port: PortMapping {
                host_port: 9100,
                container_port: 80,
            },
            cpus: 0.5,
            memory_mb: 256,
            labels: HashMap::new(),
        };
        let err = runtime.launch(&spec).await.unwrap_err();
        assert_eq!(err, RuntimeError::Unavailable("no docker socket".to_string()));
        assert!(runtime.kill("missing").await.is_ok());
    }
}
