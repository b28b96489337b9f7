// ABOUTME: In-memory container runtime driven by scripted output and exit codes
// ABOUTME: Records every launch, kill and removal so tests can assert on them

use super::{ContainerOutput, ContainerRuntime, ContainerSpec, RuntimeError};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tokio::sync::{mpsc, watch};

/// Exit code reported for force-stopped containers.
pub const KILLED_EXIT_CODE: i64 = 137;

#[derive(Debug, Clone, Default)]
struct Script {
    output: Vec<ContainerOutput>,
    exit: Option<i64>,
}

struct ScriptedContainer {
    script: Script,
    log_tx: Option<mpsc::UnboundedSender<ContainerOutput>>,
    exit: watch::Sender<Option<i64>>,
}

#[derive(Default)]
struct State {
    next_id: u64,
    scripts: VecDeque<Script>,
    launch_failures: VecDeque<RuntimeError>,
    stop_failure: Option<RuntimeError>,
    containers: HashMap<String, ScriptedContainer>,
    launched: Vec<ContainerSpec>,
    killed: Vec<String>,
    removed: Vec<String>,
}

/// Container runtime that never touches a real engine.
///
/// Unscripted containers run until killed or until [`ScriptedRuntime::exit`]
/// is called for them.
#[derive(Default)]
pub struct ScriptedRuntime {
    state: Mutex<State>,
}

impl ScriptedRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// The next launch prints `output`, then exits with `exit` if given.
    pub fn script_next_launch(&self, output: Vec<ContainerOutput>, exit: Option<i64>) {
        self.lock().scripts.push_back(Script { output, exit });
    }

    pub fn fail_next_launch(&self, error: RuntimeError) {
        self.lock().launch_failures.push_back(error);
    }

    /// Make every later kill and remove fail with `error`.
    pub fn fail_stops(&self, error: RuntimeError) {
        self.lock().stop_failure = Some(error);
    }

    /// Emit a line from a running container.
    pub fn emit(&self, container_id: &str, output: ContainerOutput) -> bool {
        let state = self.lock();
        state
            .containers
            .get(container_id)
            .and_then(|c| c.log_tx.as_ref())
            .map(|tx| tx.send(output).is_ok())
            .unwrap_or(false)
    }

    /// End a running container's process with `code`.
    pub fn exit(&self, container_id: &str, code: i64) {
        let mut state = self.lock();
        if let Some(container) = state.containers.get_mut(container_id) {
            finish(container, code);
        }
    }

    pub fn launched(&self) -> Vec<ContainerSpec> {
        self.lock().launched.clone()
    }

    pub fn killed(&self) -> Vec<String> {
        self.lock().killed.clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.lock().removed.clone()
    }

    /// Containers launched and not yet removed.
    pub fn live_count(&self) -> usize {
        self.lock().containers.len()
    }
}

fn finish(container: &mut ScriptedContainer, code: i64) {
    container.log_tx = None;
    container.exit.send_if_modified(|exit| {
        if exit.is_none() {
            *exit = Some(code);
            true
        } else {
            false
        }
    });
}

#[async_trait]
impl ContainerRuntime for ScriptedRuntime {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn launch(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let mut state = self.lock();
        state.launched.push(spec.clone());
        if let Some(error) = state.launch_failures.pop_front() {
            return Err(error);
        }

        state.next_id += 1;
        let id = format!("scripted-{}", state.next_id);
        let script = state.scripts.pop_front().unwrap_or_default();
        let (exit, _) = watch::channel(None);
        state.containers.insert(
            id.clone(),
            ScriptedContainer {
                script,
                log_tx: None,
                exit,
            },
        );
        Ok(id)
    }

    async fn follow_logs(
        &self,
        container_id: &str,
    ) -> Result<mpsc::UnboundedReceiver<ContainerOutput>, RuntimeError> {
        let mut state = self.lock();
        let container = state
            .containers
            .get_mut(container_id)
            .ok_or_else(|| RuntimeError::Logs(format!("no such container {}", container_id)))?;

        let (tx, rx) = mpsc::unbounded_channel();
        for output in container.script.output.drain(..) {
            let _ = tx.send(output);
        }
        match container.script.exit {
            Some(code) => finish(container, code),
            None if container.exit.borrow().is_some() => {}
            None => container.log_tx = Some(tx),
        }
        Ok(rx)
    }

    async fn wait(&self, container_id: &str) -> Result<i64, RuntimeError> {
        let mut exit = {
            let state = self.lock();
            state
                .containers
                .get(container_id)
                .map(|c| c.exit.subscribe())
                .ok_or_else(|| RuntimeError::Stop(format!("no such container {}", container_id)))?
        };
        let code = *exit
            .wait_for(|code| code.is_some())
            .await
            .map_err(|_| RuntimeError::Stop(format!("container {} was removed", container_id)))?;
        Ok(code.unwrap_or(KILLED_EXIT_CODE))
    }

    async fn kill(&self, container_id: &str) -> Result<(), RuntimeError> {
        let mut state = self.lock();
        state.killed.push(container_id.to_string());
        if let Some(error) = state.stop_failure.clone() {
            return Err(error);
        }
        if let Some(container) = state.containers.get_mut(container_id) {
            finish(container, KILLED_EXIT_CODE);
        }
        Ok(())
    }

    async fn remove(&self, container_id: &str) -> Result<(), RuntimeError> {
        let mut state = self.lock();
        state.removed.push(container_id.to_string());
        if let Some(error) = state.stop_failure.clone() {
            return Err(error);
        }
        state.containers.remove(container_id);
        Ok(())
    }
}
