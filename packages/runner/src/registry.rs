// ABOUTME: Session registry owning the single active execution of every workspace
// ABOUTME: Dispatches runs to executors, drives the state machine and reaps expired executions

use crate::config::RunnerConfig;
use crate::container::{ContainerExecutor, ContainerRuntime, LaunchRequest};
use crate::error::{RunnerError, RunnerResult};
use crate::network::NetworkProfiles;
use crate::paths;
use crate::ports::PortPool;
use crate::preview::INDEX_FILE;
use crate::relay::{EventEmitter, LogRelay, LogSubscription};
use crate::sandbox::{SandboxExecutor, SandboxOutcome, ScriptTermination};
use crate::strategy::{extension_of, Dispatch, StrategyTable};
use crate::types::{
    ExecutionSnapshot, ExecutionState, Lifecycle, RunOptions, RunOutcome, StateTransition,
    StopResult, Strategy, WorkspaceStatus,
};
use crate::validation::validate_workspace_id;
use crate::workspace::WorkspaceStore;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Upper bound accepted for a per-run script timeout.
pub const MAX_SCRIPT_TIMEOUT_MS: u64 = 300_000;

/// Slack past the script timeout before the reaper steps in.
const SCRIPT_DEADLINE_SLACK: Duration = Duration::from_secs(1);

enum ResourceHandle {
    /// `finished` fires once the interpreter thread has returned.
    Interpreter { finished: CancellationToken },
    Container,
}

struct ActiveExecution {
    snapshot: ExecutionSnapshot,
    emitter: EventEmitter,
    cancel: CancellationToken,
    handle: ResourceHandle,
}

#[derive(Default)]
struct WorkspaceSlot {
    current: Option<ActiveExecution>,
    last: Option<ExecutionSnapshot>,
    last_output: String,
}

/// How an execution is leaving the slot.
struct Retirement {
    state: ExecutionState,
    lifecycle: Lifecycle,
    exit_code: Option<i64>,
    error: Option<String>,
}

impl Retirement {
    fn stopped() -> Self {
        Self {
            state: ExecutionState::Stopped,
            lifecycle: Lifecycle::Stopped,
            exit_code: None,
            error: None,
        }
    }

    fn timed_out(reason: String) -> Self {
        Self {
            state: ExecutionState::TimedOut,
            lifecycle: Lifecycle::TimedOut,
            exit_code: None,
            error: Some(reason),
        }
    }
}

/// Work prepared before the slot is locked.
enum Prepared {
    Static,
    Script(String),
    Container(crate::container::RuntimeKind, PathBuf),
}

struct RegistryInner {
    config: RunnerConfig,
    workspaces: Arc<dyn WorkspaceStore>,
    table: StrategyTable,
    sandbox: SandboxExecutor,
    containers: ContainerExecutor,
    relay: LogRelay,
    network: NetworkProfiles,
    slots: Mutex<HashMap<String, Arc<AsyncMutex<WorkspaceSlot>>>>,
    shutdown: CancellationToken,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

/// Owner of every execution in the process.
///
/// Each workspace has one slot guarded by its own async mutex, so run, stop
/// and status on one workspace are serialized while different workspaces
/// proceed independently. The map of slots is only locked to look a slot up.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    pub fn new(
        config: RunnerConfig,
        workspaces: Arc<dyn WorkspaceStore>,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Self {
        let network = NetworkProfiles::new(config.default_network);
        let ports = Arc::new(PortPool::new(
            config.port_range.clone(),
            config.probe_host_ports,
        ));
        let containers = ContainerExecutor::new(runtime, ports, network.clone(), &config);

        Self {
            inner: Arc::new(RegistryInner {
                table: StrategyTable::new(config.js_strategy),
                sandbox: SandboxExecutor::new(config.node_env.clone()),
                containers,
                relay: LogRelay::new(),
                network,
                workspaces,
                slots: Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
                reaper: Mutex::new(None),
                config,
            }),
        }
    }

    /// Build a registry and start its deadline reaper.
    pub fn start(
        config: RunnerConfig,
        workspaces: Arc<dyn WorkspaceStore>,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Self {
        let registry = Self::new(config, workspaces, runtime);
        registry.spawn_reaper();
        registry
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.inner.config
    }

    pub fn relay(&self) -> &LogRelay {
        &self.inner.relay
    }

    pub fn network(&self) -> &NetworkProfiles {
        &self.inner.network
    }

    pub fn workspaces(&self) -> &Arc<dyn WorkspaceStore> {
        &self.inner.workspaces
    }

    pub fn ports(&self) -> &Arc<PortPool> {
        self.inner.containers.ports()
    }

    pub fn container_runtime(&self) -> &'static str {
        self.inner.containers.runtime_name()
    }

    pub fn subscribe(&self, workspace_id: &str) -> LogSubscription {
        self.inner.relay.subscribe(workspace_id)
    }

    fn slot(&self, workspace_id: &str) -> Arc<AsyncMutex<WorkspaceSlot>> {
        let mut slots = self.inner.slots.lock().unwrap_or_else(|p| p.into_inner());
        Arc::clone(slots.entry(workspace_id.to_string()).or_default())
    }

    fn existing_slot(&self, workspace_id: &str) -> Option<Arc<AsyncMutex<WorkspaceSlot>>> {
        let slots = self.inner.slots.lock().unwrap_or_else(|p| p.into_inner());
        slots.get(workspace_id).cloned()
    }

    fn all_slots(&self) -> Vec<Arc<AsyncMutex<WorkspaceSlot>>> {
        let slots = self.inner.slots.lock().unwrap_or_else(|p| p.into_inner());
        slots.values().cloned().collect()
    }

    /// Run `file` in a workspace, replacing any execution already active there.
    ///
    /// Static files return immediately with a preview URL. Sandboxed scripts
    /// return once the script settles, with its captured output. Containers
    /// return once the container process exists; later output and the exit
    /// arrive through the relay. An empty `file` runs `index.html`.
    ///
    /// The work runs on its own task so a dropped caller cannot leave a slot
    /// half-updated.
    pub async fn run(
        &self,
        workspace_id: &str,
        file: &str,
        options: RunOptions,
    ) -> RunnerResult<RunOutcome> {
        let registry = self.clone();
        let workspace_id = workspace_id.to_string();
        let file = file.to_string();
        tokio::spawn(async move { registry.run_detached(workspace_id, file, options).await })
            .await
            .map_err(|e| RunnerError::Crashed {
                reason: format!("run task failed: {}", e),
            })?
    }

    async fn run_detached(
        &self,
        workspace_id: String,
        file: String,
        options: RunOptions,
    ) -> RunnerResult<RunOutcome> {
        validate_workspace_id(&workspace_id)?;
        validate_options(&options)?;

        let root = self.inner.workspaces.root(&workspace_id).await?;
        let requested = file.trim();
        let requested = if requested.is_empty() {
            INDEX_FILE
        } else {
            requested
        };
        let relative = paths::normalize_relative(requested)?;

        let dispatch = self.inner.table.lookup(&relative);
        let prepared = match dispatch {
            Dispatch::Unsupported => {
                let extension = extension_of(&relative);
                debug!(
                    "No strategy for '{}' in workspace {}",
                    relative, workspace_id
                );
                return Ok(RunOutcome::Unsupported {
                    message: self.inner.table.unsupported_message(&extension),
                    extension,
                });
            }
            Dispatch::Static => {
                let path = paths::resolve_existing(&root, &relative).await?;
                if !tokio::fs::metadata(&path).await?.is_file() {
                    return Err(RunnerError::file_not_found(relative));
                }
                Prepared::Static
            }
            Dispatch::SandboxedScript => {
                let bytes = paths::read_within(&root, &relative).await?;
                let code = String::from_utf8(bytes).map_err(|_| RunnerError::InvalidOptions {
                    reason: format!("{} is not valid UTF-8", relative),
                })?;
                Prepared::Script(code)
            }
            Dispatch::Container(kind) => {
                let path = paths::resolve_existing(&root, &relative).await?;
                if !tokio::fs::metadata(&path).await?.is_file() {
                    return Err(RunnerError::file_not_found(relative));
                }
                Prepared::Container(kind, tokio::fs::canonicalize(&root).await?)
            }
        };

        let slot = self.slot(&workspace_id);
        let mut guard = slot.lock().await;
        if let Some(previous) = guard.current.take() {
            info!(
                "Stopping execution {} in workspace {} before a new run",
                previous.snapshot.execution_id, workspace_id
            );
            self.retire(&mut guard, previous, Retirement::stopped()).await;
        }

        let execution_id = Uuid::new_v4();
        let emitter = EventEmitter::new(
            execution_id,
            workspace_id.as_str(),
            self.inner.relay.clone(),
            self.inner.config.stdout_buffer_bytes,
        );

        match prepared {
            Prepared::Static => Ok(self.run_static(&mut guard, emitter, &relative)),
            Prepared::Script(code) => {
                let settled = self.start_script(&mut guard, emitter, &relative, code, &options);
                drop(guard);
                let outcome = settled.await.map_err(|_| RunnerError::Crashed {
                    reason: "script task ended without a result".to_string(),
                })?;
                Ok(RunOutcome::SandboxedScript {
                    execution_id,
                    success: outcome.success,
                    stdout: outcome.stdout,
                    error: outcome.error,
                    state: terminal_state(outcome.termination),
                })
            }
            Prepared::Container(kind, root) => {
                self.run_container(&mut guard, emitter, &relative, kind, &root, &options)
                    .await
            }
        }
    }

    fn run_static(
        &self,
        slot: &mut WorkspaceSlot,
        emitter: EventEmitter,
        relative: &str,
    ) -> RunOutcome {
        let execution_id = emitter.execution_id();
        let workspace_id = emitter.workspace_id().to_string();
        let preview_url = format!("/preview/{}/{}", workspace_id, relative);

        let mut snapshot = new_snapshot(
            execution_id,
            &workspace_id,
            Strategy::Static,
            relative,
            Duration::ZERO,
        );
        snapshot.preview_url = Some(preview_url.clone());
        transition(&mut snapshot, ExecutionState::Running);
        emitter.lifecycle(Lifecycle::Preview {
            url: preview_url.clone(),
        });
        transition(&mut snapshot, ExecutionState::Stopped);
        snapshot.outcome = Some(ExecutionState::Stopped);
        transition(&mut snapshot, ExecutionState::Cleaned);

        info!(
            "Static preview of {} in workspace {}: {}",
            relative, workspace_id, preview_url
        );
        slot.last = Some(snapshot);
        slot.last_output = emitter.buffer();

        RunOutcome::Static {
            execution_id,
            preview_url,
        }
    }

    /// Start the interpreter on its own task and record the execution as running.
    ///
    /// The returned receiver resolves after the execution has been finalized.
    fn start_script(
        &self,
        slot: &mut WorkspaceSlot,
        emitter: EventEmitter,
        relative: &str,
        code: String,
        options: &RunOptions,
    ) -> oneshot::Receiver<SandboxOutcome> {
        let execution_id = emitter.execution_id();
        let workspace_id = emitter.workspace_id().to_string();
        let timeout = options
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.inner.config.script_timeout);
        let memory_mb = options
            .memory_limit_mb
            .unwrap_or(self.inner.config.script_memory_mb);

        let mut snapshot = new_snapshot(
            execution_id,
            &workspace_id,
            Strategy::SandboxedScript,
            relative,
            timeout + SCRIPT_DEADLINE_SLACK,
        );
        transition(&mut snapshot, ExecutionState::Running);

        let cancel = self.inner.shutdown.child_token();
        let finished = CancellationToken::new();
        slot.current = Some(ActiveExecution {
            snapshot,
            emitter: emitter.clone(),
            cancel: cancel.clone(),
            handle: ResourceHandle::Interpreter {
                finished: finished.clone(),
            },
        });
        info!(
            "Running script {} in workspace {} (execution {}, timeout {:?}, {} MB)",
            relative, workspace_id, execution_id, timeout, memory_mb
        );

        let (settled_tx, settled_rx) = oneshot::channel();
        let registry = self.clone();
        let sandbox_options = self.inner.sandbox.options(timeout, memory_mb);
        tokio::spawn(async move {
            let outcome = registry
                .inner
                .sandbox
                .execute(code, sandbox_options, emitter, cancel)
                .await;
            finished.cancel();
            registry
                .finish_script(&workspace_id, execution_id, &outcome)
                .await;
            let _ = settled_tx.send(outcome);
        });

        settled_rx
    }

    async fn finish_script(
        &self,
        workspace_id: &str,
        execution_id: Uuid,
        outcome: &SandboxOutcome,
    ) {
        let retirement = match outcome.termination {
            ScriptTermination::Completed => Retirement {
                state: ExecutionState::Stopped,
                lifecycle: Lifecycle::Close { code: Some(0) },
                exit_code: Some(0),
                error: None,
            },
            ScriptTermination::Failed => Retirement {
                state: ExecutionState::Crashed,
                lifecycle: Lifecycle::Crashed {
                    code: None,
                    message: outcome.error.clone(),
                },
                exit_code: None,
                error: outcome.error.clone(),
            },
            ScriptTermination::TimedOut => Retirement::timed_out(
                outcome
                    .error
                    .clone()
                    .unwrap_or_else(|| "script timed out".to_string()),
            ),
            // Whoever cancelled has already retired the execution.
            ScriptTermination::Cancelled => return,
        };
        self.finalize(workspace_id, execution_id, retirement).await;
    }

    async fn run_container(
        &self,
        slot: &mut WorkspaceSlot,
        emitter: EventEmitter,
        relative: &str,
        kind: crate::container::RuntimeKind,
        root: &std::path::Path,
        options: &RunOptions,
    ) -> RunnerResult<RunOutcome> {
        let execution_id = emitter.execution_id();
        let workspace_id = emitter.workspace_id().to_string();
        let mut snapshot = new_snapshot(
            execution_id,
            &workspace_id,
            Strategy::Container,
            relative,
            self.inner.config.container_timeout,
        );

        let request = LaunchRequest {
            execution_id,
            workspace_id: &workspace_id,
            root,
            entry_file: relative,
            runtime: kind,
            options,
        };
        let launched = match self.inner.containers.launch(request, emitter.clone()).await {
            Ok(launched) => launched,
            Err(e) => {
                error!(
                    "Launch of {} in workspace {} failed: {}",
                    relative, workspace_id, e
                );
                emitter.lifecycle(Lifecycle::Error {
                    message: e.to_string(),
                });
                snapshot.error = Some(e.to_string());
                transition(&mut snapshot, ExecutionState::Crashed);
                snapshot.outcome = Some(ExecutionState::Crashed);
                transition(&mut snapshot, ExecutionState::Cleaned);
                slot.last = Some(snapshot);
                slot.last_output = emitter.buffer();
                return Err(e);
            }
        };

        snapshot.port = Some(launched.port);
        snapshot.container_id = Some(launched.container_id.clone());
        snapshot.preview_url = Some(launched.preview_url.clone());
        transition(&mut snapshot, ExecutionState::Running);
        emitter.lifecycle(Lifecycle::Preview {
            url: launched.preview_url.clone(),
        });
        info!(
            "Container {} running {} for workspace {} at {}",
            launched.container_id, relative, workspace_id, launched.preview_url
        );

        slot.current = Some(ActiveExecution {
            snapshot,
            emitter,
            cancel: self.inner.shutdown.child_token(),
            handle: ResourceHandle::Container,
        });

        let registry = self.clone();
        let monitored_workspace = workspace_id.clone();
        let exit = launched.exit;
        tokio::spawn(async move {
            // A closed channel means the registry terminated the container itself.
            let Ok(exit) = exit.await else {
                return;
            };
            let retirement = if exit.is_success() {
                Retirement {
                    state: ExecutionState::Stopped,
                    lifecycle: Lifecycle::Close { code: exit.code },
                    exit_code: exit.code,
                    error: None,
                }
            } else {
                let message = exit.error.clone().or_else(|| {
                    exit.code
                        .map(|code| format!("container exited with code {}", code))
                });
                Retirement {
                    state: ExecutionState::Crashed,
                    lifecycle: Lifecycle::Crashed {
                        code: exit.code,
                        message: message.clone(),
                    },
                    exit_code: exit.code,
                    error: message,
                }
            };
            registry
                .finalize(&monitored_workspace, execution_id, retirement)
                .await;
        });

        Ok(RunOutcome::Container {
            execution_id,
            preview_url: launched.preview_url,
            port: launched.port,
        })
    }

    /// Retire `execution_id` if it is still the workspace's current execution.
    async fn finalize(&self, workspace_id: &str, execution_id: Uuid, retirement: Retirement) {
        let Some(slot) = self.existing_slot(workspace_id) else {
            return;
        };
        let mut guard = slot.lock().await;
        let is_current = guard
            .current
            .as_ref()
            .is_some_and(|active| active.snapshot.execution_id == execution_id);
        if !is_current {
            debug!(
                "Execution {} already retired, ignoring {}",
                execution_id, retirement.state
            );
            return;
        }
        if let Some(active) = guard.current.take() {
            self.retire(&mut guard, active, retirement).await;
        }
    }

    /// Release an execution's resources, emit its terminal event and move it
    /// to `Cleaned`.
    ///
    /// Release failures are logged and never keep the slot busy.
    async fn retire(
        &self,
        slot: &mut WorkspaceSlot,
        mut active: ActiveExecution,
        retirement: Retirement,
    ) {
        let execution_id = active.snapshot.execution_id;
        active.cancel.cancel();

        match &active.handle {
            ResourceHandle::Interpreter { finished } => {
                let stopped =
                    tokio::time::timeout(self.inner.config.stop_grace, finished.cancelled()).await;
                if stopped.is_err() {
                    warn!(
                        "Interpreter for execution {} did not stop within {:?}",
                        execution_id, self.inner.config.stop_grace
                    );
                }
            }
            ResourceHandle::Container => {
                self.inner.containers.terminate(execution_id).await;
            }
        }

        let snapshot = &mut active.snapshot;
        if retirement.exit_code.is_some() {
            snapshot.exit_code = retirement.exit_code;
        }
        if retirement.error.is_some() {
            snapshot.error = retirement.error;
        }
        transition(snapshot, retirement.state);
        snapshot.outcome = Some(retirement.state);
        active.emitter.lifecycle(retirement.lifecycle);
        transition(snapshot, ExecutionState::Cleaned);

        info!(
            "Execution {} in workspace {} ended as {}",
            execution_id, snapshot.workspace_id, retirement.state
        );
        slot.last_output = active.emitter.buffer();
        slot.last = Some(active.snapshot);
    }

    /// Stop the workspace's active execution. Stopping an idle workspace succeeds.
    pub async fn stop(&self, workspace_id: &str) -> RunnerResult<StopResult> {
        validate_workspace_id(workspace_id)?;
        let idle = StopResult {
            ok: true,
            execution_id: None,
            state: ExecutionState::Idle,
        };
        let Some(slot) = self.existing_slot(workspace_id) else {
            return Ok(idle);
        };

        let mut guard = slot.lock().await;
        let Some(active) = guard.current.take() else {
            return Ok(idle);
        };
        let execution_id = active.snapshot.execution_id;
        info!(
            "Stopping execution {} in workspace {}",
            execution_id, workspace_id
        );
        self.retire(&mut guard, active, Retirement::stopped()).await;

        Ok(StopResult {
            ok: true,
            execution_id: Some(execution_id),
            state: ExecutionState::Stopped,
        })
    }

    /// Current state, with the current or most recent execution.
    pub async fn status(&self, workspace_id: &str) -> RunnerResult<WorkspaceStatus> {
        validate_workspace_id(workspace_id)?;
        let mut status = WorkspaceStatus {
            workspace_id: workspace_id.to_string(),
            state: ExecutionState::Idle,
            execution: None,
        };
        let Some(slot) = self.existing_slot(workspace_id) else {
            return Ok(status);
        };

        let guard = slot.lock().await;
        match &guard.current {
            Some(active) => {
                status.state = active.snapshot.state;
                status.execution = Some(active.snapshot.clone());
            }
            None => status.execution = guard.last.clone(),
        }
        Ok(status)
    }

    /// Captured output of the current or most recent execution.
    pub async fn output(&self, workspace_id: &str) -> RunnerResult<String> {
        validate_workspace_id(workspace_id)?;
        let Some(slot) = self.existing_slot(workspace_id) else {
            return Ok(String::new());
        };
        let guard = slot.lock().await;
        Ok(match &guard.current {
            Some(active) => active.emitter.buffer(),
            None => guard.last_output.clone(),
        })
    }

    /// Snapshots of every execution currently holding resources.
    pub async fn active_executions(&self) -> Vec<ExecutionSnapshot> {
        let mut active = Vec::new();
        for slot in self.all_slots() {
            let guard = slot.lock().await;
            if let Some(current) = &guard.current {
                active.push(current.snapshot.clone());
            }
        }
        active.sort_by(|a, b| a.workspace_id.cmp(&b.workspace_id));
        active
    }

    /// Start the periodic deadline scan. Calling it again has no effect.
    pub fn spawn_reaper(&self) {
        let mut reaper = self.inner.reaper.lock().unwrap_or_else(|p| p.into_inner());
        if reaper.is_some() {
            return;
        }
        let weak = Arc::downgrade(&self.inner);
        let shutdown = self.inner.shutdown.clone();
        let period = self.inner.config.reaper_interval;
        *reaper = Some(tokio::spawn(reap_loop(weak, shutdown, period)));
    }

    /// Force `TimedOut` on every execution past its deadline.
    ///
    /// Slots busy with a run or stop are skipped until the next scan. Returns
    /// the number of executions reaped.
    pub async fn reap_expired(&self) -> usize {
        let now = Utc::now();
        let mut reaped = 0;
        for slot in self.all_slots() {
            let Ok(mut guard) = slot.try_lock() else {
                continue;
            };
            let expired = guard
                .current
                .as_ref()
                .is_some_and(|active| active.snapshot.deadline <= now);
            if !expired {
                continue;
            }
            if let Some(active) = guard.current.take() {
                warn!(
                    "Execution {} in workspace {} passed its deadline, terminating",
                    active.snapshot.execution_id, active.snapshot.workspace_id
                );
                let reason = format!(
                    "execution exceeded its deadline of {}",
                    active.snapshot.deadline.to_rfc3339()
                );
                self.retire(&mut guard, active, Retirement::timed_out(reason))
                    .await;
                reaped += 1;
            }
        }

        let pruned = self.prune_idle_slots(now);
        if pruned > 0 {
            debug!("Dropped {} idle workspace slots", pruned);
        }
        reaped
    }

    /// Forget workspaces whose last execution finished longer ago than the
    /// retention period. Slots that are running, locked or referenced
    /// elsewhere are kept.
    fn prune_idle_slots(&self, now: DateTime<Utc>) -> usize {
        let retention = self.inner.config.idle_slot_retention;
        let mut slots = self.inner.slots.lock().unwrap_or_else(|p| p.into_inner());
        let before = slots.len();
        slots.retain(|_, slot| {
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            let Ok(guard) = slot.try_lock() else {
                return true;
            };
            if guard.current.is_some() {
                return true;
            }
            guard
                .last
                .as_ref()
                .and_then(|snapshot| snapshot.history.last())
                .is_some_and(|finished| {
                    (now - finished.at)
                        .to_std()
                        .map_or(true, |elapsed| elapsed < retention)
                })
        });
        before - slots.len()
    }

    /// Stop the reaper and every active execution.
    pub async fn shutdown(&self) {
        info!("Shutting down session registry");
        self.inner.shutdown.cancel();
        let reaper = {
            let mut reaper = self.inner.reaper.lock().unwrap_or_else(|p| p.into_inner());
            reaper.take()
        };
        if let Some(handle) = reaper {
            handle.abort();
        }

        for slot in self.all_slots() {
            let mut guard = slot.lock().await;
            if let Some(active) = guard.current.take() {
                self.retire(&mut guard, active, Retirement::stopped()).await;
            }
        }
        self.inner.containers.terminate_all().await;
    }
}

async fn reap_loop(registry: Weak<RegistryInner>, shutdown: CancellationToken, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                let Some(inner) = registry.upgrade() else {
                    break;
                };
                let reaped = SessionRegistry { inner }.reap_expired().await;
                if reaped > 0 {
                    debug!("Reaper terminated {} expired executions", reaped);
                }
            }
        }
    }
    debug!("Deadline reaper stopped");
}

fn validate_options(options: &RunOptions) -> RunnerResult<()> {
    if let Some(timeout) = options.timeout_ms {
        if timeout == 0 || timeout > MAX_SCRIPT_TIMEOUT_MS {
            return Err(RunnerError::InvalidOptions {
                reason: format!(
                    "timeoutMs must be between 1 and {}",
                    MAX_SCRIPT_TIMEOUT_MS
                ),
            });
        }
    }
    if options.memory_limit_mb == Some(0) {
        return Err(RunnerError::InvalidOptions {
            reason: "memoryLimitMb must be positive".to_string(),
        });
    }
    if let Some(cpus) = options.cpu_limit {
        if !cpus.is_finite() || cpus <= 0.0 {
            return Err(RunnerError::InvalidOptions {
                reason: "cpuLimit must be a positive number".to_string(),
            });
        }
    }
    Ok(())
}

fn terminal_state(termination: ScriptTermination) -> ExecutionState {
    match termination {
        ScriptTermination::Completed | ScriptTermination::Cancelled => ExecutionState::Stopped,
        ScriptTermination::Failed => ExecutionState::Crashed,
        ScriptTermination::TimedOut => ExecutionState::TimedOut,
    }
}

fn new_snapshot(
    execution_id: Uuid,
    workspace_id: &str,
    strategy: Strategy,
    file: &str,
    budget: Duration,
) -> ExecutionSnapshot {
    let started_at = Utc::now();
    ExecutionSnapshot {
        execution_id,
        workspace_id: workspace_id.to_string(),
        strategy,
        file: file.to_string(),
        state: ExecutionState::Starting,
        outcome: None,
        started_at,
        deadline: deadline_after(started_at, budget),
        preview_url: None,
        port: None,
        container_id: None,
        exit_code: None,
        error: None,
        history: vec![StateTransition {
            state: ExecutionState::Starting,
            at: started_at,
        }],
    }
}

fn deadline_after(start: DateTime<Utc>, budget: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(budget)
        .ok()
        .and_then(|budget| start.checked_add_signed(budget))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn transition(snapshot: &mut ExecutionSnapshot, next: ExecutionState) {
    if !snapshot.state.can_transition_to(next) {
        warn!(
            "Ignoring invalid transition {} -> {} for execution {}",
            snapshot.state, next, snapshot.execution_id
        );
        return;
    }
    snapshot.state = next;
    snapshot.history.push(StateTransition {
        state: next,
        at: Utc::now(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ScriptedRuntime;
    use crate::types::StreamKind;
    use crate::workspace::DirectoryWorkspaceStore;
    use tempfile::TempDir;

    fn registry(base: &TempDir) -> SessionRegistry {
        let config = RunnerConfig {
            workspaces_path: base.path().to_path_buf(),
            ..RunnerConfig::default()
        };
        SessionRegistry::new(
            config,
            Arc::new(DirectoryWorkspaceStore::new(base.path())),
            Arc::new(ScriptedRuntime::new()),
        )
    }

    fn workspace(base: &TempDir, id: &str, files: &[(&str, &str)]) {
        let root = base.path().join(id);
        std::fs::create_dir_all(&root).unwrap();
        for (name, content) in files {
            std::fs::write(root.join(name), content).unwrap();
        }
    }

    fn slot_count(registry: &SessionRegistry) -> usize {
        registry
            .inner
            .slots
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .len()
    }

    #[tokio::test]
    async fn test_reaper_drops_idle_slots_after_retention() {
        let base = TempDir::new().unwrap();
        let config = RunnerConfig {
            workspaces_path: base.path().to_path_buf(),
            idle_slot_retention: Duration::ZERO,
            ..RunnerConfig::default()
        };
        let registry = SessionRegistry::new(
            config,
            Arc::new(DirectoryWorkspaceStore::new(base.path())),
            Arc::new(ScriptedRuntime::new()),
        );
        for id in ["W1", "W2", "W3"] {
            workspace(&base, id, &[("index.html", "<p>x</p>")]);
            registry
                .run(id, "index.html", RunOptions::default())
                .await
                .unwrap();
        }
        assert_eq!(slot_count(&registry), 3);

        assert_eq!(registry.reap_expired().await, 0);
        assert_eq!(slot_count(&registry), 0);
        let status = registry.status("W1").await.unwrap();
        assert_eq!(status.state, ExecutionState::Idle);
        assert!(status.execution.is_none());
    }

    #[tokio::test]
    async fn test_reaper_keeps_recent_slots() {
        let base = TempDir::new().unwrap();
        workspace(&base, "W1", &[("index.html", "<p>x</p>")]);
        let registry = registry(&base);
        registry
            .run("W1", "index.html", RunOptions::default())
            .await
            .unwrap();

        registry.reap_expired().await;
        assert_eq!(slot_count(&registry), 1);
        assert!(registry.status("W1").await.unwrap().execution.is_some());
    }

    #[test]
    fn test_transition_rejects_skipping_states() {
        let mut snapshot = new_snapshot(
            Uuid::new_v4(),
            "W1",
            Strategy::Static,
            "a.html",
            Duration::ZERO,
        );
        transition(&mut snapshot, ExecutionState::Cleaned);
        assert_eq!(snapshot.state, ExecutionState::Starting);
        transition(&mut snapshot, ExecutionState::Running);
        assert_eq!(snapshot.state, ExecutionState::Running);
        assert_eq!(snapshot.history.len(), 2);
    }

    #[test]
    fn test_validate_options() {
        assert!(validate_options(&RunOptions::default()).is_ok());
        let zero = RunOptions {
            timeout_ms: Some(0),
            ..RunOptions::default()
        };
        assert!(matches!(
            validate_options(&zero),
            Err(RunnerError::InvalidOptions { .. })
        ));
        let negative_cpu = RunOptions {
            cpu_limit: Some(-1.0),
            ..RunOptions::default()
        };
        assert!(validate_options(&negative_cpu).is_err());
    }

    #[test]
    fn test_deadline_saturates() {
        let now = Utc::now();
        assert_eq!(deadline_after(now, Duration::MAX), DateTime::<Utc>::MAX_UTC);
        assert_eq!(deadline_after(now, Duration::ZERO), now);
    }

    #[tokio::test]
    async fn test_empty_file_runs_index() {
        let base = TempDir::new().unwrap();
        workspace(&base, "W1", &[("index.html", "<h1>hi</h1>")]);
        let registry = registry(&base);

        let outcome = registry.run("W1", "", RunOptions::default()).await.unwrap();
        assert_eq!(outcome.preview_url(), Some("/preview/W1/index.html"));
    }

    #[tokio::test]
    async fn test_unsupported_leaves_running_execution_alone() {
        let base = TempDir::new().unwrap();
        workspace(
            &base,
            "W1",
            &[("loop.js", "while (true) {}"), ("main.rb", "puts 1")],
        );
        let registry = registry(&base);

        let options = RunOptions {
            timeout_ms: Some(5_000),
            ..RunOptions::default()
        };
        let background = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.run("W1", "loop.js", options).await })
        };
        // Wait until the script is registered as running.
        for _ in 0..100 {
            if registry.status("W1").await.unwrap().state == ExecutionState::Running {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let outcome = registry
            .run("W1", "main.rb", RunOptions::default())
            .await
            .unwrap();
        assert!(matches!(outcome, RunOutcome::Unsupported { .. }));
        assert_eq!(
            registry.status("W1").await.unwrap().state,
            ExecutionState::Running
        );

        registry.stop("W1").await.unwrap();
        let script = background.await.unwrap().unwrap();
        match script {
            RunOutcome::SandboxedScript { state, success, .. } => {
                assert_eq!(state, ExecutionState::Stopped);
                assert!(!success);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_output_survives_cleanup() {
        let base = TempDir::new().unwrap();
        workspace(
            &base,
            "W1",
            &[("script.js", "console.log('a'); console.error('b');")],
        );
        let registry = registry(&base);
        let mut events = registry.subscribe("W1");

        registry
            .run("W1", "script.js", RunOptions::default())
            .await
            .unwrap();

        assert_eq!(registry.output("W1").await.unwrap(), "a\nERROR: b\n");
        let first = events.recv().await.unwrap();
        assert_eq!(first.stream, StreamKind::Stdout);
        let second = events.recv().await.unwrap();
        assert_eq!(second.stream, StreamKind::Stderr);
        let last = events.recv().await.unwrap();
        assert_eq!(last.lifecycle, Some(Lifecycle::Close { code: Some(0) }));
    }

    #[tokio::test]
    async fn test_reaper_times_out_expired_container() {
        let base = TempDir::new().unwrap();
        workspace(&base, "W2", &[("server.php", "<?php echo 1;")]);
        let config = RunnerConfig {
            container_timeout: Duration::ZERO,
            ..RunnerConfig::default()
        };
        let registry = SessionRegistry::new(
            config,
            Arc::new(DirectoryWorkspaceStore::new(base.path())),
            Arc::new(ScriptedRuntime::new()),
        );

        let outcome = registry
            .run("W2", "server.php", RunOptions::default())
            .await
            .unwrap();
        let port = match outcome {
            RunOutcome::Container { port, .. } => port,
            other => panic!("unexpected outcome {:?}", other),
        };

        assert_eq!(registry.reap_expired().await, 1);
        let status = registry.status("W2").await.unwrap();
        assert_eq!(status.state, ExecutionState::Idle);
        let execution = status.execution.unwrap();
        assert_eq!(execution.outcome, Some(ExecutionState::TimedOut));
        assert_eq!(execution.state, ExecutionState::Cleaned);
        assert!(!registry.ports().is_leased(port));
    }
}
