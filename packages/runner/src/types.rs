// ABOUTME: Shared domain types for strategies, execution states and events
// ABOUTME: Snapshots carry the full state transition history of one execution

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// How a file is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    Static,
    SandboxedScript,
    Container,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Static => "static",
            Strategy::SandboxedScript => "sandboxed-script",
            Strategy::Container => "container",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a workspace's execution slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExecutionState {
    Idle,
    Starting,
    Running,
    Stopped,
    Crashed,
    TimedOut,
    Cleaned,
}

impl ExecutionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionState::Idle => "idle",
            ExecutionState::Starting => "starting",
            ExecutionState::Running => "running",
            ExecutionState::Stopped => "stopped",
            ExecutionState::Crashed => "crashed",
            ExecutionState::TimedOut => "timedOut",
            ExecutionState::Cleaned => "cleaned",
        }
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: ExecutionState) -> bool {
        use ExecutionState::*;
        matches!(
            (self, next),
            (Idle, Starting)
                | (Starting, Running)
                | (Starting, Stopped)
                | (Starting, Crashed)
                | (Starting, TimedOut)
                | (Running, Stopped)
                | (Running, Crashed)
                | (Running, TimedOut)
                | (Stopped, Cleaned)
                | (Crashed, Cleaned)
                | (TimedOut, Cleaned)
        )
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resource ceiling class for container runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Untrusted code on shared hosts: strict CPU and memory ceilings.
    #[default]
    Shared,
    /// Trusted code on a dedicated host: loose ceilings.
    Dedicated,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Shared => "shared",
            RunMode::Dedicated => "dedicated",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Stdout,
    Stderr,
    Lifecycle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Error,
}

/// Lifecycle notifications carried on the `lifecycle` stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum Lifecycle {
    Preview {
        url: String,
    },
    Stopped,
    Close {
        code: Option<i64>,
    },
    Crashed {
        code: Option<i64>,
        message: Option<String>,
    },
    TimedOut,
    Error {
        message: String,
    },
}

impl Lifecycle {
    /// Event name as seen by stream consumers.
    pub fn name(&self) -> &'static str {
        match self {
            Lifecycle::Preview { .. } => "preview",
            Lifecycle::Stopped => "stopped",
            Lifecycle::Close { .. } => "close",
            Lifecycle::Crashed { .. } => "crashed",
            Lifecycle::TimedOut => "timedOut",
            Lifecycle::Error { .. } => "error",
        }
    }
}

/// One line of output or one lifecycle notification for an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEvent {
    pub execution_id: Uuid,
    pub workspace_id: String,
    pub stream: StreamKind,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<LogLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lifecycle: Option<Lifecycle>,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
}

impl LogEvent {
    /// Event name for transports that multiplex by name (SSE `event:` field).
    pub fn event_name(&self) -> &'static str {
        match (&self.stream, &self.lifecycle) {
            (StreamKind::Lifecycle, Some(lifecycle)) => lifecycle.name(),
            (StreamKind::Stderr, _) => "error",
            _ => "log",
        }
    }
}

/// Options accepted by `run`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RunOptions {
    /// Wall-clock limit for sandboxed scripts.
    pub timeout_ms: Option<u64>,
    /// Interpreter heap limit for sandboxed scripts.
    pub memory_limit_mb: Option<u64>,
    pub mode: RunMode,
    /// Requested CPUs for container runs, clamped to the mode ceiling.
    pub cpu_limit: Option<f64>,
    /// Requested memory in MB for container runs, clamped to the mode ceiling.
    pub memory_limit: Option<u64>,
}

/// Result of a `run` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "kebab-case")]
pub enum RunOutcome {
    #[serde(rename_all = "camelCase")]
    Static {
        execution_id: Uuid,
        preview_url: String,
    },
    #[serde(rename_all = "camelCase")]
    SandboxedScript {
        execution_id: Uuid,
        success: bool,
        stdout: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        state: ExecutionState,
    },
    #[serde(rename_all = "camelCase")]
    Container {
        execution_id: Uuid,
        preview_url: String,
        port: u16,
    },
    #[serde(rename_all = "camelCase")]
    Unsupported { extension: String, message: String },
}

impl RunOutcome {
    pub fn success(&self) -> bool {
        match self {
            RunOutcome::Static { .. } | RunOutcome::Container { .. } => true,
            RunOutcome::SandboxedScript { success, .. } => *success,
            RunOutcome::Unsupported { .. } => false,
        }
    }

    pub fn execution_id(&self) -> Option<Uuid> {
        match self {
            RunOutcome::Static { execution_id, .. }
            | RunOutcome::SandboxedScript { execution_id, .. }
            | RunOutcome::Container { execution_id, .. } => Some(*execution_id),
            RunOutcome::Unsupported { .. } => None,
        }
    }

    pub fn preview_url(&self) -> Option<&str> {
        match self {
            RunOutcome::Static { preview_url, .. } | RunOutcome::Container { preview_url, .. } => {
                Some(preview_url)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateTransition {
    pub state: ExecutionState,
    pub at: DateTime<Utc>,
}

/// Point-in-time view of an execution owned by the session registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSnapshot {
    pub execution_id: Uuid,
    pub workspace_id: String,
    pub strategy: Strategy,
    pub file: String,
    pub state: ExecutionState,
    /// Terminal state reached before cleanup (`stopped`, `crashed` or `timedOut`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ExecutionState>,
    pub started_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub history: Vec<StateTransition>,
}

impl ExecutionSnapshot {
    /// Whether the snapshot ever passed through `state`.
    pub fn visited(&self, state: ExecutionState) -> bool {
        self.history.iter().any(|t| t.state == state)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceStatus {
    pub workspace_id: String,
    pub state: ExecutionState,
    /// Current execution, or the last one once it has been cleaned up.
    pub execution: Option<ExecutionSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopResult {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<Uuid>,
    pub state: ExecutionState,
}
