// ABOUTME: Log relay fanning execution events out to per-workspace subscribers
// ABOUTME: Also holds the per-execution emitter that sequences events and fills the stdout buffer

use crate::types::{Lifecycle, LogEvent, LogLevel, StreamKind};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

/// Prefix recorded in the stdout buffer for stderr lines.
pub const STDERR_PREFIX: &str = "ERROR: ";

/// Single point of fan-out from executors to event stream consumers.
///
/// Each subscriber owns an unbounded queue, so a slow consumer never causes
/// events to be dropped for itself or delayed for others. Events published
/// before a subscription are not replayed.
#[derive(Clone, Default)]
pub struct LogRelay {
    channels: Arc<Mutex<HashMap<String, Vec<mpsc::UnboundedSender<LogEvent>>>>>,
}

impl LogRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, workspace_id: &str) -> LogSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut channels = self.channels.lock().unwrap_or_else(|p| p.into_inner());
        // Workspaces nobody publishes to again would otherwise keep dead senders.
        channels.retain(|_, senders| {
            senders.retain(|tx| !tx.is_closed());
            !senders.is_empty()
        });
        channels.entry(workspace_id.to_string()).or_default().push(tx);
        tracing::debug!("New log subscriber for workspace {}", workspace_id);
        LogSubscription {
            workspace_id: workspace_id.to_string(),
            receiver: rx,
        }
    }

    /// Deliver `event` to every live subscriber of the workspace.
    ///
    /// Returns the number of subscribers reached. Closed subscriptions are
    /// pruned here.
    pub fn publish(&self, workspace_id: &str, event: LogEvent) -> usize {
        let mut channels = self.channels.lock().unwrap_or_else(|p| p.into_inner());
        let Some(senders) = channels.get_mut(workspace_id) else {
            return 0;
        };

        senders.retain(|tx| tx.send(event.clone()).is_ok());
        let delivered = senders.len();
        if senders.is_empty() {
            channels.remove(workspace_id);
        }
        delivered
    }

    /// Live subscribers of the workspace. Closed ones are pruned.
    pub fn subscriber_count(&self, workspace_id: &str) -> usize {
        let mut channels = self.channels.lock().unwrap_or_else(|p| p.into_inner());
        let Some(senders) = channels.get_mut(workspace_id) else {
            return 0;
        };
        senders.retain(|tx| !tx.is_closed());
        let live = senders.len();
        if live == 0 {
            channels.remove(workspace_id);
        }
        live
    }
}

/// Receiving end of a workspace subscription.
pub struct LogSubscription {
    workspace_id: String,
    receiver: mpsc::UnboundedReceiver<LogEvent>,
}

impl LogSubscription {
    pub fn workspace_id(&self) -> &str {
        &self.workspace_id
    }

    pub async fn recv(&mut self) -> Option<LogEvent> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<LogEvent> {
        self.receiver.try_recv().ok()
    }

    pub fn into_stream(self) -> UnboundedReceiverStream<LogEvent> {
        UnboundedReceiverStream::new(self.receiver)
    }
}

/// Bounded text buffer that drops the oldest bytes first.
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    text: String,
    capacity: usize,
    truncated_bytes: usize,
}

impl OutputBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            text: String::new(),
            capacity: capacity.max(1),
            truncated_bytes: 0,
        }
    }

    pub fn push(&mut self, chunk: &str) {
        self.text.push_str(chunk);
        if self.text.len() <= self.capacity {
            return;
        }
        let mut cut = self.text.len() - self.capacity;
        while !self.text.is_char_boundary(cut) {
            cut += 1;
        }
        self.text.drain(..cut);
        self.truncated_bytes += cut;
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn truncated_bytes(&self) -> usize {
        self.truncated_bytes
    }
}

struct EmitterState {
    next_sequence: u64,
    buffer: OutputBuffer,
}

struct EmitterInner {
    execution_id: Uuid,
    workspace_id: String,
    relay: LogRelay,
    state: Mutex<EmitterState>,
}

/// Producer side for a single execution.
///
/// Sequence assignment, buffering and publishing happen under one lock, so
/// every subscriber observes an execution's events in gap-free sequence
/// order regardless of which thread produced them.
#[derive(Clone)]
pub struct EventEmitter {
    inner: Arc<EmitterInner>,
}

impl EventEmitter {
    pub fn new(
        execution_id: Uuid,
        workspace_id: impl Into<String>,
        relay: LogRelay,
        buffer_capacity: usize,
    ) -> Self {
        Self {
            inner: Arc::new(EmitterInner {
                execution_id,
                workspace_id: workspace_id.into(),
                relay,
                state: Mutex::new(EmitterState {
                    next_sequence: 0,
                    buffer: OutputBuffer::new(buffer_capacity),
                }),
            }),
        }
    }

    pub fn execution_id(&self) -> Uuid {
        self.inner.execution_id
    }

    pub fn workspace_id(&self) -> &str {
        &self.inner.workspace_id
    }

    pub fn stdout(&self, text: impl Into<String>) -> u64 {
        self.output(StreamKind::Stdout, text)
    }

    pub fn stderr(&self, text: impl Into<String>) -> u64 {
        self.output(StreamKind::Stderr, text)
    }

    /// Record one output line and publish it. Returns its sequence number.
    pub fn output(&self, stream: StreamKind, text: impl Into<String>) -> u64 {
        let text = text.into();
        let level = match stream {
            StreamKind::Stderr => Some(LogLevel::Error),
            _ => None,
        };
        self.emit(stream, text, level, None)
    }

    /// Publish a lifecycle notification. Not recorded in the stdout buffer.
    pub fn lifecycle(&self, lifecycle: Lifecycle) -> u64 {
        let text = describe(&lifecycle);
        let level = match lifecycle {
            Lifecycle::Crashed { .. } | Lifecycle::Error { .. } | Lifecycle::TimedOut => {
                Some(LogLevel::Error)
            }
            _ => Some(LogLevel::Info),
        };
        self.emit(StreamKind::Lifecycle, text, level, Some(lifecycle))
    }

    /// Snapshot of the stdout buffer.
    pub fn buffer(&self) -> String {
        let state = self.inner.state.lock().unwrap_or_else(|p| p.into_inner());
        state.buffer.as_str().to_string()
    }

    pub fn events_emitted(&self) -> u64 {
        let state = self.inner.state.lock().unwrap_or_else(|p| p.into_inner());
        state.next_sequence
    }

    fn emit(
        &self,
        stream: StreamKind,
        text: String,
        level: Option<LogLevel>,
        lifecycle: Option<Lifecycle>,
    ) -> u64 {
        let mut state = self.inner.state.lock().unwrap_or_else(|p| p.into_inner());
        let sequence = state.next_sequence;
        state.next_sequence += 1;

        match stream {
            StreamKind::Stdout => {
                state.buffer.push(&text);
                state.buffer.push("\n");
            }
            StreamKind::Stderr => {
                state.buffer.push(STDERR_PREFIX);
                state.buffer.push(&text);
                state.buffer.push("\n");
            }
            StreamKind::Lifecycle => {}
        }

        let event = LogEvent {
            execution_id: self.inner.execution_id,
            workspace_id: self.inner.workspace_id.clone(),
            stream,
            text,
            level,
            lifecycle,
            sequence,
            timestamp: Utc::now(),
        };
        self.inner.relay.publish(&self.inner.workspace_id, event);
        sequence
    }
}

fn describe(lifecycle: &Lifecycle) -> String {
    match lifecycle {
        Lifecycle::Preview { url } => format!("Preview available at {}", url),
        Lifecycle::Stopped => "Execution stopped".to_string(),
        Lifecycle::Close { code: Some(code) } => format!("Process exited with code {}", code),
        Lifecycle::Close { code: None } => "Process exited".to_string(),
        Lifecycle::Crashed {
            message: Some(message),
            ..
        } => message.clone(),
        Lifecycle::Crashed {
            code: Some(code),
            message: None,
        } => format!("Process crashed with exit code {}", code),
        Lifecycle::Crashed { .. } => "Process crashed".to_string(),
        Lifecycle::TimedOut => "Execution timed out".to_string(),
        Lifecycle::Error { message } => message.clone(),
    }
}
