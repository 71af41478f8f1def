//! Run Event System
//!
//! Progress and outcome events for one orchestrator run. The orchestrator only
//! emits them; presenting them (console, log file, UI) is up to the receiver.

use serde::Serialize;
use tokio::sync::mpsc;

/// Events emitted during a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RunEvent {
    /// SSH session to the source host is up
    Connected { host: String },
    /// Local forward is bound and relaying
    #[serde(rename_all = "camelCase")]
    ForwardingActive {
        local_addr: String,
        destination: String,
    },
    /// Launch command sent (redacted rendering)
    LaunchStarted { command: String },
    /// Launch command returned a non-zero or missing exit status
    #[serde(rename_all = "camelCase")]
    LaunchFailed {
        #[serde(skip_serializing_if = "Option::is_none")]
        exit_status: Option<u32>,
        stderr: String,
    },
    /// A status poll is about to run
    #[serde(rename_all = "camelCase")]
    Poll { attempt: u32, max_attempts: u32 },
    /// The completion predicate matched
    Completed { polls: u32 },
    /// Attempts exhausted, manual verification required
    TimedOut { polls: u32 },
    /// Monitoring finished and the tunnel is held open until cancellation
    HoldingTunnel,
    /// The run was cancelled by the caller
    Cancelled,
    /// The run stopped on an error
    Aborted { error: String },
    /// Forward stopped and session disconnected
    TornDown,
}

/// Event emitter for a run
///
/// Wraps an optional unbounded sender; `noop()` drops every event.
#[derive(Debug, Clone, Default)]
pub struct RunEventEmitter {
    tx: Option<mpsc::UnboundedSender<RunEvent>>,
}

impl RunEventEmitter {
    /// Create an emitter and the receiving end of its channel
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<RunEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Create a no-op emitter (for testing or when events are not needed)
    pub fn noop() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: RunEvent) {
        if let Some(ref tx) = self.tx {
            if tx.send(event).is_err() {
                tracing::debug!("Run event receiver dropped");
            }
        }
    }
}
