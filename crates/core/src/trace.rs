//! Lifecycle trace bus — passive observation of engine execution.
//!
//! The engine publishes a structured event at each lifecycle point (stage
//! entry/exit, model call, tool call, error). Publishing is fire-and-continue
//! over a broadcast channel: it never blocks the loop and subscriber failures
//! cannot propagate back into it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use crate::turn::SessionKey;

/// The lifecycle points the engine reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceKind {
    StageEnter,
    StageExit,
    ModelCallStart,
    ModelCallEnd,
    ToolCallStart,
    ToolCallEnd,
    Error,
}

/// One lifecycle event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEvent {
    /// What happened
    pub kind: TraceKind,

    /// Which session it happened in
    pub session: SessionKey,

    /// The component reporting (e.g. "prep_stage", "reasoning_loop")
    pub component: String,

    /// When it happened
    pub timestamp: DateTime<Utc>,

    /// Payload summary
    #[serde(default)]
    pub detail: serde_json::Value,
}

impl TraceEvent {
    pub fn new(
        kind: TraceKind,
        session: &SessionKey,
        component: &str,
        detail: serde_json::Value,
    ) -> Self {
        Self {
            kind,
            session: session.clone(),
            component: component.to_string(),
            timestamp: Utc::now(),
            detail,
        }
    }
}

/// A broadcast-based bus for lifecycle events.
///
/// Observers subscribe and filter for what they care about; the publisher
/// ignores send errors (no subscribers is fine) so tracing has no effect on
/// control flow.
pub struct TraceBus {
    sender: broadcast::Sender<Arc<TraceEvent>>,
}

impl TraceBus {
    /// Create a new bus with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers. Never blocks, never fails.
    pub fn publish(&self, event: TraceEvent) {
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<TraceEvent>> {
        self.sender.subscribe()
    }
}

impl Default for TraceBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// A diagnostics subscriber that forwards lifecycle events to `tracing`.
///
/// Lagged receivers resubscribe silently; a tracer failure is logged on its
/// own task and never reaches the engine.
pub struct LogTracer;

impl LogTracer {
    /// Spawn the forwarding task. Runs until the bus is dropped.
    pub fn spawn(bus: &TraceBus) -> tokio::task::JoinHandle<()> {
        let mut rx = bus.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        debug!(
                            kind = ?event.kind,
                            session = %event.session,
                            component = %event.component,
                            detail = %event.detail,
                            "lifecycle event"
                        );
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        debug!(missed, "trace subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}
