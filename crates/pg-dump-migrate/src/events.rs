//! Migration event stream.
//!
//! A run reports progress as an ordered, append-only sequence of
//! [`MigrationEvent`]s delivered to a caller-owned [`EventSink`]. Phase
//! transitions and raw tool output share the stream and are told apart by
//! the event variant.

use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::info;

/// Pipeline stage, used for progress reporting only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationPhase {
    Initializing,
    Dumping,
    Dropping,
    Restoring,
    Complete,
    Failed,
}

impl MigrationPhase {
    pub fn name(&self) -> &'static str {
        match self {
            MigrationPhase::Initializing => "Initializing",
            MigrationPhase::Dumping => "Dumping",
            MigrationPhase::Dropping => "Dropping",
            MigrationPhase::Restoring => "Restoring",
            MigrationPhase::Complete => "Complete",
            MigrationPhase::Failed => "Failed",
        }
    }

    /// Whether the run has ended in this phase.
    pub fn is_terminal(&self) -> bool {
        matches!(self, MigrationPhase::Complete | MigrationPhase::Failed)
    }
}

impl fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One entry in the migration event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MigrationEvent {
    /// Tool output or an orchestrator diagnostic.
    Log {
        timestamp: DateTime<Utc>,
        message: String,
    },
    /// The run entered a new phase.
    PhaseChange {
        timestamp: DateTime<Utc>,
        phase: MigrationPhase,
        detail: String,
    },
}

/// Flat `{timestamp, message}` form of an event for JSON-lines consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl MigrationEvent {
    pub fn log(message: impl Into<String>) -> Self {
        MigrationEvent::Log {
            timestamp: Utc::now(),
            message: message.into(),
        }
    }

    pub fn phase(phase: MigrationPhase, detail: impl Into<String>) -> Self {
        MigrationEvent::PhaseChange {
            timestamp: Utc::now(),
            phase,
            detail: detail.into(),
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            MigrationEvent::Log { timestamp, .. } => *timestamp,
            MigrationEvent::PhaseChange { timestamp, .. } => *timestamp,
        }
    }

    /// Phase carried by a `PhaseChange`, `None` for log lines.
    pub fn as_phase(&self) -> Option<MigrationPhase> {
        match self {
            MigrationEvent::PhaseChange { phase, .. } => Some(*phase),
            MigrationEvent::Log { .. } => None,
        }
    }

    pub fn to_record(&self) -> EventRecord {
        EventRecord {
            timestamp: self.timestamp(),
            message: self.to_string(),
        }
    }
}

impl fmt::Display for MigrationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationEvent::Log { message, .. } => f.write_str(message),
            MigrationEvent::PhaseChange { phase, detail, .. } if detail.is_empty() => {
                write!(f, "--- {} ---", phase)
            }
            MigrationEvent::PhaseChange { phase, detail, .. } => {
                write!(f, "--- {}: {} ---", phase, detail)
            }
        }
    }
}

/// Append-only consumer of migration events.
///
/// `emit` is called synchronously, in order, from the task driving the run.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: MigrationEvent);
}

impl<S: EventSink + ?Sized> EventSink for &S {
    fn emit(&self, event: MigrationEvent) {
        (**self).emit(event)
    }
}

impl<S: EventSink + ?Sized> EventSink for std::sync::Arc<S> {
    fn emit(&self, event: MigrationEvent) {
        (**self).emit(event)
    }
}

/// Forwards events into a tokio channel. Events are dropped once the receiver is gone.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<MigrationEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<MigrationEvent>) -> Self {
        Self { tx }
    }

    /// Create a sink together with its receiving end.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<MigrationEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: MigrationEvent) {
        let _ = self.tx.send(event);
    }
}

/// Keeps every event in memory. Used for transcripts and tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<MigrationEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all events received so far.
    pub fn events(&self) -> Vec<MigrationEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Rendered lines, in order.
    pub fn lines(&self) -> Vec<String> {
        self.events().iter().map(|e| e.to_string()).collect()
    }

    /// Phases entered, in order.
    pub fn phases(&self) -> Vec<MigrationPhase> {
        self.events().iter().filter_map(|e| e.as_phase()).collect()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: MigrationEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

/// Mirrors events into `tracing` at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: MigrationEvent) {
        match &event {
            MigrationEvent::PhaseChange { phase, detail, .. } => {
                info!(phase = phase.name(), "{}", detail)
            }
            MigrationEvent::Log { message, .. } => info!("{}", message),
        }
    }
}

/// Adapts a closure into an [`EventSink`].
pub struct FnSink<F>(pub F);

impl<F> EventSink for FnSink<F>
where
    F: Fn(MigrationEvent) + Send + Sync,
{
    fn emit(&self, event: MigrationEvent) {
        (self.0)(event)
    }
}
