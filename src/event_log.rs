//! Execution listener: append-only event log
//!
//! The execution context carries one `EventLog`; executors and transports
//! emit into it while running.
//! - Event: envelope with id + timestamp + kind
//! - EventKind: step level, node level and command output
//! - EventLog: thread-safe, append-only, cheap to clone (shared)

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Single event in the execution log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic sequence ID (for ordering)
    pub id: u64,
    /// Time since the log was created (ms)
    pub timestamp_ms: u64,
    /// Event type and data
    pub kind: EventKind,
}

/// Which output stream a captured line came from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// All event types
///
/// Uses Arc<str> for step/node names to enable cheap cloning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    // ═══════════════════════════════════════════
    // STEP LEVEL
    // ═══════════════════════════════════════════
    StepStarted {
        step: Arc<str>,
        node_count: usize,
    },
    StepCompleted {
        step: Arc<str>,
        success: bool,
        duration_ms: u64,
    },

    // ═══════════════════════════════════════════
    // NODE LEVEL
    // ═══════════════════════════════════════════
    NodeStepStarted {
        node: Arc<str>,
    },
    ScriptCopied {
        node: Arc<str>,
        provider: String,
        remote_path: String,
    },
    CommandStarted {
        node: Arc<str>,
        provider: String,
        command: Vec<String>,
    },
    CommandFinished {
        node: Arc<str>,
        success: bool,
        exit_code: Option<i32>,
    },
    NodeStepFailed {
        node: Arc<str>,
        error: String,
    },

    // ═══════════════════════════════════════════
    // OUTPUT
    // ═══════════════════════════════════════════
    CommandOutput {
        node: Arc<str>,
        stream: OutputStream,
        line: String,
    },
}

impl EventKind {
    /// Extract node name if event is node-related
    pub fn node(&self) -> Option<&str> {
        match self {
            Self::NodeStepStarted { node }
            | Self::ScriptCopied { node, .. }
            | Self::CommandStarted { node, .. }
            | Self::CommandFinished { node, .. }
            | Self::NodeStepFailed { node, .. }
            | Self::CommandOutput { node, .. } => Some(node),
            Self::StepStarted { .. } | Self::StepCompleted { .. } => None,
        }
    }

    /// Check if this is a step-level event
    pub fn is_step_event(&self) -> bool {
        matches!(self, Self::StepStarted { .. } | Self::StepCompleted { .. })
    }
}

/// Thread-safe, append-only event log
#[derive(Clone)]
pub struct EventLog {
    events: Arc<RwLock<Vec<Event>>>,
    start_time: Instant,
    next_id: Arc<AtomicU64>,
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            events: Arc::new(RwLock::new(Vec::new())),
            start_time: Instant::now(),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Emit an event (thread-safe, returns event ID)
    pub fn emit(&self, kind: EventKind) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let event = Event {
            id,
            timestamp_ms: self.start_time.elapsed().as_millis() as u64,
            kind,
        };

        // concurrent emitters can reach the lock out of id order
        let mut events = self.events.write();
        let pos = events.partition_point(|e| e.id < id);
        events.insert(pos, event);
        id
    }

    /// Get all events (cloned)
    pub fn events(&self) -> Vec<Event> {
        self.events.read().clone()
    }

    /// Filter events by node name
    pub fn filter_node(&self, node: &str) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| e.kind.node() == Some(node))
            .collect()
    }

    /// Filter step-level events only
    pub fn step_events(&self) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| e.kind.is_step_event())
            .collect()
    }

    /// Captured output lines for one node, in emission order
    pub fn output_lines(&self, node: &str, stream: OutputStream) -> Vec<String> {
        self.events
            .read()
            .iter()
            .filter_map(|e| match &e.kind {
                EventKind::CommandOutput {
                    node: n,
                    stream: s,
                    line,
                } if &**n == node && *s == stream => Some(line.clone()),
                _ => None,
            })
            .collect()
    }

    /// Serialize to JSON for persistence/debugging
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self.events()).unwrap_or(Value::Null)
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog").field("len", &self.len()).finish()
    }
}
