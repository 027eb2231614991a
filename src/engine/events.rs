// Event system for observing command dispatch

//! # Event System
//!
//! Every invocation that reaches a decision publishes a [`CommandEvent`] on a
//! broadcast channel: executed (with its success flag), rejected (structural
//! or systemic reason), or skipped because of its lifecycle state.
//! Publishing never blocks and never fails the pipeline; with no subscribers
//! the event is simply dropped.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

use crate::models::{CommandState, ExecutionResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandEventKind {
    Executed { success: bool, error: Option<String> },
    Rejected { reason: String },
    Skipped { state: CommandState },
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandEvent {
    pub id: Uuid,
    pub command: String,
    pub target: Option<String>,
    /// Whether the invocation came from a chain rather than a trigger
    pub chained: bool,
    pub kind: CommandEventKind,
    pub timestamp: DateTime<Utc>,
}

impl CommandEvent {
    fn new(command: &str, target: Option<String>, chained: bool, kind: CommandEventKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            command: command.to_string(),
            target,
            chained,
            kind,
            timestamp: Utc::now(),
        }
    }
}

/// Event bus for publishing and subscribing to command events
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CommandEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event to all current subscribers
    pub fn publish(&self, event: CommandEvent) {
        trace!(command = %event.command, kind = ?event.kind, "Command event");
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CommandEvent> {
        self.sender.subscribe()
    }

    pub fn emit_executed(
        &self,
        command: &str,
        target: Option<String>,
        chained: bool,
        result: &ExecutionResult,
    ) {
        self.publish(CommandEvent::new(
            command,
            target,
            chained,
            CommandEventKind::Executed {
                success: result.success,
                error: result.error.as_ref().map(ToString::to_string),
            },
        ));
    }

    pub fn emit_rejected(&self, command: &str, target: Option<String>, chained: bool, reason: String) {
        self.publish(CommandEvent::new(
            command,
            target,
            chained,
            CommandEventKind::Rejected { reason },
        ));
    }

    pub fn emit_skipped(&self, command: &str, target: Option<String>, chained: bool, state: CommandState) {
        self.publish(CommandEvent::new(
            command,
            target,
            chained,
            CommandEventKind::Skipped { state },
        ));
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}
