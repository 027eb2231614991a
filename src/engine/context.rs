// Per-invocation context and the trigger contract

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::pipeline::CommandEngine;
use crate::document::{DocumentTree, NodeId};
use crate::models::{CommandName, MarkupNames};
use crate::Result;

/// What a trigger source hands the engine for one user interaction.
///
/// The engine calls [`prevent_default`](InvokeEvent::prevent_default) once it
/// recognizes the command, so the trigger source can suppress its own default
/// reaction.
#[derive(Debug, Clone)]
pub struct InvokeEvent {
    command: String,
    source: Option<NodeId>,
    target: Option<NodeId>,
    default_prevented: Arc<AtomicBool>,
}

impl InvokeEvent {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            source: None,
            target: None,
            default_prevented: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_source(mut self, source: NodeId) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_target(mut self, target: NodeId) -> Self {
        self.target = Some(target);
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn source(&self) -> Option<NodeId> {
        self.source
    }

    pub fn target(&self) -> Option<NodeId> {
        self.target
    }

    pub fn prevent_default(&self) {
        self.default_prevented.store(true, Ordering::SeqCst);
    }

    pub fn default_prevented(&self) -> bool {
        self.default_prevented.load(Ordering::SeqCst)
    }

    pub(crate) fn default_prevented_flag(&self) -> Arc<AtomicBool> {
        self.default_prevented.clone()
    }
}

/// Everything an action sees about the invocation that called it.
///
/// Built fresh per invocation and owned by it.
#[derive(Clone)]
pub struct CommandContext {
    pub(crate) command: String,
    pub(crate) name: CommandName,
    pub(crate) params: Vec<String>,
    pub(crate) source: Option<NodeId>,
    pub(crate) target: NodeId,
    pub(crate) target_reference: Option<String>,
    pub(crate) document: Arc<dyn DocumentTree>,
    pub(crate) markup: Arc<MarkupNames>,
    pub(crate) engine: CommandEngine,
}

impl CommandContext {
    /// The full invoked command string, parameters included
    pub fn command(&self) -> &str {
        &self.command
    }

    /// The registered name the command resolved to
    pub fn name(&self) -> &CommandName {
        &self.name
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn param(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(String::as_str)
    }

    /// The invoking node; `None` for chained and programmatic invocations
    pub fn source(&self) -> Option<NodeId> {
        self.source
    }

    /// The primary target
    pub fn target(&self) -> NodeId {
        self.target
    }

    pub fn document(&self) -> &Arc<dyn DocumentTree> {
        &self.document
    }

    /// The engine running this command, for actions that trigger further commands
    pub fn engine(&self) -> &CommandEngine {
        &self.engine
    }

    /// The current target set, re-resolved against the live tree on every call
    pub fn targets(&self) -> Vec<NodeId> {
        let resolved: Vec<NodeId> = self
            .target_reference
            .as_deref()
            .map(|reference| self.document.resolve_targets(reference))
            .unwrap_or_default();

        if resolved.is_empty() && self.document.is_connected(self.target) {
            vec![self.target]
        } else {
            resolved
        }
    }

    /// Reflect expansion state on the invoker (`aria-expanded`)
    pub fn update_aria_state(&self, expanded: bool) -> Result<()> {
        match self.source {
            Some(source) => {
                self.document
                    .set_attribute(source, "aria-expanded", if expanded { "true" } else { "false" })
            }
            None => Ok(()),
        }
    }

    /// Make the invoker the only expanded member of its group.
    ///
    /// Group membership is the invoker's group attribute; every other
    /// connected node with the same value is collapsed.
    pub fn manage_group_state(&self) -> Result<()> {
        let Some(source) = self.source else {
            return Ok(());
        };
        let Some(group) = self.document.attribute(source, &self.markup.group) else {
            return Ok(());
        };

        let others = self
            .group_members(&group)
            .into_iter()
            .filter(|member| *member != source);
        for member in others {
            self.document.set_attribute(member, "aria-expanded", "false")?;
        }
        self.document.set_attribute(source, "aria-expanded", "true")
    }

    fn group_members(&self, group: &str) -> Vec<NodeId> {
        let mut members = Vec::new();
        let mut stack = vec![self.document.root()];
        while let Some(node) = stack.pop() {
            if self.document.attribute(node, &self.markup.group).as_deref() == Some(group) {
                members.push(node);
            }
            stack.extend(self.document.children(node).into_iter().rev());
        }
        members
    }

    /// Structural validation run before the action: the target must still be
    /// attached to the live tree.
    pub(crate) fn validate(&self) -> std::result::Result<(), String> {
        if !self.document.is_connected(self.target) {
            return Err(format!(
                "target {} is not attached to the document",
                self.document.identity(self.target)
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for CommandContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandContext")
            .field("command", &self.command)
            .field("name", &self.name)
            .field("params", &self.params)
            .field("source", &self.source)
            .field("target", &self.target)
            .finish()
    }
}
