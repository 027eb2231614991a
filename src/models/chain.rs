// Chain descriptors
// The two chaining inputs, read fresh from the live document on every invocation

//! # Chain Descriptors
//!
//! Two syntaxes produce follow-up commands:
//!
//! - **Attribute slots** on the invoking node ([`ChainSlots`]): an
//!   unconditional list, a success list, an error list and a completion list,
//!   each comma-separated, plus a shared target override and state override.
//! - **Chain nodes** ([`ChainNodeSpec`]): child elements of the invoker, each
//!   with its own command, target, condition, delay and once flag, possibly
//!   nesting further chain nodes.
//!
//! Both are plain snapshots of markup; the engine decides what to do with them.

use std::time::Duration;
use tracing::warn;

use super::command::split_command_list;
use super::markup::MarkupNames;
use super::result::ExecutionResult;
use super::state::CommandState;
use crate::document::{DocumentTree, NodeId};

/// Condition under which a declarative chain node fires, evaluated against
/// its parent's result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChainCondition {
    #[default]
    Always,
    OnSuccess,
    OnError,
}

impl ChainCondition {
    /// Parse the condition attribute. A missing attribute means `Always`;
    /// an unrecognized value yields `None`.
    pub fn from_attribute(raw: Option<&str>) -> Option<Self> {
        match raw.map(|value| value.trim().to_ascii_lowercase()) {
            None => Some(ChainCondition::Always),
            Some(value) => match value.as_str() {
                "" | "always" => Some(ChainCondition::Always),
                "success" => Some(ChainCondition::OnSuccess),
                "error" => Some(ChainCondition::OnError),
                _ => None,
            },
        }
    }

    pub fn is_satisfied_by(&self, parent: &ExecutionResult) -> bool {
        match self {
            ChainCondition::Always => true,
            ChainCondition::OnSuccess => parent.success,
            ChainCondition::OnError => !parent.success,
        }
    }
}

/// One attribute-derived follow-up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FollowUp {
    pub command: String,
    pub target_id: Option<String>,
    pub state: CommandState,
}

/// Attribute chaining configuration of one invoker, read once per invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainSlots {
    pub then: Vec<String>,
    pub on_success: Vec<String>,
    pub on_error: Vec<String>,
    pub on_complete: Vec<String>,
    pub target: Option<String>,
    pub state: Option<CommandState>,
}

impl ChainSlots {
    pub fn read(document: &dyn DocumentTree, node: NodeId, names: &MarkupNames) -> Self {
        let list = |name: &str| {
            document
                .attribute(node, name)
                .map(|raw| split_command_list(&raw))
                .unwrap_or_default()
        };

        let state = document
            .attribute(node, &names.then_state)
            .and_then(|raw| match raw.parse::<CommandState>() {
                Ok(state) => Some(state),
                Err(err) => {
                    warn!(attribute = %names.then_state, %err, "Ignoring invalid follow-up state");
                    None
                }
            });

        Self {
            then: list(&names.and_then),
            on_success: list(&names.after_success),
            on_error: list(&names.after_error),
            on_complete: list(&names.after_complete),
            target: document
                .attribute(node, &names.then_target)
                .map(|raw| raw.trim().to_string())
                .filter(|raw| !raw.is_empty()),
            state,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.then.is_empty()
            && self.on_success.is_empty()
            && self.on_error.is_empty()
            && self.on_complete.is_empty()
    }

    /// Follow-ups selected by `result`, in slot order: unconditional, then
    /// success or error, then completion.
    pub fn follow_ups(&self, result: &ExecutionResult) -> Vec<FollowUp> {
        let conditional = if result.success {
            &self.on_success
        } else {
            &self.on_error
        };

        self.then
            .iter()
            .chain(conditional.iter())
            .chain(self.on_complete.iter())
            .map(|command| FollowUp {
                command: command.clone(),
                target_id: self.target.clone(),
                state: self.state.unwrap_or_default(),
            })
            .collect()
    }
}

/// Snapshot of one declarative chain node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainNodeSpec {
    pub node: NodeId,
    pub command: Option<String>,
    pub target: Option<String>,
    /// `None` when the condition attribute holds an unrecognized value
    pub condition: Option<ChainCondition>,
    pub condition_raw: Option<String>,
    pub delay: Option<Duration>,
    pub once: bool,
    pub state: CommandState,
}

impl ChainNodeSpec {
    pub fn read(document: &dyn DocumentTree, node: NodeId, names: &MarkupNames) -> Self {
        let non_empty = |name: &str| {
            document
                .attribute(node, name)
                .map(|raw| raw.trim().to_string())
                .filter(|raw| !raw.is_empty())
        };

        let condition_raw = document.attribute(node, &names.chain_condition);
        let delay = non_empty(&names.chain_delay).and_then(|raw| {
            let parsed = parse_delay(&raw);
            if parsed.is_none() {
                warn!(delay = %raw, "Ignoring unparseable chain delay");
            }
            parsed
        });
        let once = document
            .attribute(node, &names.chain_once)
            .map(|raw| !raw.trim().eq_ignore_ascii_case("false"))
            .unwrap_or(false);
        let state = non_empty(&names.chain_state)
            .and_then(|raw| raw.parse().ok())
            .unwrap_or_default();

        Self {
            node,
            command: non_empty(&names.command),
            target: non_empty(&names.target),
            condition: ChainCondition::from_attribute(condition_raw.as_deref()),
            condition_raw,
            delay,
            once,
            state,
        }
    }
}

/// Parse a delay attribute: plain milliseconds, or a number suffixed with `ms` or `s`
pub fn parse_delay(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    if let Some(ms) = raw.strip_suffix("ms") {
        return ms.trim().parse::<u64>().ok().map(Duration::from_millis);
    }
    if let Some(secs) = raw.strip_suffix('s') {
        return secs
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|secs| secs.is_finite() && *secs >= 0.0)
            .map(Duration::from_secs_f64);
    }
    raw.parse::<u64>().ok().map(Duration::from_millis)
}
