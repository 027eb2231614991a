// Reserved markup names
// Every attribute and tag the engine reads or writes, enumerated in one place

use serde::{Deserialize, Serialize};

/// Attribute and tag names making up the declarative markup contract.
///
/// The defaults follow the conventional invoker vocabulary; all of them can
/// be overridden through [`EngineConfig`](crate::EngineConfig).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkupNames {
    /// Command attribute on invokers and on chain nodes
    pub command: String,
    /// Target reference on invokers and on chain nodes
    pub target: String,
    /// Per-invoker state override consulted before running a command
    pub invoker_state: String,

    // Attribute-derived chaining slots
    pub and_then: String,
    pub after_success: String,
    pub after_error: String,
    pub after_complete: String,
    pub then_target: String,
    pub then_state: String,

    // Declarative chain nodes
    pub chain_tag: String,
    pub chain_condition: String,
    pub chain_delay: String,
    pub chain_once: String,
    pub chain_state: String,

    /// Groups invokers for `manage_group_state`
    pub group: String,
}

impl Default for MarkupNames {
    fn default() -> Self {
        Self {
            command: "command".to_string(),
            target: "commandfor".to_string(),
            invoker_state: "data-state".to_string(),
            and_then: "data-and-then".to_string(),
            after_success: "data-after-success".to_string(),
            after_error: "data-after-error".to_string(),
            after_complete: "data-after-complete".to_string(),
            then_target: "data-then-target".to_string(),
            then_state: "data-then-state".to_string(),
            chain_tag: "and-then".to_string(),
            chain_condition: "data-condition".to_string(),
            chain_delay: "data-delay".to_string(),
            chain_once: "data-once".to_string(),
            chain_state: "data-state".to_string(),
            group: "data-group".to_string(),
        }
    }
}
