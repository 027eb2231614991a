// Command lifecycle states
//
// Every (command, target) pair carries one of four states. The default is
// `active`; `once` turns into `completed` after one successful run; `disabled`
// sticks until explicitly cleared; `completed` is terminal.
//
//     active ──success──▶ (stays active)
//     once ────success──▶ completed
//     disabled ─────────▶ (cleared only by an explicit reset)
//     completed ────────▶ (terminal)

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::InvokerError;

/// Lifecycle state of one (command, target) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandState {
    #[default]
    Active,
    Once,
    Disabled,
    Completed,
}

impl CommandState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandState::Active => "active",
            CommandState::Once => "once",
            CommandState::Disabled => "disabled",
            CommandState::Completed => "completed",
        }
    }

    /// Whether a command in this state may run
    pub fn is_eligible(&self) -> bool {
        matches!(self, CommandState::Active | CommandState::Once)
    }

    /// Whether a stored state may be replaced by `next`.
    ///
    /// Nothing leaves `completed`.
    pub fn can_transition_to(&self, next: CommandState) -> bool {
        *self != CommandState::Completed || next == CommandState::Completed
    }
}

impl fmt::Display for CommandState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandState {
    type Err = InvokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(CommandState::Active),
            "once" => Ok(CommandState::Once),
            "disabled" => Ok(CommandState::Disabled),
            "completed" => Ok(CommandState::Completed),
            other => Err(InvokerError::InvalidState(other.to_string())),
        }
    }
}

/// Identity of one lifecycle slot: `command + ":" + targetIdentity`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StateKey(String);

impl StateKey {
    pub fn new(command: &str, target_identity: &str) -> Self {
        StateKey(format!("{command}:{target_identity}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
