// Core domain models for the command engine
// Plain data: no locking, no async, no engine references

//! # Domain Models Module
//!
//! The data structures the engine passes around:
//!
//! - `command`: command names, the reserved prefix and parameter splitting
//! - `state`: per (command, target) lifecycle state
//! - `result`: the outcome of one invocation
//! - `chain`: attribute-derived follow-ups and declarative chain nodes
//! - `markup`: the reserved attribute and tag names read off the document

pub mod chain;
pub mod command;
pub mod markup;
pub mod result;
pub mod state;

pub use chain::{ChainCondition, ChainNodeSpec, ChainSlots, FollowUp};
pub use command::{
    levenshtein_distance, split_command_list, split_params, CommandName, COMMAND_PREFIX,
    NATIVE_COMMANDS, PARAM_DELIMITER,
};
pub use markup::MarkupNames;
pub use result::{ExecutionError, ExecutionResult};
pub use state::{CommandState, StateKey};
