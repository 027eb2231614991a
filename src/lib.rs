// Command Invokers - Rust Edition
// Declarative command dispatch and chaining over a live document tree

//! # Command Invokers Library
//!
//! This is the library crate for the command dispatch and chaining engine.
//! Markup on a document tree names a command (`--toggle`, `--dom:remove`, ...)
//! and a target; the engine resolves the command, runs it, and lets the
//! outcome trigger further commands declared on the invoking node.
//!
//! ## Core Components
//!
//! ### Domain Models
//! - [`CommandName`]: Normalized command identity under the reserved `--` prefix
//! - [`CommandState`] / [`StateKey`]: Per (command, target) lifecycle state
//! - [`ExecutionResult`]: Outcome of one invocation, consumed by chaining
//! - [`ChainSlots`] / [`ChainCondition`]: Attribute and declarative chain inputs
//!
//! ### Document Layer
//! - [`DocumentTree`]: The contract the engine needs from a live node tree
//! - [`InMemoryDocument`]: Arena-backed tree for tests, tooling and the CLI
//!
//! ### Engine
//!
//! #### [`CommandEngine`] - Dispatch, Chaining and Scheduling
//!
//! The single entry point. It owns the registry, the state store, the rate
//! monitor and the serial scheduler, and is cheap to clone (an `Arc` handle):
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use command_invokers::{CommandEngine, DocumentTree, InMemoryDocument};
//!
//! # async fn demo() -> command_invokers::Result<()> {
//! let document = Arc::new(InMemoryDocument::new());
//! let engine = CommandEngine::new(document.clone());
//!
//! engine.register_fn("--say", |ctx| {
//!     ctx.document().set_text_content(ctx.target(), &ctx.params().join(":"))?;
//!     Ok(())
//! });
//!
//! let out = document.append_element(document.root(), "output", &[("id", "out")])?;
//! engine.execute_command("--say:hello", "out", None).await?;
//! assert_eq!(document.text_content(out).as_deref(), Some("hello"));
//! # Ok(())
//! # }
//! ```
//!
//! ## Rust Learning Notes:
//!
//! ### Re-exports
//! `pub use` statements create shortcuts so users don't need to know the internal
//! module structure. Instead of `use command_invokers::engine::pipeline::CommandEngine`,
//! users can write `use command_invokers::CommandEngine`.

// Core domain models (command names, states, results, chain descriptors)
pub mod models;

// Live document tree contract and the in-memory implementation
pub mod document;

// Registry, pipeline, chain engine, scheduler and friends
pub mod engine;

// Engine configuration (defaults, file and environment overrides)
pub mod config;

// Small demonstration action set used by the CLI and tests
pub mod actions;

pub use models::{
    ChainCondition,  // always / success / error gating for declarative chains
    ChainSlots,      // attribute-derived chain configuration of one invoker
    CommandName,     // normalized `--name`
    CommandState,    // active / once / disabled / completed
    ExecutionError,  // why an invocation failed
    ExecutionResult, // success flag plus optional error
    FollowUp,        // one attribute-derived follow-up descriptor
    MarkupNames,     // reserved attribute and tag names
    StateKey,        // `command:targetIdentity`
};

pub use document::{DocumentTree, InMemoryDocument, NodeId, NodeSpec};

pub use engine::{
    CommandContext, CommandEngine, CommandEvent, CommandEventKind, CommandHandler,
    CommandMiddleware, CommandRegistry, DispatchOutcome, EventBus, InvokeEvent, RateMonitor,
    RateStats, StateStore,
};

pub use config::EngineConfig;

use std::time::Duration;
use thiserror::Error;

/// Errors produced by the dispatch engine
///
/// Structural problems (bad command string, unknown command, missing target)
/// and systemic trips (rate limit, chain depth) are reported through this
/// enum. Failures raised by an action itself never surface here: they are
/// captured into an [`ExecutionResult`] so that chaining can continue.
#[derive(Error, Debug)]
pub enum InvokerError {
    /// The command string was empty or only whitespace
    #[error("Empty command string")]
    EmptyCommand,

    /// No registered command matches the invoked string
    #[error("Unknown command: {command}")]
    UnknownCommand {
        command: String,
        suggestions: Vec<String>,
    },

    /// A target reference resolved to no live node
    #[error("Target not found: {0}")]
    TargetNotFound(String),

    /// A lifecycle state string could not be parsed, or a transition was refused
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The global execution rate crossed the loop-detection ceiling
    #[error("Rate limit exceeded: {executions} executions within {window:?}")]
    RateLimited { executions: usize, window: Duration },

    /// A declarative chain nested deeper than allowed
    #[error("Chain depth {depth} exceeds maximum of {max}")]
    RecursionLimit { depth: usize, max: usize },

    /// A document tree operation failed (unknown or detached node, ...)
    #[error("Document error: {0}")]
    Document(String),

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for InvokerError {
    fn from(err: std::io::Error) -> Self {
        InvokerError::Internal(err.to_string())
    }
}

impl From<::config::ConfigError> for InvokerError {
    fn from(err: ::config::ConfigError) -> Self {
        InvokerError::Config(err.to_string())
    }
}

/// Type alias for Results that use our custom error type
pub type Result<T> = std::result::Result<T, InvokerError>;
