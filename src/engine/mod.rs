// Command Invokers Engine
// Dispatch pipeline, chaining, scheduling and the shared runtime state

//! # Engine Module
//!
//! Everything that happens between "a trigger fired" and "the follow-ups
//! settled" lives here. The domain models (in `models/`) describe command
//! names, states and chain markup; the engine executes them against a
//! [`DocumentTree`](crate::document::DocumentTree).
//!
//! ## Engine Components
//!
//! ### Registry (`registry` module)
//! - Normalized name -> handler map
//! - Longest-prefix resolution with `:`-delimited parameters
//! - "Did you mean" suggestions for unknown commands
//!
//! ### Pipeline (`pipeline` module)
//! - [`CommandEngine`], the single entry point
//! - Validation, rate check, state gate, timeout, panic capture, degradation
//! - [`CommandMiddleware`] hooks around each action call
//!
//! ### Chaining (`chain` module)
//! - Attribute follow-ups selected by outcome
//! - Nested declarative chain nodes with conditions, delays and depth bound
//!
//! ### Scheduler (`scheduler` module)
//! - Strict FIFO, non-overlapping execution of attribute follow-ups
//! - Detached task tracking for delayed work
//!
//! ### State, Rate and Events
//! - [`StateStore`]: lifecycle per (command, target)
//! - [`RateMonitor`]: global loop detector
//! - [`EventBus`]: broadcast of every decision the pipeline makes
//!
//! ## Rust Learning Notes:
//!
//! ### Boxed Recursive Futures
//! Chain nodes recurse into their children, and an `async fn` cannot call
//! itself directly (its future type would be infinitely sized). The chain
//! functions therefore return `BoxFuture<'static, ()>`, which puts each level
//! behind a pointer.

/// Command registry and handler trait
pub mod registry;

/// Per-invocation context handed to actions, and the trigger event
pub mod context;

/// Hooks around every action call
pub mod middleware;

/// The dispatch pipeline and the engine handle
pub mod pipeline;

/// Attribute and declarative chaining
pub mod chain;

/// Serial follow-up queue
pub mod scheduler;

/// Lifecycle state store
pub mod state;

/// Sliding-window execution rate monitor
pub mod rate;

/// Broadcast event bus
pub mod events;

#[cfg(test)]
mod tests;

pub use context::{CommandContext, InvokeEvent};
pub use events::{CommandEvent, CommandEventKind, EventBus};
pub use middleware::{CommandMiddleware, MiddlewareStack};
pub use pipeline::{CommandEngine, DispatchOutcome};
pub use rate::{RateMonitor, RateStats};
pub use registry::{CommandHandler, CommandRegistry, ResolvedCommand};
pub use scheduler::Scheduler;
pub use state::StateStore;
