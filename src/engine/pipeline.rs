// Command execution pipeline
// Validation -> rate check -> resolution -> state gate -> callback -> chaining

//! # Command Engine
//!
//! [`CommandEngine`] runs one invocation through a fixed sequence:
//!
//! 1. Reject an empty command string.
//! 2. Record the execution with the rate monitor; refuse above the ceiling.
//! 3. Resolve the command (longest prefix); unknown commands log suggestions.
//! 4. Build the [`CommandContext`] and validate the target.
//! 5. Gate on the (command, target) lifecycle state.
//! 6. Run the middleware `before` hooks and the action together under the
//!    callback timeout, then the `after` hooks.
//! 7. On success, move a `once` key to `completed`.
//! 8. On failure, apply graceful degradation to the invoker.
//! 9. Hand the result to the chain engine.
//!
//! Steps 1 to 8 live in [`CommandEngine::run`]; step 9 is done by the entry
//! points ([`dispatch`](CommandEngine::dispatch) and
//! [`execute_command`](CommandEngine::execute_command)) because chain nodes
//! run their own children instead.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use super::context::{CommandContext, InvokeEvent};
use super::events::{CommandEvent, EventBus};
use super::middleware::{CommandMiddleware, MiddlewareStack};
use super::rate::{RateMonitor, RateStats};
use super::registry::{AsyncFnHandler, CommandHandler, CommandRegistry, SyncFnHandler};
use super::scheduler::Scheduler;
use super::state::StateStore;
use crate::config::EngineConfig;
use crate::document::{DocumentTree, NodeId};
use crate::models::{
    CommandName, CommandState, ExecutionError, ExecutionResult, MarkupNames, StateKey,
};
use crate::{InvokerError, Result};

/// Reflected toggle attributes repaired after a failed command
const TOGGLE_ATTRIBUTES: &[&str] = &[PRESSED_ATTRIBUTE, "aria-expanded"];
const PRESSED_ATTRIBUTE: &str = "aria-pressed";

/// How an invocation entered the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Origin {
    /// From a trigger source or the programmatic entry point
    Direct,
    /// From the scheduler. `claimed` means the scheduler already moved the
    /// state key to `completed` on this invocation's behalf.
    Scheduled { claimed: bool },
    /// From a declarative chain node
    ChainNode,
}

pub(crate) struct Invocation {
    pub command: String,
    pub source: Option<NodeId>,
    pub target: Option<NodeId>,
    pub target_reference: Option<String>,
    pub origin: Origin,
    pub default_prevented: Option<Arc<AtomicBool>>,
}

impl Invocation {
    pub fn chained(command: String, target: Option<NodeId>, target_reference: String, origin: Origin) -> Self {
        Self {
            command,
            source: None,
            target,
            target_reference: Some(target_reference),
            origin,
            default_prevented: None,
        }
    }

    fn is_chained(&self) -> bool {
        self.origin != Origin::Direct
    }
}

/// What happened to an invocation that passed the structural checks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The action ran (or failed validation); chaining follows
    Executed(ExecutionResult),
    /// The lifecycle state forbade running; nothing happened
    Skipped(CommandState),
}

impl DispatchOutcome {
    pub fn result(&self) -> Option<&ExecutionResult> {
        match self {
            DispatchOutcome::Executed(result) => Some(result),
            DispatchOutcome::Skipped(_) => None,
        }
    }
}

pub(crate) struct EngineInner {
    pub config: EngineConfig,
    pub markup: Arc<MarkupNames>,
    pub document: Arc<dyn DocumentTree>,
    pub registry: CommandRegistry,
    pub middleware: MiddlewareStack,
    pub states: StateStore,
    pub rate: RateMonitor,
    pub scheduler: Scheduler,
    pub events: EventBus,
}

/// Command dispatch and chaining engine.
///
/// Cheap to clone; clones share the same registry, state, rate window and
/// scheduler queue. Construct one per document and hand it to whatever owns
/// the trigger source.
#[derive(Clone)]
pub struct CommandEngine {
    pub(crate) inner: Arc<EngineInner>,
}

impl CommandEngine {
    pub fn new(document: Arc<dyn DocumentTree>) -> Self {
        Self::with_config(document, EngineConfig::default())
    }

    pub fn with_config(document: Arc<dyn DocumentTree>, config: EngineConfig) -> Self {
        let inner = EngineInner {
            markup: Arc::new(config.markup.clone()),
            registry: CommandRegistry::new(),
            middleware: MiddlewareStack::new(),
            states: StateStore::new(),
            rate: RateMonitor::new(config.rate_limit, config.rate_window),
            scheduler: Scheduler::new(),
            events: EventBus::new(config.event_buffer_size),
            document,
            config,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Register an async action. Returns `false` when the name is refused.
    pub fn register<F, Fut>(&self, name: &str, action: F) -> bool
    where
        F: Fn(CommandContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.register_handler(name, Arc::new(AsyncFnHandler(action)))
    }

    /// Register a synchronous action
    pub fn register_fn<F>(&self, name: &str, action: F) -> bool
    where
        F: Fn(&CommandContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register_handler(name, Arc::new(SyncFnHandler(action)))
    }

    pub fn register_handler(&self, name: &str, handler: Arc<dyn CommandHandler>) -> bool {
        self.inner.registry.register(name, handler).is_some()
    }

    /// Append a middleware layer; layers run in the order they were added
    pub fn add_middleware(&self, layer: Arc<dyn CommandMiddleware>) {
        self.inner.middleware.push(layer);
    }

    /// Clear the whole registry
    pub fn reset(&self) {
        self.inner.registry.reset();
    }

    pub fn registered_commands(&self) -> Vec<String> {
        self.inner.registry.names()
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.inner.registry
    }

    /// Execution rate over the trailing window
    pub fn stats(&self) -> RateStats {
        self.inner.rate.stats()
    }

    /// Forget every execution in the rate window
    pub fn reset_stats(&self) {
        self.inner.rate.reset();
    }

    pub fn document(&self) -> &Arc<dyn DocumentTree> {
        &self.inner.document
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn states(&self) -> &StateStore {
        &self.inner.states
    }

    /// Set the lifecycle state of `command` on the target with the given identity
    pub fn set_command_state(&self, command: &str, target_identity: &str, state: CommandState) -> bool {
        self.inner.states.set(&self.state_key(command, target_identity), state)
    }

    pub fn command_state(&self, command: &str, target_identity: &str) -> CommandState {
        self.inner.states.get(&self.state_key(command, target_identity))
    }

    /// Return a key to `active`, lifting `disabled` or `completed`
    pub fn clear_command_state(&self, command: &str, target_identity: &str) {
        self.inner.states.clear(&self.state_key(command, target_identity));
    }

    /// Return every key to `active`
    pub fn reset_states(&self) {
        self.inner.states.reset();
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CommandEvent> {
        self.inner.events.subscribe()
    }

    /// Wait until every scheduled step and delayed chain branch has settled
    pub async fn wait_for_idle(&self) {
        self.inner.scheduler.idle().await;
    }

    /// Handle one trigger. Never returns an error: rejections are logged.
    ///
    /// Returns the execution result, or `None` when nothing ran.
    pub async fn dispatch(&self, event: &InvokeEvent) -> Option<ExecutionResult> {
        let document = &self.inner.document;
        let reference = match event.target() {
            Some(_) => None,
            None => event
                .source()
                .and_then(|source| document.attribute(source, &self.inner.markup.target)),
        };
        let target = event.target().or_else(|| {
            reference
                .as_deref()
                .and_then(|reference| document.resolve_targets(reference).into_iter().next())
        });

        let invocation = Invocation {
            command: event.command().to_string(),
            source: event.source(),
            target,
            target_reference: reference,
            origin: Origin::Direct,
            default_prevented: Some(event.default_prevented_flag()),
        };

        match self.run(invocation).await {
            Ok(DispatchOutcome::Executed(result)) => {
                if let Some(source) = event.source() {
                    self.process_chain(source, &result, target).await;
                }
                Some(result)
            }
            Ok(DispatchOutcome::Skipped(_)) => None,
            Err(err) => {
                debug!(command = %event.command(), %err, "Trigger rejected");
                None
            }
        }
    }

    /// Programmatic entry point: run `command` on the node identified by
    /// `target_id`, optionally on behalf of `source` (whose chain markup is
    /// then honored).
    ///
    /// Unlike [`dispatch`](Self::dispatch) this reports structural and
    /// systemic rejections as errors.
    pub async fn execute_command(
        &self,
        command: &str,
        target_id: &str,
        source: Option<NodeId>,
    ) -> Result<DispatchOutcome> {
        if command.trim().is_empty() {
            warn!("Ignoring empty command string. Pass a command such as \"--toggle\"");
            return Err(InvokerError::EmptyCommand);
        }
        let Some(target) = self.inner.document.resolve_targets(target_id).into_iter().next() else {
            // a missing target still counts toward the rate window
            self.admit(command.trim(), Some(target_id.to_string()), false)?;
            warn!(command, target = %target_id, "Target not found. Check the id exists in the document");
            return Err(InvokerError::TargetNotFound(target_id.to_string()));
        };

        let invocation = Invocation {
            command: command.to_string(),
            source,
            target: Some(target),
            target_reference: Some(target_id.to_string()),
            origin: Origin::Direct,
            default_prevented: None,
        };

        let outcome = self.run(invocation).await?;
        if let (DispatchOutcome::Executed(result), Some(source)) = (&outcome, source) {
            self.process_chain(source, result, Some(target)).await;
        }
        Ok(outcome)
    }

    /// Steps 1 to 8 for one invocation
    pub(crate) fn run(&self, invocation: Invocation) -> BoxFuture<'static, Result<DispatchOutcome>> {
        let engine = self.clone();
        async move { engine.run_inner(invocation).await }.boxed()
    }

    async fn run_inner(&self, invocation: Invocation) -> Result<DispatchOutcome> {
        let inner = &self.inner;
        let chained = invocation.is_chained();
        let target_label = invocation
            .target
            .map(|target| inner.document.identity(target))
            .or_else(|| invocation.target_reference.clone());

        let command = invocation.command.trim();
        if command.is_empty() {
            warn!("Ignoring empty command string. Set a command such as command=\"--toggle\"");
            inner
                .events
                .emit_rejected("", target_label, chained, "empty command".to_string());
            return Err(InvokerError::EmptyCommand);
        }

        self.admit(command, target_label.clone(), chained)?;

        let Some(resolved) = inner.registry.resolve(command) else {
            let suggestions = inner.registry.suggestions(command, 3);
            if suggestions.is_empty() {
                warn!(command, "Unknown command. Register it before invoking it");
            } else {
                warn!(
                    command,
                    suggestions = %suggestions.join(", "),
                    "Unknown command. Did you mean one of the suggestions?"
                );
            }
            inner.events.emit_rejected(
                command,
                target_label,
                chained,
                "unknown command".to_string(),
            );
            return Err(InvokerError::UnknownCommand {
                command: command.to_string(),
                suggestions,
            });
        };

        if let Some(flag) = &invocation.default_prevented {
            flag.store(true, Ordering::SeqCst);
        }

        let Some(target) = invocation.target else {
            warn!(
                command,
                reference = ?invocation.target_reference,
                "Command has no target. Point the target attribute at an element id"
            );
            let result = ExecutionResult::failure(ExecutionError::Invalid(format!(
                "no target resolved for {command}"
            )));
            inner.events.emit_executed(command, target_label, chained, &result);
            return Ok(DispatchOutcome::Executed(result));
        };

        let context = CommandContext {
            command: command.to_string(),
            name: resolved.name.clone(),
            params: resolved.params.clone(),
            source: invocation.source,
            target,
            target_reference: invocation.target_reference.clone(),
            document: inner.document.clone(),
            markup: inner.markup.clone(),
            engine: self.clone(),
        };

        if let Err(reason) = context.validate() {
            warn!(command, %reason, "Command context failed validation. Make sure the target is in the document");
            let result = ExecutionResult::failure(ExecutionError::Invalid(reason));
            inner.events.emit_executed(command, target_label, chained, &result);
            return Ok(DispatchOutcome::Executed(result));
        }

        let identity = inner.document.identity(target);
        let key = StateKey::new(resolved.name.as_str(), &identity);
        let state = self.effective_state(&key, &invocation);
        if !state.is_eligible() {
            debug!(command, key = %key, %state, "Command not eligible; skipping");
            inner.events.emit_skipped(command, target_label, chained, state);
            return Ok(DispatchOutcome::Skipped(state));
        }

        debug!(command, target = %identity, chained, "Executing command");
        let hook_context = context.clone();
        let handler = resolved.handler.clone();
        let middleware = &inner.middleware;
        let call = async {
            middleware.before(&hook_context).await?;
            handler
                .call(context)
                .await
                .map_err(|err| ExecutionError::Failed(format!("{err:#}")))
        };
        let result = ExecutionResult::from(guarded(call, inner.config.command_timeout).await);

        if result.success {
            if state == CommandState::Once {
                inner.states.mark_completed(&key);
            }
        } else {
            error!(
                command,
                target = %identity,
                source = ?invocation.source.map(|source| inner.document.identity(source)),
                error = ?result.error,
                "Command failed"
            );
            self.degrade(invocation.source, &resolved.name);
        }

        inner
            .middleware
            .after(&hook_context, &result, inner.config.command_timeout)
            .await;
        inner.events.emit_executed(command, target_label, chained, &result);
        Ok(DispatchOutcome::Executed(result))
    }

    /// Record one execution with the rate monitor, refusing above the ceiling
    fn admit(&self, command: &str, target_label: Option<String>, chained: bool) -> Result<()> {
        let inner = &self.inner;
        if inner.rate.record_execution() {
            return Ok(());
        }
        let stats = inner.rate.stats();
        inner.events.emit_rejected(
            command,
            target_label,
            chained,
            "rate limit exceeded".to_string(),
        );
        Err(InvokerError::RateLimited {
            executions: stats.executions,
            window: stats.window,
        })
    }

    /// Stored state, overridden by the invoker's declared state unless the
    /// stored state is already `completed`.
    fn effective_state(&self, key: &StateKey, invocation: &Invocation) -> CommandState {
        if let Origin::Scheduled { claimed: true } = invocation.origin {
            return CommandState::Once;
        }

        let stored = self.inner.states.get(key);
        if stored == CommandState::Completed {
            return stored;
        }

        let declared = invocation.source.and_then(|source| {
            let raw = self
                .inner
                .document
                .attribute(source, &self.inner.markup.invoker_state)?;
            match raw.parse::<CommandState>() {
                Ok(state) => Some(state),
                Err(err) => {
                    warn!(%err, "Ignoring invalid invoker state override");
                    None
                }
            }
        });

        declared.unwrap_or(stored)
    }

    /// Best-effort repair of the invoker after a failed command. Never fails.
    ///
    /// Toggle attributes holding anything but `true`, `false` or `mixed` are
    /// reset to `false`. An invoker of a toggle command always ends up with a
    /// defined `aria-pressed`, even when it had none.
    fn degrade(&self, source: Option<NodeId>, command: &CommandName) {
        let Some(source) = source else {
            return;
        };
        let document = &self.inner.document;
        let toggles = command.is_toggle();

        for attribute in TOGGLE_ATTRIBUTES {
            let defined = match document.attribute(source, attribute) {
                Some(value) => matches!(value.trim(), "true" | "false" | "mixed"),
                None => !(toggles && *attribute == PRESSED_ATTRIBUTE),
            };
            if !defined {
                if let Err(err) = document.set_attribute(source, attribute, "false") {
                    debug!(%err, attribute, "Could not reset toggle attribute");
                }
            }
        }

        if document.has_attribute(source, "disabled") {
            let document = document.clone();
            let delay = self.inner.config.reenable_delay;
            self.inner.scheduler.spawn_detached(async move {
                tokio::time::sleep(delay).await;
                if let Err(err) = document.remove_attribute(source, "disabled") {
                    debug!(%err, "Could not re-enable invoker");
                }
            });
        }
    }

    pub(crate) fn state_key(&self, command: &str, target_identity: &str) -> StateKey {
        let name = self
            .inner
            .registry
            .resolve(command)
            .map(|resolved| resolved.name)
            .or_else(|| CommandName::normalize(command));
        match name {
            Some(name) => StateKey::new(name.as_str(), target_identity),
            None => StateKey::new(command, target_identity),
        }
    }
}

/// Run `before` hooks plus the action, turning panics and timeouts into an
/// `ExecutionError`
async fn guarded<F>(call: F, limit: Duration) -> std::result::Result<(), ExecutionError>
where
    F: Future<Output = std::result::Result<(), ExecutionError>>,
{
    match tokio::time::timeout(limit, AssertUnwindSafe(call).catch_unwind()).await {
        Err(_) => Err(ExecutionError::TimedOut(limit)),
        Ok(Err(payload)) => Err(ExecutionError::Panicked(panic_message(payload.as_ref()))),
        Ok(Ok(outcome)) => outcome,
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| message.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
