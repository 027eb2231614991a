// Command registry with longest-prefix resolution

//! # Command Registry
//!
//! Maps normalized command names to handlers and resolves arbitrary invoked
//! strings to the most specific registered name.
//!
//! ## Resolution
//!
//! Names are kept sorted by descending length. An invoked string resolves to
//! the first (longest) name it equals, or that it continues with the `:`
//! parameter delimiter. With `--dom` and `--dom:remove` registered,
//! `--dom:remove:extra` resolves to `--dom:remove` with parameters `["extra"]`.
//!
//! ## Rust Learning Notes:
//!
//! ### Trait Objects for Callbacks
//! Handlers are stored as `Arc<dyn CommandHandler>`. Closures are adapted
//! into that trait by small wrapper structs, so the pipeline calls every
//! handler the same way regardless of whether it was registered as a plain
//! function or an async block.

use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, warn};

use super::context::CommandContext;
use crate::models::{levenshtein_distance, CommandName, PARAM_DELIMITER};

/// An action invoked by the engine
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn call(&self, context: CommandContext) -> anyhow::Result<()>;
}

/// Adapts an async closure into a [`CommandHandler`]
pub(crate) struct AsyncFnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> CommandHandler for AsyncFnHandler<F>
where
    F: Fn(CommandContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn call(&self, context: CommandContext) -> anyhow::Result<()> {
        (self.0)(context).await
    }
}

/// Adapts a synchronous closure into a [`CommandHandler`]
pub(crate) struct SyncFnHandler<F>(pub F);

#[async_trait]
impl<F> CommandHandler for SyncFnHandler<F>
where
    F: Fn(&CommandContext) -> anyhow::Result<()> + Send + Sync,
{
    async fn call(&self, context: CommandContext) -> anyhow::Result<()> {
        (self.0)(&context)
    }
}

/// A successful lookup: the matched name, its handler and the parsed parameters
#[derive(Clone)]
pub struct ResolvedCommand {
    pub name: CommandName,
    pub handler: Arc<dyn CommandHandler>,
    pub params: Vec<String>,
}

impl std::fmt::Debug for ResolvedCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedCommand")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish()
    }
}

#[derive(Default)]
struct RegistryState {
    commands: HashMap<CommandName, Arc<dyn CommandHandler>>,
    /// Names sorted by descending length, ties broken alphabetically
    by_length: Vec<CommandName>,
}

impl RegistryState {
    fn rebuild_order(&mut self) {
        let mut names: Vec<CommandName> = self.commands.keys().cloned().collect();
        names.sort_by(|a, b| {
            b.as_str()
                .len()
                .cmp(&a.as_str().len())
                .then_with(|| a.cmp(b))
        });
        self.by_length = names;
    }
}

/// Registry of named commands
#[derive(Default)]
pub struct CommandRegistry {
    state: RwLock<RegistryState>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under `name`.
    ///
    /// The name is trimmed and given the `--` prefix if missing. Empty names
    /// and host-native keywords are refused with a warning and `None` is
    /// returned; re-registering an existing name replaces the old handler.
    pub fn register(&self, name: &str, handler: Arc<dyn CommandHandler>) -> Option<CommandName> {
        let Some(normalized) = CommandName::normalize(name) else {
            warn!(name = %name, "Refusing to register command with an empty name");
            return None;
        };
        if normalized.is_native_keyword() {
            warn!(
                command = %normalized,
                "Refusing to register command: '{}' is a native command keyword",
                normalized.bare()
            );
            return None;
        }

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.commands.insert(normalized.clone(), handler).is_some() {
            warn!(command = %normalized, "Command re-registered; previous handler replaced");
        } else {
            debug!(command = %normalized, "Command registered");
        }
        state.rebuild_order();
        Some(normalized)
    }

    /// Resolve an invoked command string to the longest matching registered name
    pub fn resolve(&self, invoked: &str) -> Option<ResolvedCommand> {
        let invoked = CommandName::normalize(invoked)?;
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);

        let name = state
            .by_length
            .iter()
            .find(|name| name.matches(invoked.as_str()))?;
        let handler = state.commands.get(name)?.clone();

        Some(ResolvedCommand {
            name: name.clone(),
            handler,
            params: name.params_of(invoked.as_str()),
        })
    }

    /// Up to `limit` registered names similar to `invoked`: containing or
    /// contained in its leading segment, or within edit distance 2 of it.
    pub fn suggestions(&self, invoked: &str, limit: usize) -> Vec<String> {
        let Some(invoked) = CommandName::normalize(invoked) else {
            return Vec::new();
        };
        let full = invoked.bare();
        let head = full.split(PARAM_DELIMITER).next().unwrap_or(full);

        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let mut ranked: Vec<(usize, &CommandName)> = state
            .commands
            .keys()
            .filter_map(|name| {
                let bare = name.bare();
                let distance = levenshtein_distance(full, bare).min(levenshtein_distance(head, bare));
                let related = (!head.is_empty() && (bare.contains(head) || head.contains(bare)))
                    || distance <= 2;
                related.then_some((distance, name))
            })
            .collect();
        ranked.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)));

        ranked
            .into_iter()
            .take(limit)
            .map(|(_, name)| name.to_string())
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        CommandName::normalize(name)
            .map(|name| {
                self.state
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .commands
                    .contains_key(&name)
            })
            .unwrap_or(false)
    }

    /// Registered names, sorted alphabetically
    pub fn names(&self) -> Vec<String> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = state.commands.keys().map(ToString::to_string).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .commands
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every command and the cached resolution order
    pub fn reset(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.commands.clear();
        state.by_length.clear();
    }
}
