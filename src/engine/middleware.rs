// Command middleware
// Hooks that wrap every action invocation that passed validation and the state gate

use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

use super::context::CommandContext;
use super::pipeline::panic_message;
use crate::models::{ExecutionError, ExecutionResult};

/// Hooks around the action call.
///
/// `before` hooks run in registration order under the same timeout and panic
/// capture as the action; the first error or panic fails the invocation
/// without running the action (it is then treated like any other action
/// failure, so error chains and degradation apply). `after` hooks see every
/// result, including failures raised by a `before` hook.
#[async_trait]
pub trait CommandMiddleware: Send + Sync {
    async fn before(&self, _context: &CommandContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn after(&self, _context: &CommandContext, _result: &ExecutionResult) {}
}

/// Ordered middleware chain
#[derive(Default)]
pub struct MiddlewareStack {
    layers: RwLock<Vec<Arc<dyn CommandMiddleware>>>,
}

impl MiddlewareStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, layer: Arc<dyn CommandMiddleware>) {
        self.layers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(layer);
    }

    pub fn len(&self) -> usize {
        self.layers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<Arc<dyn CommandMiddleware>> {
        self.layers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) async fn before(&self, context: &CommandContext) -> Result<(), ExecutionError> {
        for layer in self.snapshot() {
            if let Err(err) = layer.before(context).await {
                debug!(command = %context.command(), %err, "Middleware refused command");
                return Err(ExecutionError::Failed(format!("{err:#}")));
            }
        }
        Ok(())
    }

    /// Run every `after` hook. A hook that panics or outlives `limit` is
    /// logged and the remaining hooks still run.
    pub(crate) async fn after(&self, context: &CommandContext, result: &ExecutionResult, limit: Duration) {
        for layer in self.snapshot() {
            let hook = AssertUnwindSafe(layer.after(context, result)).catch_unwind();
            match tokio::time::timeout(limit, hook).await {
                Ok(Ok(())) => {}
                Ok(Err(payload)) => warn!(
                    command = %context.command(),
                    panic = %panic_message(payload.as_ref()),
                    "Middleware after hook panicked"
                ),
                Err(_) => warn!(
                    command = %context.command(),
                    ?limit,
                    "Middleware after hook timed out"
                ),
            }
        }
    }
}
