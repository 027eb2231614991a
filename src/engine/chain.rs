// Follow-up chaining
// Attribute slots go through the serial scheduler; declarative chain nodes run inline

//! # Chaining
//!
//! After an invocation triggered by an invoker, two kinds of follow-ups are
//! considered:
//!
//! - **Attribute follow-ups**: comma-separated command lists on the invoker,
//!   split by outcome (unconditional, success, error, completion). Each one is
//!   queued on the scheduler, so they run one after another and never overlap
//!   with follow-ups of other invocations.
//! - **Chain nodes**: child elements of the invoker with their own command,
//!   target, condition, delay and lifecycle. A node can contain further nodes,
//!   evaluated against that node's own result, down to
//!   [`EngineConfig::max_chain_depth`](crate::config::EngineConfig::max_chain_depth).

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, error, warn};

use super::pipeline::{CommandEngine, DispatchOutcome, Invocation, Origin};
use crate::document::NodeId;
use crate::models::{
    ChainNodeSpec, ChainSlots, CommandState, ExecutionError, ExecutionResult,
};
use crate::InvokerError;

impl CommandEngine {
    /// Schedule the invoker's follow-ups for `result`
    pub(crate) async fn process_chain(
        &self,
        invoker: NodeId,
        result: &ExecutionResult,
        primary_target: Option<NodeId>,
    ) {
        self.schedule_follow_ups(invoker, result, primary_target);

        let inherited_target = self
            .inner
            .document
            .attribute(invoker, &self.inner.markup.target);
        for node in self.chain_nodes(invoker) {
            self.process_chain_node(node, result.clone(), primary_target, inherited_target.clone(), 1)
                .await;
        }
    }

    fn schedule_follow_ups(
        &self,
        invoker: NodeId,
        result: &ExecutionResult,
        primary_target: Option<NodeId>,
    ) {
        let document = &self.inner.document;
        let slots = ChainSlots::read(document.as_ref(), invoker, &self.inner.markup);
        if slots.is_empty() {
            return;
        }

        let primary_id = primary_target.and_then(|target| document.element_id(target));
        for follow_up in slots.follow_ups(result) {
            let Some(target_id) = follow_up.target_id.clone().or_else(|| primary_id.clone()) else {
                warn!(
                    command = %follow_up.command,
                    "Follow-up has no target id. Give the target an id or set a follow-up target"
                );
                continue;
            };
            self.schedule(&follow_up.command, &target_id, follow_up.state, primary_target);
        }
    }

    fn chain_nodes(&self, parent: NodeId) -> Vec<NodeId> {
        self.inner
            .document
            .children_with_tag(parent, &self.inner.markup.chain_tag)
    }

    /// Evaluate one chain node against its parent's result, then its own children.
    ///
    /// `inherited_target` is the original invoker's target reference, used by
    /// nodes at any depth that name no target of their own.
    fn process_chain_node(
        &self,
        node: NodeId,
        parent_result: ExecutionResult,
        primary_target: Option<NodeId>,
        inherited_target: Option<String>,
        depth: usize,
    ) -> BoxFuture<'static, ()> {
        let engine = self.clone();
        async move {
            let spec = ChainNodeSpec::read(engine.inner.document.as_ref(), node, &engine.inner.markup);
            let max = engine.inner.config.max_chain_depth;
            if depth > max {
                let err = InvokerError::RecursionLimit { depth, max };
                error!(
                    node = %engine.inner.document.identity(node),
                    error = %err,
                    "Chain nesting too deep; flatten the chain"
                );
                engine.inner.events.emit_rejected(
                    spec.command.as_deref().unwrap_or_default(),
                    Some(engine.inner.document.identity(node)),
                    true,
                    "chain depth exceeded".to_string(),
                );
                return;
            }

            if !spec.state.is_eligible() {
                debug!(node = %node, state = %spec.state, "Chain node not eligible");
                return;
            }

            match spec.condition {
                Some(condition) if condition.is_satisfied_by(&parent_result) => {}
                Some(_) => return,
                None => {
                    warn!(
                        condition = ?spec.condition_raw,
                        "Unknown chain condition. Use always, success or error"
                    );
                    return;
                }
            }

            let Some(command) = spec.command.clone() else {
                warn!(node = %node, "Chain node has no command");
                return;
            };
            let target_reference = spec
                .target
                .clone()
                .or_else(|| inherited_target.clone())
                .or_else(|| primary_target.and_then(|target| engine.inner.document.element_id(target)));
            let Some(target_reference) = target_reference else {
                warn!(command = %command, "Chain node has no target and none to inherit");
                return;
            };

            match spec.delay {
                Some(delay) => {
                    let branch = engine.clone();
                    engine.inner.scheduler.spawn_detached(async move {
                        tokio::time::sleep(delay).await;
                        branch
                            .fire_chain_node(spec, command, target_reference, primary_target, inherited_target, depth)
                            .await;
                    });
                }
                None => {
                    engine
                        .fire_chain_node(spec, command, target_reference, primary_target, inherited_target, depth)
                        .await;
                }
            }
        }
        .boxed()
    }

    fn fire_chain_node(
        &self,
        spec: ChainNodeSpec,
        command: String,
        target_reference: String,
        primary_target: Option<NodeId>,
        inherited_target: Option<String>,
        depth: usize,
    ) -> BoxFuture<'static, ()> {
        let engine = self.clone();
        async move {
            let document = engine.inner.document.clone();
            let target = document
                .resolve_targets(&target_reference)
                .into_iter()
                .next()
                .or(primary_target.filter(|node| {
                    document.element_id(*node).as_deref() == Some(target_reference.as_str())
                }));

            let invocation = Invocation::chained(command, target, target_reference, Origin::ChainNode);
            let result = match engine.run(invocation).await {
                Ok(DispatchOutcome::Executed(result)) => result,
                Ok(DispatchOutcome::Skipped(_)) => return,
                Err(err @ InvokerError::RateLimited { .. }) => {
                    debug!(%err, "Chain branch aborted");
                    return;
                }
                Err(err) => ExecutionResult::failure(ExecutionError::Failed(err.to_string())),
            };

            if spec.once {
                if let Err(err) = document.remove(spec.node) {
                    debug!(%err, "Could not remove spent chain node");
                }
            } else if let Err(err) = document.set_attribute(
                spec.node,
                &engine.inner.markup.chain_state,
                CommandState::Completed.as_str(),
            ) {
                debug!(%err, "Could not mark chain node completed");
            }

            for child in engine.chain_nodes(spec.node) {
                engine
                    .process_chain_node(child, result.clone(), primary_target, inherited_target.clone(), depth + 1)
                    .await;
            }
        }
        .boxed()
    }
}
