// Serial follow-up scheduler
// Attribute follow-ups run one at a time, in the order they were scheduled

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::pipeline::{CommandEngine, Invocation, Origin};
use crate::document::NodeId;
use crate::models::CommandState;

type Tail = Shared<BoxFuture<'static, ()>>;

/// FIFO queue of asynchronous steps.
///
/// Each step starts only after the previous one has finished, whether it
/// succeeded, failed or panicked. Steps run on their own tasks so the caller
/// that enqueues them never waits.
pub struct Scheduler {
    tail: Mutex<Tail>,
    pending: Arc<AtomicUsize>,
    detached: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            tail: Mutex::new(futures::future::ready(()).boxed().shared()),
            pending: Arc::new(AtomicUsize::new(0)),
            detached: Mutex::new(Vec::new()),
        }
    }

    /// Append `step` to the queue
    pub fn enqueue<F>(&self, step: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tail = self.tail.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = tail.clone();
        let guard = PendingGuard::new(self.pending.clone());

        let handle = tokio::spawn(async move {
            let _guard = guard;
            previous.await;
            step.await;
        });

        *tail = async move {
            if let Err(err) = handle.await {
                warn!(%err, "Scheduled step did not finish cleanly");
            }
        }
        .boxed()
        .shared();
    }

    /// Run `task` outside the queue; [`idle`](Self::idle) still waits for it
    pub fn spawn_detached<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut detached = self.detached.lock().unwrap_or_else(PoisonError::into_inner);
        detached.retain(|handle| !handle.is_finished());
        detached.push(tokio::spawn(task));
    }

    /// Steps enqueued but not yet finished
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Wait until the queue is drained and every detached task has ended.
    /// Work scheduled while waiting is waited for as well.
    pub async fn idle(&self) {
        loop {
            let tail = self
                .tail
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            tail.await;

            let detached: Vec<JoinHandle<()>> = std::mem::take(
                &mut *self.detached.lock().unwrap_or_else(PoisonError::into_inner),
            );
            let had_detached = !detached.is_empty();
            for handle in detached {
                if let Err(err) = handle.await {
                    warn!(%err, "Detached task did not finish cleanly");
                }
            }

            if !had_detached && self.pending() == 0 {
                break;
            }
        }
    }
}

/// Decrements the pending count when a step ends, including by panic
struct PendingGuard(Arc<AtomicUsize>);

impl PendingGuard {
    fn new(pending: Arc<AtomicUsize>) -> Self {
        pending.fetch_add(1, Ordering::SeqCst);
        Self(pending)
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandEngine {
    /// Queue one attribute follow-up.
    ///
    /// The stored and declared states are checked at scheduling time; a
    /// `once` follow-up claims its key immediately so a second scheduling
    /// before the first runs is a no-op. Returns whether anything was queued.
    pub(crate) fn schedule(
        &self,
        command: &str,
        target_id: &str,
        state: CommandState,
        fallback: Option<NodeId>,
    ) -> bool {
        let inner = &self.inner;
        let key = self.state_key(command, target_id);

        let stored = inner.states.get(&key);
        let blocking = if !stored.is_eligible() {
            Some(stored)
        } else if !state.is_eligible() {
            Some(state)
        } else {
            None
        };
        if let Some(blocking) = blocking {
            debug!(command, target = %target_id, state = %blocking, "Follow-up not eligible; not scheduling");
            inner
                .events
                .emit_skipped(command, Some(target_id.to_string()), true, blocking);
            return false;
        }

        let claimed = state == CommandState::Once;
        if claimed {
            inner.states.mark_completed(&key);
        }

        let engine = self.clone();
        let command = command.to_string();
        let target_id = target_id.to_string();
        inner.scheduler.enqueue(async move {
            let target = engine.resolve_follow_up_target(&target_id, fallback);
            let invocation = Invocation::chained(
                command,
                target,
                target_id,
                Origin::Scheduled { claimed },
            );
            if let Err(err) = engine.run(invocation).await {
                debug!(%err, "Scheduled follow-up rejected");
            }
        });
        true
    }

    /// Resolve a follow-up target when its step runs, so nodes added or
    /// removed in the meantime are seen.
    fn resolve_follow_up_target(&self, target_id: &str, fallback: Option<NodeId>) -> Option<NodeId> {
        let document = &self.inner.document;
        document
            .resolve_targets(target_id)
            .into_iter()
            .next()
            .or_else(|| {
                fallback.filter(|node| document.element_id(*node).as_deref() == Some(target_id))
            })
    }
}
