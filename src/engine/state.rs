// Lifecycle state store
// Process-wide map of StateKey -> CommandState, consulted on every invocation

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::models::{CommandState, StateKey};

/// Lifecycle state per (command, target) pair.
///
/// Keys without an entry are `active`. Nothing leaves `completed`; a
/// `disabled` entry stays until [`StateStore::clear`] or [`StateStore::reset`].
#[derive(Debug, Default)]
pub struct StateStore {
    states: DashMap<StateKey, CommandState>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &StateKey) -> CommandState {
        self.states
            .get(key)
            .map(|entry| *entry.value())
            .unwrap_or_default()
    }

    /// Store `state` for `key`. Returns `false` (and leaves the entry alone)
    /// when the key is already `completed`.
    pub fn set(&self, key: &StateKey, state: CommandState) -> bool {
        let mut entry = self.states.entry(key.clone()).or_default();
        let current = *entry;
        if !current.can_transition_to(state) {
            warn!(key = %key, from = %current, to = %state, "Refusing to leave completed state");
            return false;
        }
        debug!(key = %key, from = %current, to = %state, "Command state updated");
        *entry = state;
        true
    }

    pub fn mark_completed(&self, key: &StateKey) {
        self.states.insert(key.clone(), CommandState::Completed);
        debug!(key = %key, "Command state completed");
    }

    /// Drop the entry for `key`, returning it to `active`. This is the only way
    /// out of `disabled` or `completed`.
    pub fn clear(&self, key: &StateKey) -> Option<CommandState> {
        self.states.remove(key).map(|(_, state)| state)
    }

    pub fn reset(&self) {
        self.states.clear();
    }

    /// Number of keys holding a non-default state
    pub fn len(&self) -> usize {
        self.states
            .iter()
            .filter(|entry| *entry.value() != CommandState::Active)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of all stored entries, sorted by key
    pub fn snapshot(&self) -> Vec<(StateKey, CommandState)> {
        let mut entries: Vec<(StateKey, CommandState)> = self
            .states
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}
