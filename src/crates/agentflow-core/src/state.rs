//! Scoped key/value state shared between handlers of a run.
//!
//! State is the only shared mutable surface in a run. It is organized as a
//! two-level map: a [`ScopeId`] names a namespace, and each scope maps string
//! keys to opaque JSON values.
//!
//! Two scope shapes exist:
//!
//! - **Private** - one per executor, keyed by executor id. Used for handler
//!   accumulators and anything an executor wants checkpointed.
//! - **Shared** - named scopes visible to any executor that names them. The
//!   executor id plays no part in shared-scope equality.
//!
//! Handlers never write directly: writes are queued in the
//! [`WorkflowContext`](crate::context::WorkflowContext) and applied
//! atomically when the handler returns successfully. A handler that fails
//! leaves state untouched.

use serde_json::Value;
use std::collections::HashMap;

/// Names one state namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScopeId {
    /// An executor's private scope.
    Private(String),

    /// A named scope shared across executors.
    Shared(String),
}

impl ScopeId {
    /// The private scope of an executor.
    pub fn private(executor_id: impl Into<String>) -> Self {
        Self::Private(executor_id.into())
    }

    /// A shared scope by name.
    pub fn shared(name: impl Into<String>) -> Self {
        Self::Shared(name.into())
    }

    /// Stable string encoding used in checkpoints.
    pub fn storage_key(&self) -> String {
        match self {
            Self::Private(id) => format!("private:{id}"),
            Self::Shared(name) => format!("shared:{name}"),
        }
    }

    /// Inverse of [`storage_key`](Self::storage_key).
    pub fn from_storage_key(key: &str) -> Option<Self> {
        key.strip_prefix("private:")
            .map(Self::private)
            .or_else(|| key.strip_prefix("shared:").map(Self::shared))
    }
}

/// The applied state of one run: `ScopeId -> (key -> value)`.
#[derive(Debug, Clone, Default)]
pub struct RunState {
    scopes: HashMap<ScopeId, HashMap<String, Value>>,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the current value of a scope key.
    pub fn read(&self, scope: &ScopeId, key: &str) -> Option<Value> {
        self.scopes.get(scope).and_then(|s| s.get(key)).cloned()
    }

    /// Apply a write.
    pub fn write(&mut self, scope: ScopeId, key: String, value: Value) {
        self.scopes.entry(scope).or_default().insert(key, value);
    }

    /// Whether a scope key currently holds a value.
    pub fn contains(&self, scope: &ScopeId, key: &str) -> bool {
        self.scopes.get(scope).is_some_and(|s| s.contains_key(key))
    }

    /// Snapshot every scope under its stable storage key.
    pub fn snapshot(&self) -> HashMap<String, HashMap<String, Value>> {
        self.scopes
            .iter()
            .map(|(scope, values)| (scope.storage_key(), values.clone()))
            .collect()
    }

    /// Rebuild state from a checkpoint snapshot.
    ///
    /// Entries whose storage key does not parse are dropped; a checkpoint
    /// produced by this runtime never contains such entries.
    pub fn restore(snapshot: HashMap<String, HashMap<String, Value>>) -> Self {
        let scopes = snapshot
            .into_iter()
            .filter_map(|(key, values)| ScopeId::from_storage_key(&key).map(|s| (s, values)))
            .collect();
        Self { scopes }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn private_and_shared_scopes_are_distinct() {
        let mut state = RunState::new();
        state.write(ScopeId::private("a"), "k".into(), json!(1));
        state.write(ScopeId::shared("a"), "k".into(), json!(2));

        assert_eq!(state.read(&ScopeId::private("a"), "k"), Some(json!(1)));
        assert_eq!(state.read(&ScopeId::shared("a"), "k"), Some(json!(2)));
    }

    #[test]
    fn shared_scope_ignores_executor_identity() {
        // Two executors naming the same shared scope address the same cell.
        let from_a = ScopeId::shared("blackboard");
        let from_b = ScopeId::shared("blackboard");
        assert_eq!(from_a, from_b);

        let mut state = RunState::new();
        state.write(from_a, "note".into(), json!("written by a"));
        assert_eq!(state.read(&from_b, "note"), Some(json!("written by a")));
    }

    #[test]
    fn storage_key_round_trip() {
        for scope in [ScopeId::private("exec-1"), ScopeId::shared("team")] {
            let key = scope.storage_key();
            assert_eq!(ScopeId::from_storage_key(&key), Some(scope));
        }
        assert_eq!(ScopeId::from_storage_key("bogus"), None);
    }

    #[test]
    fn snapshot_restore_round_trip() {
        let mut state = RunState::new();
        state.write(ScopeId::private("a"), "x".into(), json!([1, 2]));
        state.write(ScopeId::shared("s"), "y".into(), json!({"n": 3}));

        let restored = RunState::restore(state.snapshot());
        assert_eq!(restored.read(&ScopeId::private("a"), "x"), Some(json!([1, 2])));
        assert_eq!(restored.read(&ScopeId::shared("s"), "y"), Some(json!({"n": 3})));
    }
}
