//! The capability handle passed to every handler invocation.
//!
//! A [`WorkflowContext`] lets a handler interact with its run without
//! holding references into the dispatcher:
//!
//! - [`send_message`](WorkflowContext::send_message) - enqueue to the
//!   executor's outgoing edges (drained after the handler returns, in call
//!   order)
//! - [`add_event`](WorkflowContext::add_event) - append to the run's event
//!   log
//! - [`read_state`](WorkflowContext::read_state) /
//!   [`queue_state_update`](WorkflowContext::queue_state_update) - scoped
//!   state access; writes are buffered and applied atomically when the
//!   handler returns `Ok`, discarded on `Err`
//!
//! Reads see the applied state overlaid with the handler's own queued
//! writes, so a handler observes its own updates immediately while other
//! handlers only observe them after a successful return.
//!
//! Contexts **must not** be captured beyond the handler call: the dispatcher
//! takes the context's buffers back when the handler returns, and any later
//! use fails with [`WorkflowError::ContextExpired`].

use crate::cancellation::CancellationToken;
use crate::error::{Result, WorkflowError};
use crate::events::WorkflowEvent;
use crate::message::WorkflowMessage;
use crate::state::{RunState, ScopeId};
use serde_json::Value;
use std::sync::{Arc, Mutex};

/// Everything a handler produced during one invocation.
#[derive(Debug, Default)]
pub(crate) struct ContextOutcome {
    /// Messages to route to outgoing edges, in `send_message` call order.
    pub outbox: Vec<WorkflowMessage>,

    /// Events to append to the run's log.
    pub events: Vec<WorkflowEvent>,

    /// Buffered state writes, in call order.
    pub queued_writes: Vec<(ScopeId, String, Value)>,
}

struct ContextInner {
    state: Arc<Mutex<RunState>>,
    outcome: ContextOutcome,
}

/// Handler-facing view of a run. Cheap to clone; all clones share one
/// invocation's buffers.
#[derive(Clone)]
pub struct WorkflowContext {
    executor_id: String,
    run_id: String,
    concurrent_runs: bool,
    cancellation: CancellationToken,
    inner: Arc<Mutex<Option<ContextInner>>>,
}

impl WorkflowContext {
    pub(crate) fn new(
        executor_id: impl Into<String>,
        run_id: impl Into<String>,
        state: Arc<Mutex<RunState>>,
        concurrent_runs: bool,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            executor_id: executor_id.into(),
            run_id: run_id.into(),
            concurrent_runs,
            cancellation,
            inner: Arc::new(Mutex::new(Some(ContextInner {
                state,
                outcome: ContextOutcome::default(),
            }))),
        }
    }

    /// A context bound to fresh, throwaway state. Useful in handler unit
    /// tests; never used by the dispatcher.
    pub fn detached(executor_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self::new(
            executor_id,
            run_id,
            Arc::new(Mutex::new(RunState::new())),
            false,
            CancellationToken::new(),
        )
    }

    /// Id of the executor this invocation belongs to.
    pub fn executor_id(&self) -> &str {
        &self.executor_id
    }

    /// Id of the current run.
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Hint that multiple runs may share this executor instance; when true,
    /// handlers must not cache state across invocations.
    pub fn concurrent_runs_enabled(&self) -> bool {
        self.concurrent_runs
    }

    /// The run's cancellation token.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Enqueue a message to all of this executor's outgoing edges, subject
    /// to each edge's predicate or partitioner. Messages are delivered in
    /// the order this method was called.
    pub fn send_message(&self, message: WorkflowMessage) -> Result<()> {
        let message = message.with_source(self.executor_id.clone());
        self.with_inner(|inner| {
            inner.outcome.outbox.push(message);
            Ok(())
        })
    }

    /// Append an event to the run's event log. Events appear between this
    /// invocation's `ExecutorInvoked` and `ExecutorCompleted` events.
    pub fn add_event(&self, event: WorkflowEvent) -> Result<()> {
        self.with_inner(|inner| {
            inner.outcome.events.push(event);
            Ok(())
        })
    }

    /// Read a scope key. `scope = None` addresses this executor's private
    /// scope; `Some(name)` a shared scope.
    pub fn read_state(&self, key: &str, scope: Option<&str>) -> Result<Option<Value>> {
        let scope_id = self.resolve_scope(scope);
        self.with_inner(|inner| {
            // The handler's own queued writes win over applied state.
            if let Some((_, _, value)) = inner
                .outcome
                .queued_writes
                .iter()
                .rev()
                .find(|(s, k, _)| *s == scope_id && k == key)
            {
                return Ok(Some(value.clone()));
            }
            let state = inner
                .state
                .lock()
                .map_err(|_| WorkflowError::Custom("run state lock poisoned".into()))?;
            Ok(state.read(&scope_id, key))
        })
    }

    /// Read a scope key, queueing `init` as its value if absent.
    pub fn read_or_init_state(
        &self,
        key: &str,
        init: Value,
        scope: Option<&str>,
    ) -> Result<Value> {
        if let Some(existing) = self.read_state(key, scope)? {
            return Ok(existing);
        }
        self.queue_state_update(key, init.clone(), scope)?;
        Ok(init)
    }

    /// Buffer a state write. Applied atomically when the handler returns
    /// `Ok`; discarded if it returns `Err`.
    pub fn queue_state_update(&self, key: &str, value: Value, scope: Option<&str>) -> Result<()> {
        let scope_id = self.resolve_scope(scope);
        self.with_inner(|inner| {
            inner
                .outcome
                .queued_writes
                .push((scope_id, key.to_string(), value));
            Ok(())
        })
    }

    fn resolve_scope(&self, scope: Option<&str>) -> ScopeId {
        match scope {
            None => ScopeId::private(&self.executor_id),
            Some(name) => ScopeId::shared(name),
        }
    }

    fn with_inner<T>(&self, f: impl FnOnce(&mut ContextInner) -> Result<T>) -> Result<T> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| WorkflowError::Custom("context lock poisoned".into()))?;
        match guard.as_mut() {
            Some(inner) => f(inner),
            None => Err(WorkflowError::ContextExpired),
        }
    }

    /// Take the invocation's buffers back, expiring the context.
    pub(crate) fn finish(&self) -> Result<ContextOutcome> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| WorkflowError::Custom("context lock poisoned".into()))?;
        match guard.take() {
            Some(inner) => Ok(inner.outcome),
            None => Err(WorkflowError::ContextExpired),
        }
    }
}

impl std::fmt::Debug for WorkflowContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowContext")
            .field("executor_id", &self.executor_id)
            .field("run_id", &self.run_id)
            .field("concurrent_runs", &self.concurrent_runs)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn queued_writes_are_visible_to_own_reads() {
        let ctx = WorkflowContext::detached("e", "run");
        assert_eq!(ctx.read_state("k", None).unwrap(), None);

        ctx.queue_state_update("k", json!(1), None).unwrap();
        assert_eq!(ctx.read_state("k", None).unwrap(), Some(json!(1)));

        // Later queued writes shadow earlier ones.
        ctx.queue_state_update("k", json!(2), None).unwrap();
        assert_eq!(ctx.read_state("k", None).unwrap(), Some(json!(2)));
    }

    #[test]
    fn read_or_init_writes_only_when_absent() {
        let ctx = WorkflowContext::detached("e", "run");
        assert_eq!(
            ctx.read_or_init_state("k", json!([]), None).unwrap(),
            json!([])
        );
        ctx.queue_state_update("k", json!([1]), None).unwrap();
        assert_eq!(
            ctx.read_or_init_state("k", json!([]), None).unwrap(),
            json!([1])
        );
    }

    #[test]
    fn finish_expires_the_context() {
        let ctx = WorkflowContext::detached("e", "run");
        ctx.send_message(WorkflowMessage::new("t", json!(1))).unwrap();

        let outcome = ctx.finish().unwrap();
        assert_eq!(outcome.outbox.len(), 1);
        assert_eq!(outcome.outbox[0].source_id.as_deref(), Some("e"));

        assert!(matches!(
            ctx.send_message(WorkflowMessage::new("t", json!(2))),
            Err(WorkflowError::ContextExpired)
        ));
        assert!(matches!(
            ctx.read_state("k", None),
            Err(WorkflowError::ContextExpired)
        ));
    }

    #[test]
    fn shared_scope_addressing() {
        let state = Arc::new(Mutex::new(RunState::new()));
        state.lock().unwrap().write(
            ScopeId::shared("board"),
            "note".into(),
            json!("from elsewhere"),
        );

        let ctx = WorkflowContext::new(
            "e",
            "run",
            state,
            false,
            CancellationToken::new(),
        );
        assert_eq!(
            ctx.read_state("note", Some("board")).unwrap(),
            Some(json!("from elsewhere"))
        );
        // Private scope of the same name is untouched.
        assert_eq!(ctx.read_state("note", None).unwrap(), None);
    }
}
