//! Executors - the named processing units of a workflow.
//!
//! An [`Executor`] reacts to incoming messages by running a handler. Each
//! executor owns an ordered routing table from message type tag to handler;
//! the dispatcher selects the first registration (in declaration order)
//! whose input tag is assignable from the payload's tag. Declaring subtypes
//! before supertypes therefore yields most-derived-wins selection.
//!
//! Handlers receive the message and a
//! [`WorkflowContext`](crate::context::WorkflowContext) and may:
//!
//! - send messages to the executor's outgoing edges
//! - append events to the run's event log
//! - read scoped state and queue state updates (applied on success)
//! - return an optional output value, which is routed to the outgoing edges
//!   under the registration's declared output tag
//!
//! Executors are produced lazily by an [`ExecutorFactory`] when a run first
//! delivers to them, and discarded with the run. An executor marked
//! [`shareable`](Executor::shareable) is instantiated once per workflow and
//! reused across concurrent runs; its handlers must not cache per-run state.
//!
//! # Example
//!
//! ```rust
//! use agentflow_core::executor::Executor;
//! use serde_json::json;
//!
//! let doubler = Executor::new("doubler").handler_with_output(
//!     "number",
//!     "number",
//!     |msg, _ctx| {
//!         Box::pin(async move {
//!             let n = msg.payload.as_i64().unwrap_or(0);
//!             Ok(Some(json!(n * 2)))
//!         })
//!     },
//! );
//!
//! assert_eq!(doubler.id(), "doubler");
//! assert_eq!(doubler.input_tags(), vec!["number"]);
//! ```

use crate::context::WorkflowContext;
use crate::message::{TypeRegistry, TypeTag, WorkflowMessage};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Executor identifier - unique, non-empty string per workflow.
pub type ExecutorId = String;

/// Future returned by a handler.
pub type HandlerFuture = Pin<Box<dyn Future<Output = crate::error::Result<Option<Value>>> + Send>>;

/// A message handler: `(message, context) -> optional output value`.
pub type HandlerFn = Arc<dyn Fn(WorkflowMessage, WorkflowContext) -> HandlerFuture + Send + Sync>;

/// Future returned by a lifecycle hook.
pub type HookFuture = Pin<Box<dyn Future<Output = crate::error::Result<()>> + Send>>;

/// Lifecycle hook invoked around checkpoint capture/restore.
pub type LifecycleHook = Arc<dyn Fn(WorkflowContext) -> HookFuture + Send + Sync>;

/// Produces a fresh executor instance for a run.
pub type ExecutorFactory = Arc<dyn Fn() -> Executor + Send + Sync>;

/// One entry of an executor's routing table.
#[derive(Clone)]
pub struct HandlerRegistration {
    /// Tag this handler accepts (including declared subtypes).
    pub input_tag: TypeTag,

    /// Tag under which a returned value is routed; `None` falls back to the
    /// wildcard tag.
    pub output_tag: Option<TypeTag>,

    /// The handler itself.
    pub handler: HandlerFn,
}

impl std::fmt::Debug for HandlerRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistration")
            .field("input_tag", &self.input_tag)
            .field("output_tag", &self.output_tag)
            .field("handler", &"<function>")
            .finish()
    }
}

/// A named node in the workflow graph.
#[derive(Clone)]
pub struct Executor {
    id: ExecutorId,
    handlers: Vec<HandlerRegistration>,
    shareable: bool,
    on_checkpointing: Option<LifecycleHook>,
    on_checkpoint_restored: Option<LifecycleHook>,
}

impl Executor {
    /// Create an executor with no handlers.
    pub fn new(id: impl Into<ExecutorId>) -> Self {
        Self {
            id: id.into(),
            handlers: Vec::new(),
            shareable: false,
            on_checkpointing: None,
            on_checkpoint_restored: None,
        }
    }

    /// Register a handler for an input tag. Registration order is routing
    /// order; duplicate registrations for one tag are rejected at build time.
    pub fn handler<F>(self, input_tag: impl Into<TypeTag>, f: F) -> Self
    where
        F: Fn(WorkflowMessage, WorkflowContext) -> HandlerFuture + Send + Sync + 'static,
    {
        self.register(input_tag, None, f)
    }

    /// Register a handler whose returned value is routed under `output_tag`.
    pub fn handler_with_output<F>(
        self,
        input_tag: impl Into<TypeTag>,
        output_tag: impl Into<TypeTag>,
        f: F,
    ) -> Self
    where
        F: Fn(WorkflowMessage, WorkflowContext) -> HandlerFuture + Send + Sync + 'static,
    {
        self.register(input_tag, Some(output_tag.into()), f)
    }

    fn register<F>(mut self, input_tag: impl Into<TypeTag>, output_tag: Option<TypeTag>, f: F) -> Self
    where
        F: Fn(WorkflowMessage, WorkflowContext) -> HandlerFuture + Send + Sync + 'static,
    {
        self.handlers.push(HandlerRegistration {
            input_tag: input_tag.into(),
            output_tag,
            handler: Arc::new(f),
        });
        self
    }

    /// Mark this executor safe to share between concurrent runs.
    pub fn shareable(mut self, shareable: bool) -> Self {
        self.shareable = shareable;
        self
    }

    /// Hook invoked at checkpoint capture; may queue extra private-state
    /// writes, which are applied before the snapshot is taken.
    pub fn on_checkpointing<F>(mut self, hook: F) -> Self
    where
        F: Fn(WorkflowContext) -> HookFuture + Send + Sync + 'static,
    {
        self.on_checkpointing = Some(Arc::new(hook));
        self
    }

    /// Hook invoked after this executor is first instantiated in a resumed
    /// run; reads whatever `on_checkpointing` wrote.
    pub fn on_checkpoint_restored<F>(mut self, hook: F) -> Self
    where
        F: Fn(WorkflowContext) -> HookFuture + Send + Sync + 'static,
    {
        self.on_checkpoint_restored = Some(Arc::new(hook));
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether concurrent runs may share this instance.
    pub fn is_shareable(&self) -> bool {
        self.shareable
    }

    /// Accepted input tags, in registration order.
    pub fn input_tags(&self) -> Vec<&str> {
        self.handlers.iter().map(|h| h.input_tag.as_str()).collect()
    }

    /// The full routing table.
    pub fn registrations(&self) -> &[HandlerRegistration] {
        &self.handlers
    }

    /// First input tag registered more than once, if any.
    pub(crate) fn duplicate_registration(&self) -> Option<&str> {
        for (i, reg) in self.handlers.iter().enumerate() {
            if self.handlers[..i].iter().any(|r| r.input_tag == reg.input_tag) {
                return Some(&reg.input_tag);
            }
        }
        None
    }

    /// Select the handler for a payload tag: first registration in
    /// declaration order whose input tag is assignable from the payload tag.
    pub fn select_handler(
        &self,
        type_tag: &str,
        registry: &TypeRegistry,
    ) -> Option<&HandlerRegistration> {
        self.handlers
            .iter()
            .find(|reg| registry.is_assignable(type_tag, &reg.input_tag))
    }

    /// Whether any handler accepts the given payload tag.
    pub fn accepts(&self, type_tag: &str, registry: &TypeRegistry) -> bool {
        self.select_handler(type_tag, registry).is_some()
    }

    pub(crate) fn checkpointing_hook(&self) -> Option<&LifecycleHook> {
        self.on_checkpointing.as_ref()
    }

    pub(crate) fn restored_hook(&self) -> Option<&LifecycleHook> {
        self.on_checkpoint_restored.as_ref()
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("id", &self.id)
            .field("handlers", &self.handlers)
            .field("shareable", &self.shareable)
            .field("on_checkpointing", &self.on_checkpointing.as_ref().map(|_| "<hook>"))
            .field(
                "on_checkpoint_restored",
                &self.on_checkpoint_restored.as_ref().map(|_| "<hook>"),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noop(id: &str, tags: &[&str]) -> Executor {
        let mut executor = Executor::new(id);
        for tag in tags {
            executor = executor.handler(*tag, |_msg, _ctx| Box::pin(async { Ok(None) }));
        }
        executor
    }

    #[test]
    fn routing_picks_first_assignable_registration() {
        let mut registry = TypeRegistry::new();
        registry.register_subtype("int", "number");

        let executor = noop("e", &["int", "number"]);
        let selected = executor.select_handler("int", &registry).unwrap();
        assert_eq!(selected.input_tag, "int");

        // A plain number skips the subtype registration.
        let selected = executor.select_handler("number", &registry).unwrap();
        assert_eq!(selected.input_tag, "number");
    }

    #[test]
    fn supertype_handler_matches_subtype_payload() {
        let mut registry = TypeRegistry::new();
        registry.register_subtype("int", "number");

        let executor = noop("e", &["number"]);
        assert!(executor.accepts("int", &registry));
        assert!(!executor.accepts("text", &registry));
    }

    #[test]
    fn duplicate_registration_is_detected() {
        let executor = noop("e", &["a", "b", "a"]);
        assert_eq!(executor.duplicate_registration(), Some("a"));
        assert_eq!(noop("e", &["a", "b"]).duplicate_registration(), None);
    }

    #[test]
    fn input_tags_preserve_declaration_order() {
        let executor = noop("e", &["c", "a", "b"]);
        assert_eq!(executor.input_tags(), vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn handler_future_returns_output() {
        let executor = Executor::new("e").handler_with_output("number", "number", |msg, _ctx| {
            Box::pin(async move { Ok(Some(json!(msg.payload.as_i64().unwrap_or(0) + 1))) })
        });

        let reg = executor.registrations()[0].clone();
        let ctx = crate::context::WorkflowContext::detached("e", "run");
        let out = (reg.handler)(WorkflowMessage::new("number", json!(41)), ctx)
            .await
            .unwrap();
        assert_eq!(out, Some(json!(42)));
    }
}
