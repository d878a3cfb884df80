//! # agentflow-core - Graph-Structured Workflow Runtime
//!
//! **Compose AI agents and user computations as communicating executors
//! connected by typed edges.** The runtime delivers messages between
//! executors deterministically, supports cancellation and checkpoint/resume,
//! and surfaces a stream of lifecycle events to the caller.
//!
//! ## Overview
//!
//! A workflow is a directed graph:
//!
//! - **Executors** ([`Executor`]) - named nodes with a routing table from
//!   message type tag to async handler
//! - **Edges** ([`Edge`]) - direct (1→1, optional predicate), fan-out (1→N,
//!   optional partitioner), and fan-in (N→1, gated on all-sources-seen)
//! - **State** - per-run scoped key/value store with queued writes applied
//!   atomically at handler return
//! - **Runs** - [`StreamingRun`] (pull-based event stream) or [`Run`]
//!   (buffered snapshot with pause/resume on external requests)
//!
//! The caller submits an input value; the dispatcher seeds a message of the
//! declared input type addressed to the start executor and drains the graph
//! until quiescent, cancelled, or externally paused.
//!
//! ## Quick Start
//!
//! ```rust
//! use agentflow_core::{Executor, WorkflowBuilder};
//! use agentflow_core::run::run;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let shout = Executor::new("shout").handler_with_output("text", "text", |msg, _ctx| {
//!         Box::pin(async move {
//!             Ok(Some(json!(msg.payload.as_str().unwrap_or_default().to_uppercase())))
//!         })
//!     });
//!     let publish = Executor::new("publish").handler("text", |msg, ctx| {
//!         Box::pin(async move {
//!             ctx.add_event(agentflow_core::WorkflowEvent::WorkflowCompleted {
//!                 result: msg.payload,
//!             })?;
//!             Ok(None)
//!         })
//!     });
//!
//!     let workflow = Arc::new(
//!         WorkflowBuilder::new("shout")
//!             .add_executor(shout)
//!             .add_executor(publish)
//!             .add_edge("shout", "publish")
//!             .build()?,
//!     );
//!
//!     let finished = run(workflow, json!("hello")).await?;
//!     assert_eq!(finished.result(), Some(&json!("HELLO")));
//!     Ok(())
//! }
//! ```
//!
//! ## Execution Model
//!
//! Per run: cooperative, single-threaded. A run never invokes two handlers
//! concurrently; handlers may `await` I/O. The dispatcher advances a FIFO
//! queue in *supersteps* - messages sent during a superstep are processed in
//! the next one. Events observed by the caller reflect true handler
//! completion order.
//!
//! A [`Workflow`] is a static description: multiple runs may execute
//! concurrently on distinct runners. Executors are instantiated per run
//! unless marked [`shareable`](Executor::shareable).
//!
//! ## Checkpointing
//!
//! Bind an [`agentflow_checkpoint::CheckpointStore`] via
//! [`run::run_with_checkpointing`] / [`run::stream_with_checkpointing`]:
//! checkpoints are taken right after seeding, at every superstep boundary,
//! and on request at the next safe point. [`run::resume_run`] /
//! [`run::resume_stream`] restore a run under its original run id without
//! re-emitting observed events.
//!
//! ## Module Organization
//!
//! - [`builder`] - [`WorkflowBuilder`] and build-time validation
//! - [`workflow`] - the immutable [`Workflow`] description
//! - [`executor`] - [`Executor`], handler registration, factories
//! - [`edge`] - [`Edge`] shapes, predicates, partitioners
//! - [`message`] - [`WorkflowMessage`] envelopes and the [`TypeRegistry`]
//! - [`context`] - [`WorkflowContext`] capabilities handed to handlers
//! - [`state`] - scoped state store
//! - [`dispatcher`] - the per-run event loop (internal)
//! - [`run`] - run controllers and the caller-facing API
//! - [`events`] - [`WorkflowEvent`] and [`RunStatus`]
//! - [`ports`] - external request/response ports
//! - [`agent`] - the [`Agent`] collaborator interface and chat model
//! - [`cancellation`] - [`CancellationToken`]
//! - [`error`] - [`WorkflowError`]
//!
//! ## See Also
//!
//! - `agentflow-checkpoint` - checkpoint model and stores
//! - `agentflow-patterns` - sequential, concurrent, and handoff
//!   orchestration built on this crate

pub mod agent;
pub mod builder;
pub mod cancellation;
pub mod context;
mod dispatcher;
pub mod edge;
pub mod error;
pub mod events;
pub mod executor;
pub mod message;
pub mod ports;
pub mod run;
pub mod state;
pub mod workflow;

// Re-export main types
pub use agent::{
    Agent, AgentRunOptions, AgentRunResponse, AgentRunResponseUpdate, AgentUpdateStream,
    ChatMessage, Content, Role, ToolSpec,
};
pub use builder::WorkflowBuilder;
pub use cancellation::CancellationToken;
pub use context::WorkflowContext;
pub use edge::{Edge, EdgePredicate, Partitioner};
pub use error::{Result, WorkflowError};
pub use events::{RunStatus, WorkflowEvent};
pub use executor::{Executor, ExecutorFactory, ExecutorId, HandlerFn, HandlerFuture};
pub use message::{
    bundle_messages, unbundle_messages, TypeRegistry, TypeTag, WorkflowMessage, ANY_TAG,
    CHAT_MESSAGES_TAG, FAN_IN_BUNDLE_TAG, TURN_TOKEN_TAG,
};
pub use ports::{ExternalRequest, ExternalResponse, InputPort};
pub use run::{Run, RunHandle, StreamingRun};
pub use state::{RunState, ScopeId};
pub use workflow::Workflow;
