//! # agentflow-patterns - Prebuilt Orchestration Patterns
//!
//! **Three ready-made multi-agent workflows** built on `agentflow-core`:
//!
//! | Pattern | Shape | Use when |
//! |---------|-------|----------|
//! | [`SequentialBuilder`] | `a1 -> a2 -> ... -> an` | Each agent refines its predecessor's output |
//! | [`ConcurrentBuilder`] | fan-out + fan-in aggregate | Independent perspectives over one input |
//! | [`HandoffBuilder`] | tool-call-driven routing | The current agent decides who speaks next |
//!
//! All three wrap [`Agent`](agentflow_core::Agent)s in host executors that
//! batch with the turn token, surface streamed activity as
//! `AgentRunUpdate` / `AgentRunResponse` events, and terminate with a single
//! `WorkflowCompleted` event carrying a message list.
//!
//! ## Quick Start
//!
//! ```rust
//! use agentflow_patterns::sequential::SequentialBuilder;
//! use agentflow_patterns::testing::{suffix_agent, uppercase_agent};
//! use agentflow_patterns::host::messages_to_value;
//! use agentflow_core::{run::run, ChatMessage};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let workflow = Arc::new(
//!         SequentialBuilder::new()
//!             .participants(vec![uppercase_agent("upper"), suffix_agent("exclaim", "!")])
//!             .build()?,
//!     );
//!
//!     let input = messages_to_value(&[ChatMessage::user("hello")])?;
//!     let finished = run(workflow, input).await?;
//!     assert!(finished.result().is_some());
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`host`] - the agent host executor and conversation payload helpers
//! - [`sequential`] - the pipeline pattern
//! - [`concurrent`] - fan-out with aggregation
//! - [`handoff`] - tool-call-driven control transfer
//! - [`testing`] - deterministic scripted agents for tests
//! - [`error`] - [`PatternError`]

pub mod concurrent;
pub mod error;
pub mod handoff;
pub mod host;
pub mod sequential;
pub mod testing;

// Re-export main types
pub use concurrent::{Aggregator, ConcurrentBuilder};
pub use error::{PatternError, Result};
pub use handoff::{HandoffBuilder, HandoffState, HandoffTool, HandoffWorkflow};
pub use host::{agent_host_executor, messages_from_value, messages_to_value};
pub use sequential::SequentialBuilder;
pub use testing::ScriptedAgent;
