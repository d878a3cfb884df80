//! Sequential pipeline: agents chained by direct edges.
//!
//! Agents `a1..an` are wrapped in host executors and linked in order. The
//! conversation grows as it flows: each agent sees everything its
//! predecessors produced, appends its own response, and forwards the turn
//! token. A trailing output executor batches the final conversation and
//! emits one list-valued `WorkflowCompleted` event.
//!
//! ```text
//! input ──> a1 ──> a2 ──> ... ──> an ──> output
//!          (host) (host)        (host)  (flush on turn token)
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use agentflow_patterns::sequential::SequentialBuilder;
//!
//! let workflow = SequentialBuilder::new()
//!     .participants(vec![writer, reviewer])
//!     .build()?;
//! ```

use crate::error::{PatternError, Result};
use crate::host::agent_host_executor;
use agentflow_core::{
    Agent, ChatMessage, Executor, Workflow, WorkflowBuilder, WorkflowEvent, WorkflowMessage,
    CHAT_MESSAGES_TAG, TURN_TOKEN_TAG,
};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;

/// Id of the synthesized input adapter executor.
pub const INPUT_ID: &str = "sequential_input";

/// Id of the synthesized output batching executor.
pub const OUTPUT_ID: &str = "sequential_output";

/// Builder for the sequential pipeline pattern.
#[derive(Default)]
pub struct SequentialBuilder {
    participants: Vec<Arc<dyn Agent>>,
}

impl SequentialBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The agents, in pipeline order.
    pub fn participants(mut self, agents: Vec<Arc<dyn Agent>>) -> Self {
        self.participants = agents;
        self
    }

    /// Append one agent to the pipeline.
    pub fn add_participant(mut self, agent: Arc<dyn Agent>) -> Self {
        self.participants.push(agent);
        self
    }

    /// Assemble the workflow. Input type: a conversation
    /// (`Vec<ChatMessage>` as JSON); the completed event's result is the
    /// final conversation.
    pub fn build(self) -> Result<Workflow> {
        if self.participants.is_empty() {
            return Err(PatternError::NoParticipants);
        }
        let mut seen = HashSet::new();
        for agent in &self.participants {
            if !seen.insert(agent.id().to_string()) {
                return Err(PatternError::DuplicateAgent(agent.id().to_string()));
            }
        }

        let mut builder = WorkflowBuilder::new(INPUT_ID)
            .add_executor(input_adapter())
            .add_executor(output_collector());

        let mut previous = INPUT_ID.to_string();
        for agent in self.participants {
            let id = agent.id().to_string();
            builder = builder
                .add_executor(agent_host_executor(agent))
                .add_edge(previous, id.clone());
            previous = id;
        }
        builder = builder.add_edge(previous, OUTPUT_ID);

        Ok(builder.build()?)
    }
}

/// Forwards the input conversation and follows it with a turn token.
fn input_adapter() -> Executor {
    Executor::new(INPUT_ID).handler(CHAT_MESSAGES_TAG, |msg, ctx| {
        Box::pin(async move {
            ctx.send_message(WorkflowMessage::new(CHAT_MESSAGES_TAG, msg.payload))?;
            ctx.send_message(WorkflowMessage::turn_token())?;
            Ok(None)
        })
    })
}

/// Batches incoming messages; the turn token flushes them as the completed
/// result.
fn output_collector() -> Executor {
    Executor::new(OUTPUT_ID)
        .handler(CHAT_MESSAGES_TAG, |msg, ctx| {
            Box::pin(async move {
                let incoming: Vec<ChatMessage> = serde_json::from_value(msg.payload)?;
                let mut pending: Vec<ChatMessage> = serde_json::from_value(
                    ctx.read_or_init_state("collected", json!([]), None)?,
                )?;
                pending.extend(incoming);
                ctx.queue_state_update("collected", serde_json::to_value(&pending)?, None)?;
                Ok(None)
            })
        })
        .handler(TURN_TOKEN_TAG, |_msg, ctx| {
            Box::pin(async move {
                let collected = ctx.read_or_init_state("collected", json!([]), None)?;
                ctx.queue_state_update("collected", json!([]), None)?;
                ctx.add_event(WorkflowEvent::WorkflowCompleted { result: collected })?;
                Ok(None)
            })
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{messages_from_value, messages_to_value};
    use crate::testing::{suffix_agent, uppercase_agent};
    use agentflow_core::run::run;

    #[tokio::test]
    async fn empty_participant_list_is_an_error() {
        assert!(matches!(
            SequentialBuilder::new().build(),
            Err(PatternError::NoParticipants)
        ));
    }

    #[tokio::test]
    async fn duplicate_agent_ids_are_rejected() {
        let err = SequentialBuilder::new()
            .participants(vec![uppercase_agent("a"), suffix_agent("a", "!")])
            .build()
            .unwrap_err();
        assert!(matches!(err, PatternError::DuplicateAgent(id) if id == "a"));
    }

    #[tokio::test]
    async fn pipeline_threads_conversation_through_agents() {
        let workflow = Arc::new(
            SequentialBuilder::new()
                .participants(vec![uppercase_agent("upper"), suffix_agent("exclaim", "!")])
                .build()
                .unwrap(),
        );

        let input = messages_to_value(&[ChatMessage::user("hello")]).unwrap();
        let finished = run(workflow, input).await.unwrap();

        let messages = messages_from_value(finished.result().expect("completed")).unwrap();
        let texts: Vec<String> = messages.iter().map(|m| m.text()).collect();
        assert_eq!(texts, vec!["hello", "HELLO", "HELLO!"]);
    }
}
