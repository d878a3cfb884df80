//! Concurrent fan-out: broadcast the input to all agents, aggregate once
//! every agent has reported.
//!
//! ```text
//!              ┌──> a1 (host) ──> collect_a1 ──┐
//! dispatch ────┼──> a2 (host) ──> collect_a2 ──┼──(fan-in)──> aggregate
//!              └──> a3 (host) ──> collect_a3 ──┘
//! ```
//!
//! Each agent's output flows through its own collector executor - needed
//! because provenance is not preserved in raw messages; the collector
//! extracts the messages its agent authored. The fan-in edge gathers one
//! list per agent and fires the aggregator exactly once per round, with
//! lists in declared agent order.
//!
//! The aggregator function maps the per-agent lists to the completed result.
//! The default takes the last non-empty message of each agent's output,
//! preserving agent order.

use crate::error::{PatternError, Result};
use crate::host::agent_host_executor;
use agentflow_core::{
    unbundle_messages, Agent, ChatMessage, Executor, Workflow, WorkflowBuilder, WorkflowEvent,
    WorkflowMessage, CHAT_MESSAGES_TAG, FAN_IN_BUNDLE_TAG, TURN_TOKEN_TAG,
};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;

/// Id of the synthesized broadcasting start executor.
pub const DISPATCH_ID: &str = "concurrent_dispatch";

/// Id of the synthesized aggregating executor.
pub const AGGREGATE_ID: &str = "concurrent_aggregate";

/// Tag of a collector's per-agent output list.
pub const AGENT_OUTPUT_TAG: &str = "agent_output";

/// Maps per-agent output lists (declared agent order) to the completed
/// result.
pub type Aggregator =
    Arc<dyn Fn(Vec<Vec<ChatMessage>>) -> agentflow_core::Result<Value> + Send + Sync>;

/// Builder for the concurrent fan-out pattern.
#[derive(Default)]
pub struct ConcurrentBuilder {
    participants: Vec<Arc<dyn Agent>>,
    aggregator: Option<Aggregator>,
}

impl ConcurrentBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The agents the input is broadcast to, in result order.
    pub fn participants(mut self, agents: Vec<Arc<dyn Agent>>) -> Self {
        self.participants = agents;
        self
    }

    /// Append one agent.
    pub fn add_participant(mut self, agent: Arc<dyn Agent>) -> Self {
        self.participants.push(agent);
        self
    }

    /// Replace the default aggregator.
    pub fn with_aggregator(mut self, aggregator: Aggregator) -> Self {
        self.aggregator = Some(aggregator);
        self
    }

    /// Assemble the workflow. Input type: a conversation
    /// (`Vec<ChatMessage>` as JSON).
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
        let aggregator = self.aggregator.unwrap_or_else(default_aggregator);

        let host_ids: Vec<String> = self
            .participants
            .iter()
            .map(|a| a.id().to_string())
            .collect();
        let collector_ids: Vec<String> = host_ids.iter().map(|id| format!("collect_{id}")).collect();

        let mut builder = WorkflowBuilder::new(DISPATCH_ID)
            .add_executor(dispatch_executor())
            .add_executor(aggregate_executor(aggregator))
            .add_fan_out(DISPATCH_ID, host_ids.clone())
            .add_fan_in(collector_ids.clone(), AGGREGATE_ID);

        for (agent, collector_id) in self.participants.into_iter().zip(&collector_ids) {
            let host_id = agent.id().to_string();
            let author = agent.name().to_string();
            builder = builder
                .add_executor(agent_host_executor(agent))
                .add_executor(collector_executor(collector_id.clone(), author))
                .add_edge(host_id, collector_id.clone());
        }

        Ok(builder.build()?)
    }
}

/// Default aggregator: the last non-empty message of each agent's output,
/// in declared agent order. Agents whose output holds no non-empty message
/// contribute nothing.
pub fn default_aggregator() -> Aggregator {
    Arc::new(|outputs| {
        let picked: Vec<ChatMessage> = outputs
            .into_iter()
            .filter_map(|messages| {
                messages
                    .into_iter()
                    .rev()
                    .find(|m| !m.text().is_empty())
            })
            .collect();
        Ok(serde_json::to_value(picked)?)
    })
}

/// Broadcasts the input conversation plus a turn token to every host.
fn dispatch_executor() -> Executor {
    Executor::new(DISPATCH_ID).handler(CHAT_MESSAGES_TAG, |msg, ctx| {
        Box::pin(async move {
            ctx.send_message(WorkflowMessage::new(CHAT_MESSAGES_TAG, msg.payload))?;
            ctx.send_message(WorkflowMessage::turn_token())?;
            Ok(None)
        })
    })
}

/// Batches one host's output and, on the turn token, publishes the messages
/// its agent authored. The token itself is not forwarded: the collector's
/// single round output is what feeds the fan-in gate.
fn collector_executor(id: String, author: String) -> Executor {
    Executor::new(id)
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
        .handler(TURN_TOKEN_TAG, move |_msg, ctx| {
            let author = author.clone();
            Box::pin(async move {
                let collected: Vec<ChatMessage> = serde_json::from_value(
                    ctx.read_or_init_state("collected", json!([]), None)?,
                )?;
                ctx.queue_state_update("collected", json!([]), None)?;
                let authored: Vec<ChatMessage> = collected
                    .into_iter()
                    .filter(|m| m.author_name.as_deref() == Some(author.as_str()))
                    .collect();
                ctx.send_message(WorkflowMessage::new(
                    AGENT_OUTPUT_TAG,
                    serde_json::to_value(&authored)?,
                ))?;
                Ok(None)
            })
        })
}

/// Fires once per fan-in round: unbundles the per-agent lists and applies
/// the aggregator.
fn aggregate_executor(aggregator: Aggregator) -> Executor {
    Executor::new(AGGREGATE_ID).handler(FAN_IN_BUNDLE_TAG, move |msg, ctx| {
        let aggregator = Arc::clone(&aggregator);
        Box::pin(async move {
            let entries = unbundle_messages(&msg)?;
            let outputs: Vec<Vec<ChatMessage>> = entries
                .into_iter()
                .map(|entry| serde_json::from_value(entry.payload))
                .collect::<std::result::Result<_, _>>()?;
            let result = aggregator(outputs)?;
            ctx.add_event(WorkflowEvent::WorkflowCompleted { result })?;
            Ok(None)
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{messages_from_value, messages_to_value};
    use crate::testing::fixed_reply_agent;
    use agentflow_core::run::run;
    use agentflow_core::RunStatus;

    #[tokio::test]
    async fn empty_participant_list_is_an_error() {
        assert!(matches!(
            ConcurrentBuilder::new().build(),
            Err(PatternError::NoParticipants)
        ));
    }

    #[tokio::test]
    async fn default_aggregator_drops_empty_outputs_and_keeps_order() {
        let workflow = Arc::new(
            ConcurrentBuilder::new()
                .participants(vec![
                    fixed_reply_agent("first", "a"),
                    fixed_reply_agent("second", ""),
                    fixed_reply_agent("third", "c"),
                ])
                .build()
                .unwrap(),
        );

        let input = messages_to_value(&[ChatMessage::user("x")]).unwrap();
        let finished = run(workflow, input).await.unwrap();
        assert_eq!(finished.status(), RunStatus::Completed);

        let picked = messages_from_value(finished.result().expect("completed")).unwrap();
        let texts: Vec<String> = picked.iter().map(|m| m.text()).collect();
        assert_eq!(texts, vec!["a", "c"]);
        assert_eq!(picked[0].author_name.as_deref(), Some("first"));
        assert_eq!(picked[1].author_name.as_deref(), Some("third"));
    }

    #[tokio::test]
    async fn custom_aggregator_sees_declared_agent_order() {
        let aggregator: Aggregator = Arc::new(|outputs| {
            let counts: Vec<usize> = outputs.iter().map(Vec::len).collect();
            Ok(json!(counts))
        });
        let workflow = Arc::new(
            ConcurrentBuilder::new()
                .participants(vec![
                    fixed_reply_agent("one", "1"),
                    fixed_reply_agent("two", "2"),
                ])
                .with_aggregator(aggregator)
                .build()
                .unwrap(),
        );

        let input = messages_to_value(&[ChatMessage::user("x")]).unwrap();
        let finished = run(workflow, input).await.unwrap();
        assert_eq!(finished.result(), Some(&json!([1, 1])));
    }
}
