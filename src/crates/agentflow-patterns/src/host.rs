//! The agent host executor - bridges [`Agent`]s into the workflow graph.
//!
//! A host executor batches with the turn token:
//!
//! 1. Incoming conversation payloads accumulate in the executor's private
//!    state (so the accumulator is checkpointable).
//! 2. On receipt of the turn token the host flushes: it runs its agent over
//!    the accumulated conversation, surfaces every streamed update as an
//!    `AgentRunUpdate` event and the folded result as an `AgentRunResponse`
//!    event, sends the extended conversation downstream, and forwards the
//!    token.
//!
//! The sequential and concurrent patterns are wired entirely out of host
//! executors plus small adapter executors.

use crate::error::Result;
use agentflow_core::{
    Agent, AgentRunOptions, AgentRunResponse, ChatMessage, Executor, WorkflowEvent,
    WorkflowMessage, CHAT_MESSAGES_TAG, TURN_TOKEN_TAG,
};
use futures::StreamExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

/// Private-state key holding a host's accumulated conversation.
pub(crate) const PENDING_KEY: &str = "pending_messages";

/// Encode a conversation as a message payload.
pub fn messages_to_value(messages: &[ChatMessage]) -> Result<Value> {
    Ok(serde_json::to_value(messages)?)
}

/// Decode a conversation from a message payload.
pub fn messages_from_value(value: &Value) -> Result<Vec<ChatMessage>> {
    Ok(serde_json::from_value(value.clone())?)
}

/// Build the host executor for an agent. The executor id is the agent's id.
pub fn agent_host_executor(agent: Arc<dyn Agent>) -> Executor {
    let flush_agent = Arc::clone(&agent);
    Executor::new(agent.id().to_string())
        .handler(CHAT_MESSAGES_TAG, |msg, ctx| {
            Box::pin(async move {
                let incoming: Vec<ChatMessage> = serde_json::from_value(msg.payload)?;
                let mut pending: Vec<ChatMessage> = serde_json::from_value(
                    ctx.read_or_init_state(PENDING_KEY, json!([]), None)?,
                )?;
                pending.extend(incoming);
                ctx.queue_state_update(PENDING_KEY, serde_json::to_value(&pending)?, None)?;
                Ok(None)
            })
        })
        .handler(TURN_TOKEN_TAG, move |_msg, ctx| {
            let agent = Arc::clone(&flush_agent);
            Box::pin(async move {
                let conversation: Vec<ChatMessage> = serde_json::from_value(
                    ctx.read_or_init_state(PENDING_KEY, json!([]), None)?,
                )?;
                ctx.queue_state_update(PENDING_KEY, json!([]), None)?;
                debug!(agent = %agent.id(), messages = conversation.len(), "flushing host batch");

                let mut updates = Vec::new();
                let mut stream = agent
                    .run_streaming(conversation.clone(), AgentRunOptions::new())
                    .await?;
                while let Some(update) = stream.next().await {
                    let update = update?;
                    ctx.add_event(WorkflowEvent::AgentRunUpdate {
                        executor_id: ctx.executor_id().to_string(),
                        update: update.clone(),
                    })?;
                    updates.push(update);
                }
                let response = AgentRunResponse::from_updates(updates);
                ctx.add_event(WorkflowEvent::AgentRunResponse {
                    executor_id: ctx.executor_id().to_string(),
                    response: response.clone(),
                })?;

                let mut extended = conversation;
                for message in response.messages {
                    extended.push(message.with_author(agent.name().to_string()));
                }
                ctx.send_message(WorkflowMessage::new(
                    CHAT_MESSAGES_TAG,
                    serde_json::to_value(&extended)?,
                ))?;
                ctx.send_message(WorkflowMessage::turn_token())?;
                Ok(None)
            })
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedAgent;
    use agentflow_core::run::run;
    use agentflow_core::{AgentRunResponseUpdate, WorkflowBuilder};

    fn echo_agent(id: &str) -> Arc<dyn Agent> {
        Arc::new(ScriptedAgent::new(id, |messages, _options| {
            let last = messages.last().map(|m| m.text()).unwrap_or_default();
            vec![AgentRunResponseUpdate::text(format!("echo:{last}"))]
        }))
    }

    #[tokio::test]
    async fn host_batches_and_flushes_on_turn_token() {
        let collect = Executor::new("collect").handler(CHAT_MESSAGES_TAG, |msg, ctx| {
            Box::pin(async move {
                ctx.add_event(WorkflowEvent::WorkflowCompleted { result: msg.payload })?;
                Ok(None)
            })
        });
        let seed = Executor::new("seed").handler(CHAT_MESSAGES_TAG, |msg, ctx| {
            Box::pin(async move {
                ctx.send_message(WorkflowMessage::new(CHAT_MESSAGES_TAG, msg.payload))?;
                ctx.send_message(WorkflowMessage::turn_token())?;
                Ok(None)
            })
        });

        let workflow = Arc::new(
            WorkflowBuilder::new("seed")
                .add_executor(seed)
                .add_executor(agent_host_executor(echo_agent("echo")))
                .add_executor(collect)
                .add_edge("seed", "echo")
                .add_edge("echo", "collect")
                .build()
                .unwrap(),
        );

        let input = messages_to_value(&[ChatMessage::user("hi")]).unwrap();
        let finished = run(workflow, input).await.unwrap();

        let result = finished.result().expect("completed event");
        let messages = messages_from_value(result).unwrap();
        let texts: Vec<String> = messages.iter().map(|m| m.text()).collect();
        assert_eq!(texts, vec!["hi", "echo:hi"]);
        assert_eq!(messages[1].author_name.as_deref(), Some("echo"));

        // Streamed activity surfaced as events.
        assert!(finished
            .events()
            .iter()
            .any(|e| matches!(e, WorkflowEvent::AgentRunUpdate { executor_id, .. } if executor_id == "echo")));
        assert!(finished
            .events()
            .iter()
            .any(|e| matches!(e, WorkflowEvent::AgentRunResponse { executor_id, .. } if executor_id == "echo")));
    }
}
