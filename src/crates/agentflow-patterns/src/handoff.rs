//! Handoff routing: an agent picks the next agent via a tool call.
//!
//! Given an initial agent and a set of `source -> target` handoff
//! declarations, the builder synthesizes one *handoff tool* per target
//! (name `handoff_to_<stable id>`, schema of a single optional `reason`
//! string) plus an `end` tool, and registers them on the source agent's
//! tool list. Each agent executor runs its agent over the accumulated
//! conversation and inspects the streamed response for a call to one of its
//! terminal tools:
//!
//! - **handoff tool invoked** - the call is removed from the visible
//!   contents, a tool result `"Transferred."` is synthesized, and the state
//!   routes to the target agent's executor
//! - **`end` invoked** - the call is removed and the state routes to the
//!   terminal executor, which emits the completed event carrying the
//!   message list
//! - **neither** - the agent is re-run with the accumulated messages until
//!   a terminal tool call appears
//!
//! The stable id in a tool's name is random, but it is embedded in both the
//! registered schema and the routing predicate, so routing is exact.
//!
//! # Example
//!
//! ```rust,ignore
//! use agentflow_patterns::handoff::HandoffBuilder;
//!
//! let built = HandoffBuilder::start_with(triage.clone())
//!     .with_handoff(&triage, &billing)
//!     .with_handoff(&triage, &support)
//!     .build()?;
//! let workflow = std::sync::Arc::new(built.workflow);
//! ```

use crate::error::{PatternError, Result};
use agentflow_core::{
    Agent, AgentRunOptions, AgentRunResponse, ChatMessage, Content, Executor, ToolSpec, Workflow,
    WorkflowBuilder, WorkflowEvent, WorkflowMessage, CHAT_MESSAGES_TAG,
};
use futures::StreamExt;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Tag of the state value flowing between handoff executors.
pub const HANDOFF_STATE_TAG: &str = "handoff_state";

/// Id of the synthesized input adapter executor.
pub const INPUT_ID: &str = "handoff_input";

/// Id of the synthesized terminal executor.
pub const OUTPUT_ID: &str = "handoff_output";

/// Name of the synthesized conversation-ending tool.
pub const END_TOOL_NAME: &str = "end";

/// The value flowing through a handoff graph: the accumulated conversation
/// plus the routing decision of the last agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HandoffState {
    /// End-of-phase marker carried with the state.
    pub turn_token: bool,

    /// Name of the handoff (or end) tool the last agent invoked.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoked_handoff: Option<String>,

    /// The accumulated conversation.
    pub messages: Vec<ChatMessage>,
}

impl HandoffState {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            turn_token: true,
            invoked_handoff: None,
            messages,
        }
    }
}

/// Phases of a handoff agent executor while processing one state value.
#[derive(Debug, Clone, PartialEq, Eq)]
enum HostPhase {
    /// About to run the agent over the accumulated messages.
    Running,
    /// Streaming the agent's response, watching for a terminal tool call.
    AwaitingToolCall,
    /// A handoff tool fired; routing to the named target.
    HandingOff(String),
    /// The end tool fired; routing to the terminal executor.
    Ending,
}

/// One synthesized handoff tool and the route it encodes.
#[derive(Debug, Clone)]
pub struct HandoffTool {
    /// The generated tool name (`handoff_to_<stable id>`).
    pub name: String,
    /// Source agent id the tool is registered on.
    pub from: String,
    /// Target agent id the tool routes to.
    pub to: String,
    /// The schema registered on the agent.
    pub spec: ToolSpec,
}

/// A built handoff workflow plus the synthesized tool table.
pub struct HandoffWorkflow {
    /// The runnable workflow. Input type: a conversation
    /// (`Vec<ChatMessage>` as JSON).
    pub workflow: Workflow,

    /// Every synthesized handoff tool, in declaration order.
    pub handoff_tools: Vec<HandoffTool>,

    /// The shared end tool registered on every agent.
    pub end_tool: ToolSpec,
}

impl HandoffWorkflow {
    /// The tool name routing `from` to `to`, if such a handoff exists.
    pub fn tool_name(&self, from: &str, to: &str) -> Option<&str> {
        self.handoff_tools
            .iter()
            .find(|t| t.from == from && t.to == to)
            .map(|t| t.name.as_str())
    }
}

struct HandoffSpec {
    from: String,
    to: String,
    reason: Option<String>,
}

/// Builder for the handoff pattern.
pub struct HandoffBuilder {
    initial: String,
    agents: Vec<Arc<dyn Agent>>,
    handoffs: Vec<HandoffSpec>,
}

impl HandoffBuilder {
    /// Start with the agent that receives the initial conversation.
    pub fn start_with(agent: Arc<dyn Agent>) -> Self {
        Self {
            initial: agent.id().to_string(),
            agents: vec![agent],
            handoffs: Vec::new(),
        }
    }

    /// Allow `from` to hand the conversation to `to`.
    pub fn with_handoff(self, from: &Arc<dyn Agent>, to: &Arc<dyn Agent>) -> Self {
        self.add_handoff(from, to, None)
    }

    /// Allow `from` to hand to `to`, with a reason shown in the tool
    /// description.
    pub fn with_handoff_reason(
        self,
        from: &Arc<dyn Agent>,
        to: &Arc<dyn Agent>,
        reason: impl Into<String>,
    ) -> Self {
        self.add_handoff(from, to, Some(reason.into()))
    }

    fn add_handoff(
        mut self,
        from: &Arc<dyn Agent>,
        to: &Arc<dyn Agent>,
        reason: Option<String>,
    ) -> Self {
        for agent in [from, to] {
            if !self.agents.iter().any(|a| a.id() == agent.id()) {
                self.agents.push(Arc::clone(agent));
            }
        }
        self.handoffs.push(HandoffSpec {
            from: from.id().to_string(),
            to: to.id().to_string(),
            reason,
        });
        self
    }

    /// Assemble the workflow and the synthesized tool table.
    pub fn build(self) -> Result<HandoffWorkflow> {
        if self.agents.is_empty() {
            return Err(PatternError::NoParticipants);
        }
        let known: HashMap<&str, &Arc<dyn Agent>> =
            self.agents.iter().map(|a| (a.id(), a)).collect();
        if known.len() != self.agents.len() {
            let mut seen = std::collections::HashSet::new();
            for agent in &self.agents {
                if !seen.insert(agent.id()) {
                    return Err(PatternError::DuplicateAgent(agent.id().to_string()));
                }
            }
        }

        // Synthesize one handoff tool per declared route.
        let mut handoff_tools = Vec::new();
        for spec in &self.handoffs {
            let target = known
                .get(spec.to.as_str())
                .ok_or_else(|| PatternError::UnknownAgent(spec.to.clone()))?;
            let stable_id: String = {
                let mut rng = rand::thread_rng();
                format!("{:08x}", rng.gen::<u32>())
            };
            let name = format!("handoff_to_{stable_id}");
            let mut description = format!("Transfer the conversation to {}.", target.name());
            if let Some(reason) = &spec.reason {
                description.push(' ');
                description.push_str(reason);
            }
            let parameters = json!({
                "type": "object",
                "properties": {
                    "reason": {
                        "type": "string",
                        "description": "Why the conversation is being transferred."
                    }
                },
                "required": []
            });
            handoff_tools.push(HandoffTool {
                name: name.clone(),
                from: spec.from.clone(),
                to: spec.to.clone(),
                spec: ToolSpec::new(name, description, parameters),
            });
        }
        let end_tool = ToolSpec::new(
            END_TOOL_NAME,
            "End the conversation and publish the result.",
            json!({"type": "object", "properties": {}, "required": []}),
        );

        let mut builder = WorkflowBuilder::new(INPUT_ID)
            .add_executor(input_adapter())
            .add_executor(terminal_executor())
            .add_edge(INPUT_ID, self.initial.clone());

        for agent in &self.agents {
            let id = agent.id().to_string();
            let mine: Vec<&HandoffTool> =
                handoff_tools.iter().filter(|t| t.from == id).collect();
            let tools: Vec<ToolSpec> = mine
                .iter()
                .map(|t| t.spec.clone())
                .chain(std::iter::once(end_tool.clone()))
                .collect();
            let routes: HashMap<String, String> = mine
                .iter()
                .map(|t| (t.name.clone(), t.to.clone()))
                .collect();

            builder = builder.add_executor(handoff_host_executor(
                Arc::clone(agent),
                tools,
                routes.clone(),
            ));

            // The tool name is embedded in both the schema above and the
            // predicate here, so routing is exact.
            for tool in mine {
                let tool_name = tool.name.clone();
                builder = builder.add_conditional_edge(id.clone(), tool.to.clone(), move |msg| {
                    msg.payload.get("invoked_handoff").and_then(Value::as_str)
                        == Some(tool_name.as_str())
                });
            }
            builder = builder.add_conditional_edge(id.clone(), OUTPUT_ID, |msg| {
                msg.payload.get("invoked_handoff").and_then(Value::as_str) == Some(END_TOOL_NAME)
            });
        }

        let workflow = builder.with_input_type(CHAT_MESSAGES_TAG).build()?;
        Ok(HandoffWorkflow {
            workflow,
            handoff_tools,
            end_tool,
        })
    }
}

/// Wraps the initial conversation into a [`HandoffState`].
fn input_adapter() -> Executor {
    Executor::new(INPUT_ID).handler(CHAT_MESSAGES_TAG, |msg, ctx| {
        Box::pin(async move {
            let messages: Vec<ChatMessage> = serde_json::from_value(msg.payload)?;
            let state = HandoffState::new(messages);
            ctx.send_message(WorkflowMessage::new(
                HANDOFF_STATE_TAG,
                serde_json::to_value(&state)?,
            ))?;
            Ok(None)
        })
    })
}

/// Emits the completed event carrying the final message list.
fn terminal_executor() -> Executor {
    Executor::new(OUTPUT_ID).handler(HANDOFF_STATE_TAG, |msg, ctx| {
        Box::pin(async move {
            let state: HandoffState = serde_json::from_value(msg.payload)?;
            ctx.add_event(WorkflowEvent::WorkflowCompleted {
                result: serde_json::to_value(&state.messages)?,
            })?;
            Ok(None)
        })
    })
}

/// The per-agent executor: a small state machine that re-runs its agent
/// until a terminal tool call appears, then routes accordingly.
fn handoff_host_executor(
    agent: Arc<dyn Agent>,
    tools: Vec<ToolSpec>,
    routes: HashMap<String, String>,
) -> Executor {
    Executor::new(agent.id().to_string()).handler(HANDOFF_STATE_TAG, move |msg, ctx| {
        let agent = Arc::clone(&agent);
        let tools = tools.clone();
        let routes = routes.clone();
        Box::pin(async move {
            let mut state: HandoffState = serde_json::from_value(msg.payload)?;
            let options = AgentRunOptions::new().with_tools(tools);
            let mut phase = HostPhase::Running;

            loop {
                ctx.cancellation().error_if_cancelled()?;
                debug!(agent = %agent.id(), ?phase, "running handoff agent");

                let mut stream = agent
                    .run_streaming(state.messages.clone(), options.clone())
                    .await?;
                phase = HostPhase::AwaitingToolCall;
                debug!(agent = %agent.id(), ?phase, "streaming response");
                let mut updates = Vec::new();
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

                // First terminal tool call wins; it is removed from the
                // visible contents.
                let mut invoked: Option<(String, String)> = None;
                for message in response.messages {
                    let mut message = message.with_author(agent.name().to_string());
                    if invoked.is_none() {
                        let position = message.contents.iter().position(|c| {
                            matches!(
                                c,
                                Content::FunctionCall { name, .. }
                                    if routes.contains_key(name) || name == END_TOOL_NAME
                            )
                        });
                        if let Some(index) = position {
                            if let Content::FunctionCall { call_id, name, .. } =
                                message.contents.remove(index)
                            {
                                invoked = Some((name, call_id));
                            }
                        }
                    }
                    if !message.contents.is_empty() {
                        state.messages.push(message);
                    }
                }

                match invoked {
                    Some((name, _call_id)) if name == END_TOOL_NAME => {
                        phase = HostPhase::Ending;
                        debug!(agent = %agent.id(), ?phase, "conversation ending");
                        state.invoked_handoff = Some(name);
                        ctx.send_message(WorkflowMessage::new(
                            HANDOFF_STATE_TAG,
                            serde_json::to_value(&state)?,
                        ))?;
                        return Ok(None);
                    }
                    Some((name, call_id)) => {
                        let target = routes.get(&name).cloned().unwrap_or_default();
                        phase = HostPhase::HandingOff(target);
                        debug!(agent = %agent.id(), ?phase, "handing off");
                        state
                            .messages
                            .push(ChatMessage::tool(call_id, json!("Transferred.")));
                        state.invoked_handoff = Some(name);
                        ctx.send_message(WorkflowMessage::new(
                            HANDOFF_STATE_TAG,
                            serde_json::to_value(&state)?,
                        ))?;
                        return Ok(None);
                    }
                    None => {
                        // No terminal call: re-run with the accumulated
                        // messages.
                        phase = HostPhase::Running;
                        continue;
                    }
                }
            }
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedAgent;
    use agentflow_core::run::run;
    use agentflow_core::AgentRunResponseUpdate;

    fn triage() -> Arc<dyn Agent> {
        Arc::new(ScriptedAgent::new("triage", |_messages, options| {
            let tool = options
                .tools
                .iter()
                .find(|t| t.description.contains("billing"))
                .cloned();
            let mut update = AgentRunResponseUpdate::text("Let me transfer you.");
            if let Some(tool) = tool {
                update
                    .contents
                    .push(Content::function_call("call-1", tool.name, json!({})));
            }
            vec![update]
        }))
    }

    fn billing() -> Arc<dyn Agent> {
        Arc::new(ScriptedAgent::new("billing", |_messages, options| {
            let end = options.tools.iter().find(|t| t.name == END_TOOL_NAME).cloned();
            let mut update = AgentRunResponseUpdate::text("Your invoice is settled.");
            if let Some(end) = end {
                update
                    .contents
                    .push(Content::function_call("call-2", end.name, json!({})));
            }
            vec![update]
        }))
    }

    #[tokio::test]
    async fn tool_names_embed_a_stable_id() {
        let (a, b) = (triage(), billing());
        let built = HandoffBuilder::start_with(a.clone())
            .with_handoff_reason(&a, &b, "For billing questions.")
            .build()
            .unwrap();

        let name = built.tool_name("triage", "billing").expect("tool exists");
        assert!(name.starts_with("handoff_to_"));
        assert_eq!(built.handoff_tools.len(), 1);
        assert_eq!(built.handoff_tools[0].spec.name, name);
        assert!(built.handoff_tools[0]
            .spec
            .description
            .contains("For billing questions."));
    }

    #[tokio::test]
    async fn triage_hands_off_to_billing_and_billing_ends() {
        let (a, b) = (triage(), billing());
        let built = HandoffBuilder::start_with(a.clone())
            .with_handoff_reason(&a, &b, "billing")
            .build()
            .unwrap();
        let workflow = Arc::new(built.workflow);

        let input =
            serde_json::to_value(vec![ChatMessage::user("I have a billing question")]).unwrap();
        let finished = run(workflow, input).await.unwrap();

        let messages: Vec<ChatMessage> =
            serde_json::from_value(finished.result().expect("completed").clone()).unwrap();
        let texts: Vec<String> = messages.iter().map(|m| m.text()).collect();
        assert_eq!(
            texts,
            vec![
                "I have a billing question",
                "Let me transfer you.",
                "",
                "Your invoice is settled.",
            ]
        );

        // The handoff and end calls were removed from visible contents.
        assert!(messages.iter().all(|m| m
            .function_calls()
            .is_empty()));
        // The synthesized tool result is present and answers the triage call.
        assert!(messages.iter().any(|m| m
            .contents
            .iter()
            .any(|c| matches!(c, Content::FunctionResult { call_id, result }
                if call_id == "call-1" && *result == json!("Transferred.")))));
        // Billing's reply carries its author.
        assert_eq!(messages[3].author_name.as_deref(), Some("billing"));
    }

    #[tokio::test]
    async fn rerun_loop_observes_cancellation() {
        // Never calls a terminal tool; a fired token must break the loop.
        let stubborn: Arc<dyn Agent> = Arc::new(ScriptedAgent::new("stubborn", |_m, _o| {
            vec![AgentRunResponseUpdate::text("still thinking")]
        }));
        let executor = handoff_host_executor(stubborn, vec![], HashMap::new());
        let registration = executor.registrations()[0].clone();

        let ctx = agentflow_core::WorkflowContext::detached("stubborn", "run");
        ctx.cancellation().cancel();

        let state = HandoffState::new(vec![ChatMessage::user("go")]);
        let message = WorkflowMessage::new(HANDOFF_STATE_TAG, serde_json::to_value(&state).unwrap());
        let result = (registration.handler)(message, ctx).await;
        assert!(matches!(
            result,
            Err(agentflow_core::WorkflowError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn agent_is_rerun_until_a_terminal_tool_appears() {
        // Replies without a tool call until three of its replies have
        // accumulated, then ends.
        let chatty: Arc<dyn Agent> = Arc::new(ScriptedAgent::new("chatty", |messages, options| {
            let own_replies = messages
                .iter()
                .filter(|m| m.author_name.as_deref() == Some("chatty"))
                .count();
            if own_replies < 2 {
                vec![AgentRunResponseUpdate::text(format!("thinking {own_replies}"))]
            } else {
                let end = options.tools.iter().find(|t| t.name == END_TOOL_NAME).cloned();
                let mut update = AgentRunResponseUpdate::text("done");
                if let Some(end) = end {
                    update
                        .contents
                        .push(Content::function_call("call-9", end.name, json!({})));
                }
                vec![update]
            }
        }));

        let built = HandoffBuilder::start_with(chatty).build().unwrap();
        let workflow = Arc::new(built.workflow);
        let input = serde_json::to_value(vec![ChatMessage::user("go")]).unwrap();
        let finished = run(workflow, input).await.unwrap();

        let messages: Vec<ChatMessage> =
            serde_json::from_value(finished.result().expect("completed").clone()).unwrap();
        let texts: Vec<String> = messages.iter().map(|m| m.text()).collect();
        assert_eq!(texts, vec!["go", "thinking 0", "thinking 1", "done"]);
    }
}
