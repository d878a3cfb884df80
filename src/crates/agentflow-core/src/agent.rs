//! The agent collaborator interface and chat message model.
//!
//! The runtime does not implement agents; it hosts them. An [`Agent`] is
//! anything that can stream a response to a conversation - an LLM-backed
//! assistant, a scripted test double, a remote service. Agent-hosting
//! executors (see the patterns crate) call
//! [`run_streaming`](Agent::run_streaming), surface each
//! [`AgentRunResponseUpdate`] as an `AgentRunUpdate` event, and fold the
//! update sequence into an [`AgentRunResponse`] when the stream ends.
//!
//! # Message Model
//!
//! A [`ChatMessage`] carries a [`Role`] and a list of [`Content`] items:
//! plain text, function calls, function results, and user-input
//! request/response pairs. Multi-content messages are first-class - an
//! assistant turn may hold text *and* a function call.
//!
//! ```rust
//! use agentflow_core::agent::{ChatMessage, Content, Role};
//!
//! let msg = ChatMessage::assistant("Let me transfer you.")
//!     .with_content(Content::function_call("call-1", "handoff_to_billing", serde_json::json!({})));
//!
//! assert_eq!(msg.role, Role::Assistant);
//! assert_eq!(msg.text(), "Let me transfer you.");
//! assert_eq!(msg.function_calls().len(), 1);
//! ```

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;
use uuid::Uuid;

/// Speaker of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions or context for the agent.
    System,
    /// Messages from the user.
    User,
    /// Responses from the agent.
    Assistant,
    /// Results from tool executions.
    Tool,
}

/// One content item inside a message or update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Content {
    /// Plain text.
    Text { text: String },

    /// The agent asks for a function invocation.
    FunctionCall {
        /// Correlation id echoed by the matching result.
        call_id: String,
        /// Function name.
        name: String,
        /// JSON arguments.
        arguments: Value,
    },

    /// The outcome of a function invocation.
    FunctionResult {
        /// Id of the call being answered.
        call_id: String,
        /// JSON result value.
        result: Value,
    },

    /// The agent asks the user directly for input.
    UserInputRequest {
        /// Correlation id echoed by the response.
        request_id: String,
        /// What is being asked.
        prompt: String,
    },

    /// The user's answer to a [`Content::UserInputRequest`].
    UserInputResponse {
        /// Id of the request being answered.
        request_id: String,
        /// The answer.
        response: Value,
    },
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn function_call(
        call_id: impl Into<String>,
        name: impl Into<String>,
        arguments: Value,
    ) -> Self {
        Self::FunctionCall {
            call_id: call_id.into(),
            name: name.into(),
            arguments,
        }
    }

    pub fn function_result(call_id: impl Into<String>, result: Value) -> Self {
        Self::FunctionResult {
            call_id: call_id.into(),
            result,
        }
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who is speaking.
    pub role: Role,

    /// Ordered content items.
    pub contents: Vec<Content>,

    /// Stable message id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,

    /// Display name of the author (agent name, user name).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_name: Option<String>,

    /// Creation timestamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    /// Escape hatch for backend-specific payloads.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_representation: Option<Value>,
}

impl ChatMessage {
    /// Create a message with a single text content.
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            contents: vec![Content::text(text)],
            message_id: None,
            author_name: None,
            created_at: Some(Utc::now()),
            raw_representation: None,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    /// A tool message answering `call_id`.
    pub fn tool(call_id: impl Into<String>, result: Value) -> Self {
        Self {
            role: Role::Tool,
            contents: vec![Content::function_result(call_id, result)],
            message_id: None,
            author_name: None,
            created_at: Some(Utc::now()),
            raw_representation: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author_name = Some(author.into());
        self
    }

    pub fn with_content(mut self, content: Content) -> Self {
        self.contents.push(content);
        self
    }

    /// Concatenated text of every text content.
    pub fn text(&self) -> String {
        self.contents
            .iter()
            .filter_map(|c| match c {
                Content::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Every function call in this message, in order.
    pub fn function_calls(&self) -> Vec<&Content> {
        self.contents
            .iter()
            .filter(|c| matches!(c, Content::FunctionCall { .. }))
            .collect()
    }
}

/// JSON-schema description of a function an agent may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Function name the agent invokes.
    pub name: String,

    /// Natural-language description shown to the agent.
    pub description: String,

    /// JSON schema of the arguments object.
    pub parameters: Value,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// Options passed to [`Agent::run_streaming`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentRunOptions {
    /// Functions the agent may call this run.
    pub tools: Vec<ToolSpec>,

    /// Token resuming a background/resumable response, when the backend
    /// supports it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continuation_token: Option<String>,
}

impl AgentRunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = tools;
        self
    }
}

/// One streamed increment of an agent's response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRunResponseUpdate {
    /// Speaker of the update (usually [`Role::Assistant`]).
    pub role: Role,

    /// Content items carried by this increment.
    pub contents: Vec<Content>,

    /// Id of the message this increment belongs to; increments sharing an id
    /// coalesce into one message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,

    /// Id of the overall response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,

    /// Display name of the author.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_name: Option<String>,

    /// Timestamp of the increment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    /// Escape hatch for backend-specific payloads.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_representation: Option<Value>,

    /// Token for resuming a background response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continuation_token: Option<String>,
}

impl AgentRunResponseUpdate {
    /// A text increment from the assistant.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            contents: vec![Content::text(text)],
            message_id: None,
            response_id: None,
            author_name: None,
            created_at: Some(Utc::now()),
            raw_representation: None,
            continuation_token: None,
        }
    }

    /// An update carrying arbitrary contents.
    pub fn with_contents(contents: Vec<Content>) -> Self {
        Self {
            role: Role::Assistant,
            contents,
            message_id: None,
            response_id: None,
            author_name: None,
            created_at: Some(Utc::now()),
            raw_representation: None,
            continuation_token: None,
        }
    }

    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author_name = Some(author.into());
        self
    }
}

/// The folded result of one agent run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRunResponse {
    /// Messages the run produced, in order.
    pub messages: Vec<ChatMessage>,

    /// Id of the response, when the backend provided one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
}

impl AgentRunResponse {
    /// Fold a streamed update sequence into messages.
    ///
    /// Updates sharing a `message_id` (or consecutively sharing `None`)
    /// coalesce into one message: text contents concatenate, other contents
    /// append in order.
    pub fn from_updates(updates: Vec<AgentRunResponseUpdate>) -> Self {
        let mut messages: Vec<ChatMessage> = Vec::new();
        let mut current_key: Option<Option<String>> = None;
        let mut response_id = None;

        for update in updates {
            if update.response_id.is_some() {
                response_id = update.response_id.clone();
            }
            let key = update.message_id.clone();
            let start_new = current_key.as_ref() != Some(&key) || messages.is_empty();
            if start_new {
                messages.push(ChatMessage {
                    role: update.role,
                    contents: Vec::new(),
                    message_id: key.clone().or_else(|| Some(Uuid::new_v4().to_string())),
                    author_name: update.author_name.clone(),
                    created_at: update.created_at,
                    raw_representation: update.raw_representation.clone(),
                });
                current_key = Some(key);
            }
            let Some(message) = messages.last_mut() else {
                continue;
            };
            for content in update.contents {
                match (&content, message.contents.last_mut()) {
                    // Concatenate adjacent text runs.
                    (Content::Text { text }, Some(Content::Text { text: last })) => {
                        last.push_str(text);
                    }
                    _ => message.contents.push(content),
                }
            }
        }

        Self {
            messages,
            response_id,
        }
    }

    /// Concatenated text of every message.
    pub fn text(&self) -> String {
        self.messages.iter().map(|m| m.text()).collect()
    }
}

/// Pull-based stream of response updates.
pub type AgentUpdateStream = Pin<Box<dyn Stream<Item = Result<AgentRunResponseUpdate>> + Send>>;

/// A conversational collaborator hosted by an executor.
///
/// Implementations stream their response as a sequence of
/// [`AgentRunResponseUpdate`]s. The runtime never inspects how the response
/// is produced; test doubles return scripted updates.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Stable agent id.
    fn id(&self) -> &str;

    /// Display name; defaults to the id.
    fn name(&self) -> &str {
        self.id()
    }

    /// Run the agent over a conversation, streaming updates.
    async fn run_streaming(
        &self,
        messages: Vec<ChatMessage>,
        options: AgentRunOptions,
    ) -> Result<AgentUpdateStream>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_concatenates_only_text_contents() {
        let msg = ChatMessage::assistant("Hello")
            .with_content(Content::function_call("c1", "f", json!({})))
            .with_content(Content::text(" world"));
        assert_eq!(msg.text(), "Hello world");
        assert_eq!(msg.function_calls().len(), 1);
    }

    #[test]
    fn from_updates_coalesces_by_message_id() {
        let updates = vec![
            AgentRunResponseUpdate::text("Hel").with_message_id("m1"),
            AgentRunResponseUpdate::text("lo").with_message_id("m1"),
            AgentRunResponseUpdate::text("Bye").with_message_id("m2"),
        ];
        let response = AgentRunResponse::from_updates(updates);
        assert_eq!(response.messages.len(), 2);
        assert_eq!(response.messages[0].text(), "Hello");
        assert_eq!(response.messages[1].text(), "Bye");
    }

    #[test]
    fn from_updates_preserves_function_calls() {
        let updates = vec![
            AgentRunResponseUpdate::text("Transferring. ").with_message_id("m1"),
            AgentRunResponseUpdate::with_contents(vec![Content::function_call(
                "c1",
                "handoff_to_billing",
                json!({"reason": "invoice"}),
            )])
            .with_message_id("m1"),
        ];
        let response = AgentRunResponse::from_updates(updates);
        assert_eq!(response.messages.len(), 1);
        let calls = response.messages[0].function_calls();
        assert_eq!(calls.len(), 1);
        match calls[0] {
            Content::FunctionCall { name, .. } => assert_eq!(name, "handoff_to_billing"),
            _ => unreachable!(),
        }
    }

    #[test]
    fn response_id_comes_from_updates() {
        let mut update = AgentRunResponseUpdate::text("x");
        update.response_id = Some("resp-9".to_string());
        let response = AgentRunResponse::from_updates(vec![update]);
        assert_eq!(response.response_id.as_deref(), Some("resp-9"));
    }
}
