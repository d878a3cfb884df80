//! Scripted agent doubles for tests and examples.
//!
//! A [`ScriptedAgent`] turns a plain function over the conversation (and the
//! offered tools) into an [`Agent`] whose `run_streaming` yields the
//! scripted updates one by one. No network, no model - deterministic by
//! construction.

use agentflow_core::{
    Agent, AgentRunOptions, AgentRunResponseUpdate, AgentUpdateStream, ChatMessage,
};
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;

/// Script signature: `(conversation, options) -> updates`.
pub type ScriptFn =
    Arc<dyn Fn(Vec<ChatMessage>, AgentRunOptions) -> Vec<AgentRunResponseUpdate> + Send + Sync>;

/// An [`Agent`] driven by a deterministic script.
#[derive(Clone)]
pub struct ScriptedAgent {
    id: String,
    name: Option<String>,
    script: ScriptFn,
}

impl ScriptedAgent {
    pub fn new<F>(id: impl Into<String>, script: F) -> Self
    where
        F: Fn(Vec<ChatMessage>, AgentRunOptions) -> Vec<AgentRunResponseUpdate>
            + Send
            + Sync
            + 'static,
    {
        Self {
            id: id.into(),
            name: None,
            script: Arc::new(script),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl std::fmt::Debug for ScriptedAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedAgent").field("id", &self.id).finish_non_exhaustive()
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    async fn run_streaming(
        &self,
        messages: Vec<ChatMessage>,
        options: AgentRunOptions,
    ) -> agentflow_core::Result<AgentUpdateStream> {
        let updates = (self.script)(messages, options);
        Ok(futures::stream::iter(updates.into_iter().map(Ok)).boxed())
    }
}

/// An agent replying with the uppercase of the last message's text.
pub fn uppercase_agent(id: impl Into<String>) -> Arc<dyn Agent> {
    Arc::new(ScriptedAgent::new(id, |messages, _options| {
        let last = messages.last().map(|m| m.text()).unwrap_or_default();
        vec![AgentRunResponseUpdate::text(last.to_uppercase())]
    }))
}

/// An agent replying with the last message's text plus a suffix.
pub fn suffix_agent(id: impl Into<String>, suffix: impl Into<String>) -> Arc<dyn Agent> {
    let suffix = suffix.into();
    Arc::new(ScriptedAgent::new(id, move |messages, _options| {
        let last = messages.last().map(|m| m.text()).unwrap_or_default();
        vec![AgentRunResponseUpdate::text(format!("{last}{suffix}"))]
    }))
}

/// An agent always replying with a fixed text.
pub fn fixed_reply_agent(id: impl Into<String>, reply: impl Into<String>) -> Arc<dyn Agent> {
    let reply = reply.into();
    Arc::new(ScriptedAgent::new(id, move |_messages, _options| {
        vec![AgentRunResponseUpdate::text(reply.clone())]
    }))
}
