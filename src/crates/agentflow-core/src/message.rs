//! Type-tagged message envelopes and the assignability registry.
//!
//! Executors communicate by sending [`WorkflowMessage`]s along edges. Every
//! message carries a **type tag** - a string identifying the payload's
//! logical type - and the dispatcher selects handlers by tag, not by Rust
//! type. This keeps the whole workflow serializable: a message is plain data
//! and can sit in a checkpointed queue.
//!
//! # Type Tags
//!
//! Tags form a small subtype DAG managed by [`TypeRegistry`]. A handler
//! registered for tag `T` receives every message whose tag is `T` or a
//! declared subtype of `T`. The wildcard [`ANY_TAG`] accepts everything.
//!
//! ```rust
//! use agentflow_core::message::TypeRegistry;
//!
//! let mut registry = TypeRegistry::new();
//! registry.register_subtype("int", "number");
//!
//! assert!(registry.is_assignable("int", "number"));
//! assert!(registry.is_assignable("int", "int"));
//! assert!(!registry.is_assignable("number", "int"));
//! ```
//!
//! # Well-Known Tags
//!
//! - [`ANY_TAG`] - wildcard handler input
//! - [`TURN_TOKEN_TAG`] - end-of-phase sentinel; batching executors flush on
//!   receipt and forward it downstream
//! - [`CHAT_MESSAGES_TAG`] - a `Vec<ChatMessage>` payload used by the
//!   orchestration patterns
//! - [`FAN_IN_BUNDLE_TAG`] - the synthesized bundle a fan-in edge delivers,
//!   one entry per declared source in declared order

use agentflow_checkpoint::MessageSnapshot;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet, VecDeque};

/// Message type tag - a string naming the payload's logical type.
pub type TypeTag = String;

/// Wildcard tag: a handler registered for it accepts any message.
pub const ANY_TAG: &str = "__any__";

/// Sentinel tag signaling "this batch is complete".
///
/// Batching executors flush their accumulator when the token arrives and
/// forward the token downstream; the orchestration patterns use it to
/// synchronize phase boundaries.
pub const TURN_TOKEN_TAG: &str = "__turn_token__";

/// Tag carried by conversation payloads (`Vec<ChatMessage>` as JSON).
pub const CHAT_MESSAGES_TAG: &str = "chat_messages";

/// Tag of the bundle a fan-in edge synthesizes when all sources have
/// contributed.
pub const FAN_IN_BUNDLE_TAG: &str = "__fan_in_bundle__";

/// A message in flight: `(type tag, payload, source executor)`.
///
/// Payload identity is preserved end to end - the dispatcher never
/// re-encodes the `Value` while routing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowMessage {
    /// Tag the dispatcher routes on.
    pub type_tag: TypeTag,

    /// Opaque payload.
    pub payload: Value,

    /// Executor that sent the message; `None` for workflow input and
    /// injected responses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
}

impl WorkflowMessage {
    /// Create a message with no source.
    pub fn new(type_tag: impl Into<TypeTag>, payload: Value) -> Self {
        Self {
            type_tag: type_tag.into(),
            payload,
            source_id: None,
        }
    }

    /// Attach the sending executor's id.
    pub fn with_source(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }

    /// A turn token message.
    pub fn turn_token() -> Self {
        Self::new(TURN_TOKEN_TAG, json!({}))
    }

    /// Whether this message is the turn token sentinel.
    pub fn is_turn_token(&self) -> bool {
        self.type_tag == TURN_TOKEN_TAG
    }
}

impl From<WorkflowMessage> for MessageSnapshot {
    fn from(msg: WorkflowMessage) -> Self {
        MessageSnapshot {
            type_tag: msg.type_tag,
            payload: msg.payload,
            source_id: msg.source_id,
        }
    }
}

impl From<MessageSnapshot> for WorkflowMessage {
    fn from(snapshot: MessageSnapshot) -> Self {
        WorkflowMessage {
            type_tag: snapshot.type_tag,
            payload: snapshot.payload,
            source_id: snapshot.source_id,
        }
    }
}

/// Build the bundle a fan-in edge delivers to its target.
///
/// Entries keep the declared source order; each entry is the full envelope
/// so the target can recover both payload and provenance.
pub fn bundle_messages(entries: &[WorkflowMessage]) -> WorkflowMessage {
    let items: Vec<Value> = entries
        .iter()
        .map(|m| {
            json!({
                "type_tag": m.type_tag,
                "payload": m.payload,
                "source_id": m.source_id,
            })
        })
        .collect();
    WorkflowMessage::new(FAN_IN_BUNDLE_TAG, Value::Array(items))
}

/// Recover the bundled envelopes from a fan-in bundle message.
pub fn unbundle_messages(message: &WorkflowMessage) -> crate::error::Result<Vec<WorkflowMessage>> {
    if message.type_tag != FAN_IN_BUNDLE_TAG {
        return Err(crate::error::WorkflowError::InvalidInput(format!(
            "expected a '{}' payload, got '{}'",
            FAN_IN_BUNDLE_TAG, message.type_tag
        )));
    }
    let items = message.payload.as_array().ok_or_else(|| {
        crate::error::WorkflowError::InvalidInput("fan-in bundle payload is not an array".into())
    })?;
    items
        .iter()
        .map(|item| {
            let type_tag = item["type_tag"]
                .as_str()
                .ok_or_else(|| {
                    crate::error::WorkflowError::InvalidInput(
                        "fan-in bundle entry missing type_tag".into(),
                    )
                })?
                .to_string();
            let source_id = item["source_id"].as_str().map(|s| s.to_string());
            Ok(WorkflowMessage {
                type_tag,
                payload: item["payload"].clone(),
                source_id,
            })
        })
        .collect()
}

/// Subtype declarations used for handler selection.
///
/// The registry records `subtype -> supertype` edges; assignability is
/// reachability in that DAG. Registration order does not matter and cycles
/// are tolerated (the walk keeps a visited set).
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    supertypes: HashMap<TypeTag, Vec<TypeTag>>,
}

impl TypeRegistry {
    /// An empty registry: only exact-tag and wildcard matches.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `subtype` assignable wherever `supertype` is accepted.
    pub fn register_subtype(&mut self, subtype: impl Into<TypeTag>, supertype: impl Into<TypeTag>) {
        let supertype = supertype.into();
        let entry = self.supertypes.entry(subtype.into()).or_default();
        if !entry.contains(&supertype) {
            entry.push(supertype);
        }
    }

    /// Whether a payload tagged `from` may be delivered to a handler
    /// registered for `to`.
    pub fn is_assignable(&self, from: &str, to: &str) -> bool {
        if to == ANY_TAG || from == to {
            return true;
        }
        let mut visited: HashSet<&str> = HashSet::new();
        let mut frontier: VecDeque<&str> = VecDeque::new();
        frontier.push_back(from);
        while let Some(tag) = frontier.pop_front() {
            if !visited.insert(tag) {
                continue;
            }
            if let Some(parents) = self.supertypes.get(tag) {
                for parent in parents {
                    if parent == to {
                        return true;
                    }
                    frontier.push_back(parent);
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_and_wildcard_assignability() {
        let registry = TypeRegistry::new();
        assert!(registry.is_assignable("text", "text"));
        assert!(registry.is_assignable("text", ANY_TAG));
        assert!(!registry.is_assignable("text", "number"));
    }

    #[test]
    fn transitive_assignability() {
        let mut registry = TypeRegistry::new();
        registry.register_subtype("int", "number");
        registry.register_subtype("number", "scalar");

        assert!(registry.is_assignable("int", "scalar"));
        assert!(!registry.is_assignable("scalar", "int"));
    }

    #[test]
    fn cyclic_declarations_terminate() {
        let mut registry = TypeRegistry::new();
        registry.register_subtype("a", "b");
        registry.register_subtype("b", "a");

        assert!(registry.is_assignable("a", "b"));
        assert!(registry.is_assignable("b", "a"));
        assert!(!registry.is_assignable("a", "c"));
    }

    #[test]
    fn bundle_round_trip_preserves_order_and_payload() {
        let entries = vec![
            WorkflowMessage::new("number", json!(2)).with_source("s1"),
            WorkflowMessage::new("number", json!(5)).with_source("s2"),
        ];
        let bundle = bundle_messages(&entries);
        assert_eq!(bundle.type_tag, FAN_IN_BUNDLE_TAG);

        let recovered = unbundle_messages(&bundle).unwrap();
        assert_eq!(recovered, entries);
    }

    #[test]
    fn turn_token_detection() {
        assert!(WorkflowMessage::turn_token().is_turn_token());
        assert!(!WorkflowMessage::new("text", json!("hi")).is_turn_token());
    }
}
