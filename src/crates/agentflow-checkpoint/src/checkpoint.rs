//! Core checkpoint data structures.
//!
//! A [`RunCheckpoint`] is a complete safe-point snapshot of one workflow run:
//! the dispatcher's pending message queue, every state scope (private and
//! shared), the partial fan-in buffers, and the event cursor. The snapshot is
//! plain serializable data — it never holds closures or executor instances,
//! so it can round-trip through any byte store.
//!
//! Scope keys use a stable string encoding chosen by the runtime
//! (`private:<executor-id>` / `shared:<scope-name>`); this crate treats them
//! as opaque.
//!
//! # Example
//!
//! ```rust
//! use agentflow_checkpoint::{RunCheckpoint, MessageSnapshot, QueuedMessage};
//! use serde_json::json;
//!
//! let mut checkpoint = RunCheckpoint::new("run-42");
//! checkpoint.queue.push(QueuedMessage {
//!     target: "worker".to_string(),
//!     message: MessageSnapshot {
//!         type_tag: "text".to_string(),
//!         payload: json!("hello"),
//!         source_id: None,
//!     },
//! });
//!
//! let info = checkpoint.info();
//! assert_eq!(info.run_id, "run-42");
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Checkpoint ID type.
pub type CheckpointId = String;

/// Serializable form of one in-flight message.
///
/// Mirrors the runtime's message envelope (type tag, opaque payload, and the
/// id of the executor that sent it) without depending on runtime types.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageSnapshot {
    /// Type tag the dispatcher routes on.
    pub type_tag: String,

    /// Opaque payload value.
    pub payload: Value,

    /// Executor that emitted the message, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
}

/// One entry of the dispatcher's pending queue: a message addressed to a
/// target executor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueuedMessage {
    /// Target executor id.
    pub target: String,

    /// The message awaiting delivery.
    pub message: MessageSnapshot,
}

/// Partial fan-in state for one fan-in edge.
///
/// Holds the latest message received from each source that has contributed
/// in the current gating round. Entries keep declared-source order so the
/// restored buffer bundles identically to the original.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct FanInBufferSnapshot {
    /// Stable edge id assigned by the workflow builder.
    pub edge_id: String,

    /// `(source id, latest message)` pairs in declared source order.
    pub pending: Vec<(String, MessageSnapshot)>,
}

/// An external request that was still awaiting its response at capture time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingRequestSnapshot {
    /// Port that emitted the request.
    pub port_id: String,

    /// Correlation id the response must echo.
    pub request_id: String,

    /// Type tag of the request payload.
    pub type_tag: String,

    /// The request payload.
    pub payload: Value,
}

/// Complete safe-point snapshot of a workflow run.
///
/// Sufficient to resume the run with observationally identical semantics:
/// the remaining event sequence and final state of a resumed run match an
/// uninterrupted continuation from the same point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunCheckpoint {
    /// Checkpoint format version (currently 1).
    pub v: i32,

    /// Unique checkpoint id.
    pub checkpoint_id: CheckpointId,

    /// The run this checkpoint belongs to. A resumed run inherits it.
    pub run_id: String,

    /// Capture timestamp.
    pub created_at: DateTime<Utc>,

    /// Pending messages, in FIFO order.
    pub queue: Vec<QueuedMessage>,

    /// All state scopes: stable scope key -> (state key -> value).
    ///
    /// Covers executor private scopes and named shared scopes alike.
    pub scopes: HashMap<String, HashMap<String, Value>>,

    /// Partial fan-in buffers, one per fan-in edge with pending arrivals.
    pub fan_in_buffers: Vec<FanInBufferSnapshot>,

    /// External requests whose responses were still outstanding.
    #[serde(default)]
    pub pending_requests: Vec<PendingRequestSnapshot>,

    /// Superstep counter at capture time.
    pub superstep: u64,

    /// Number of events emitted before the capture.
    ///
    /// A resumed run continues numbering from here so callers never observe
    /// a replayed event.
    pub event_cursor: u64,
}

impl RunCheckpoint {
    /// Current checkpoint format version.
    pub const CURRENT_VERSION: i32 = 1;

    /// Create an empty checkpoint for a run, with a fresh id and timestamp.
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            v: Self::CURRENT_VERSION,
            checkpoint_id: Uuid::new_v4().to_string(),
            run_id: run_id.into(),
            created_at: Utc::now(),
            queue: Vec::new(),
            scopes: HashMap::new(),
            fan_in_buffers: Vec::new(),
            pending_requests: Vec::new(),
            superstep: 0,
            event_cursor: 0,
        }
    }

    /// The [`CheckpointInfo`] naming this checkpoint.
    pub fn info(&self) -> CheckpointInfo {
        CheckpointInfo {
            checkpoint_id: self.checkpoint_id.clone(),
            created_at: self.created_at,
            run_id: self.run_id.clone(),
        }
    }
}

/// Handle identifying a committed checkpoint.
///
/// Equality is structural: two infos naming the same checkpoint id, creation
/// time, and run id are interchangeable lookup keys.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct CheckpointInfo {
    /// The checkpoint id.
    pub checkpoint_id: CheckpointId,

    /// When the checkpoint was captured.
    pub created_at: DateTime<Utc>,

    /// The run the checkpoint belongs to.
    pub run_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_checkpoint_is_empty() {
        let checkpoint = RunCheckpoint::new("run-1");
        assert_eq!(checkpoint.v, RunCheckpoint::CURRENT_VERSION);
        assert_eq!(checkpoint.run_id, "run-1");
        assert!(checkpoint.queue.is_empty());
        assert!(checkpoint.scopes.is_empty());
        assert!(checkpoint.fan_in_buffers.is_empty());
        assert_eq!(checkpoint.event_cursor, 0);
    }

    #[test]
    fn info_is_structural() {
        let checkpoint = RunCheckpoint::new("run-1");
        let a = checkpoint.info();
        let b = checkpoint.info();
        assert_eq!(a, b);
    }

    #[test]
    fn checkpoint_round_trips_through_json() {
        let mut checkpoint = RunCheckpoint::new("run-1");
        checkpoint.queue.push(QueuedMessage {
            target: "t".to_string(),
            message: MessageSnapshot {
                type_tag: "number".to_string(),
                payload: json!(7),
                source_id: Some("s".to_string()),
            },
        });
        checkpoint
            .scopes
            .entry("private:t".to_string())
            .or_default()
            .insert("count".to_string(), json!(3));

        let bytes = serde_json::to_vec(&checkpoint).unwrap();
        let restored: RunCheckpoint = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(restored.queue, checkpoint.queue);
        assert_eq!(restored.scopes, checkpoint.scopes);
        assert_eq!(restored.checkpoint_id, checkpoint.checkpoint_id);
    }
}
