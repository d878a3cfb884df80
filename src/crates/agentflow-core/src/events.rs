//! Lifecycle events surfaced to the caller during a run.
//!
//! Every run produces an ordered event log: the streaming controller yields
//! events as they occur, the non-streaming controller buffers them into a
//! snapshot. Events reflect true handler completion order within a run
//! (FIFO), which is the only observable deterministic ordering.
//!
//! # Event Flow
//!
//! ```text
//! WorkflowStarted
//!   ExecutorInvoked ─┐
//!   (handler events) │ repeated per delivered message
//!   ExecutorCompleted┘
//!   CheckpointCreated        (when a checkpoint store is bound)
//!   RequestInfo              (when an input port emits a request)
//!   AgentRunUpdate/Response  (from agent-hosting executors)
//!   WorkflowCompleted        (emitted by a terminal executor)
//! RunEnded { status }
//! ```

use crate::agent::{AgentRunResponse, AgentRunResponseUpdate};
use crate::ports::ExternalRequest;
use agentflow_checkpoint::CheckpointInfo;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Terminal and intermediate status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Created but not yet seeded.
    Idle,
    /// Messages pending or handlers executing.
    Running,
    /// Quiescent with outstanding external requests; waiting on responses.
    PendingResponses,
    /// Drained to quiescence with no outstanding requests.
    Completed,
    /// Halted by a handler failure or routing error.
    Failed,
    /// Halted by cancellation.
    Cancelled,
}

impl RunStatus {
    /// Whether the run can make no further progress.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// An observable event in a run's lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum WorkflowEvent {
    /// The run was seeded with its input.
    WorkflowStarted {
        /// The run id events and checkpoints are tagged with.
        run_id: String,
        /// The input payload, when one was provided.
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },

    /// A handler is about to run for a delivered message.
    ExecutorInvoked {
        executor_id: String,
        /// The delivered payload.
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },

    /// The handler returned successfully; its queued writes are applied.
    ExecutorCompleted { executor_id: String },

    /// The handler failed or the message matched no handler; the run halts.
    ExecutorFailed { executor_id: String, error: String },

    /// A streamed update from an agent hosted by an executor.
    AgentRunUpdate {
        executor_id: String,
        update: AgentRunResponseUpdate,
    },

    /// An agent finished responding inside an executor.
    AgentRunResponse {
        executor_id: String,
        response: AgentRunResponse,
    },

    /// A terminal executor published the workflow's result.
    WorkflowCompleted { result: Value },

    /// A run-level error outside any single handler.
    WorkflowError { error: String },

    /// A checkpoint was committed at a safe point.
    CheckpointCreated { info: CheckpointInfo },

    /// An input port requests a caller-supplied response.
    RequestInfo { request: ExternalRequest },

    /// The run reached a terminal status.
    RunEnded { status: RunStatus },
}

impl WorkflowEvent {
    /// The executor this event concerns, if any.
    pub fn executor_id(&self) -> Option<&str> {
        match self {
            Self::ExecutorInvoked { executor_id, .. }
            | Self::ExecutorCompleted { executor_id }
            | Self::ExecutorFailed { executor_id, .. }
            | Self::AgentRunUpdate { executor_id, .. }
            | Self::AgentRunResponse { executor_id, .. } => Some(executor_id),
            _ => None,
        }
    }

    /// The completed result when this is a `WorkflowCompleted` event.
    pub fn completed_result(&self) -> Option<&Value> {
        match self {
            Self::WorkflowCompleted { result } => Some(result),
            _ => None,
        }
    }
}
