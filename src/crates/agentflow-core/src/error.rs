//! Error types for workflow construction and execution.
//!
//! All errors implement `std::error::Error` via the `thiserror` crate.
//!
//! # Error Surfaces
//!
//! | Kind | Surface | Recovery |
//! |------|---------|----------|
//! | [`Validation`](WorkflowError::Validation) | `WorkflowBuilder::build()` | Fix the definition |
//! | [`Routing`](WorkflowError::Routing) | `ExecutorFailed` event, run halts | Resume from a checkpoint or redesign |
//! | [`ExecutorFailure`](WorkflowError::ExecutorFailure) | `ExecutorFailed` event, run halts | Resume from a checkpoint |
//! | [`Cancelled`](WorkflowError::Cancelled) | Run status `Cancelled` | Terminal |
//! | [`PortTypeMismatch`](WorkflowError::PortTypeMismatch) | Response enqueue | Re-issue the response |
//! | [`Checkpoint`](WorkflowError::Checkpoint) | `resume_*` entry points | Terminal for that resume |
//!
//! Errors inside a handler are never silently swallowed, and the dispatcher
//! never retries a handler automatically; retry is a user-level decision
//! expressed as a loop of edges.

use thiserror::Error;

/// Convenience result type using [`WorkflowError`].
pub type Result<T> = std::result::Result<T, WorkflowError>;

/// Comprehensive error type for workflow construction and execution.
#[derive(Error, Debug)]
pub enum WorkflowError {
    /// Workflow structure validation failed.
    ///
    /// Raised from `build()` for unbound executor references, dangling edge
    /// endpoints, duplicate unconditional edges, duplicate handler
    /// registrations, or a start executor that cannot accept the declared
    /// input type.
    #[error("Workflow validation failed: {0}")]
    Validation(String),

    /// A delivered message matched no handler on the target executor.
    #[error("Executor '{executor_id}' has no handler for message type '{type_tag}'")]
    Routing {
        /// Executor the message was addressed to.
        executor_id: String,
        /// Type tag of the unroutable message.
        type_tag: String,
    },

    /// A handler returned an error.
    ///
    /// The dispatcher surfaces this as an `ExecutorFailed` event and halts
    /// the run; state updates queued by the failed handler are discarded.
    #[error("Executor '{executor_id}' failed: {error}")]
    ExecutorFailure {
        /// Executor whose handler failed.
        executor_id: String,
        /// Error message from the handler.
        error: String,
    },

    /// The run was cancelled.
    ///
    /// Handlers may return this to acknowledge a fired cancellation token;
    /// the dispatcher ends the run with status `Cancelled`, not `Failed`.
    #[error("Run cancelled")]
    Cancelled,

    /// An external response's payload type is not assignable to the port's
    /// declared response type. Raised at enqueue, before any state changes.
    #[error("Port '{port_id}' expects a response assignable to '{expected}', got '{actual}'")]
    PortTypeMismatch {
        /// The port the response was addressed to.
        port_id: String,
        /// The port's declared response type tag.
        expected: String,
        /// The actual payload type tag.
        actual: String,
    },

    /// An external response referenced a request id with no outstanding
    /// request.
    #[error("No pending external request with id '{0}'")]
    UnknownRequest(String),

    /// A `WorkflowContext` was used after its handler invocation returned.
    ///
    /// Handlers must not capture the context beyond the call.
    #[error("Workflow context used outside its handler invocation")]
    ContextExpired,

    /// The run input could not be delivered to the start executor.
    #[error("Invalid workflow input: {0}")]
    InvalidInput(String),

    /// Checkpoint commit or lookup failed.
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] agentflow_checkpoint::CheckpointError),

    /// JSON serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Application-defined error, typically returned from a handler.
    #[error("{0}")]
    Custom(String),
}

impl WorkflowError {
    /// Create an executor failure error with context.
    pub fn executor_failure(executor_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self::ExecutorFailure {
            executor_id: executor_id.into(),
            error: error.into(),
        }
    }

    /// Create a routing error for an unroutable message.
    pub fn routing(executor_id: impl Into<String>, type_tag: impl Into<String>) -> Self {
        Self::Routing {
            executor_id: executor_id.into(),
            type_tag: type_tag.into(),
        }
    }

    /// Whether this error represents cooperative cancellation.
    ///
    /// The dispatcher maps cancellation to run status `Cancelled` instead of
    /// `Failed`.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
