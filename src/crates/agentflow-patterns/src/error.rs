//! Error types for pattern construction.

use thiserror::Error;

/// Convenience result type using [`PatternError`].
pub type Result<T> = std::result::Result<T, PatternError>;

/// Errors raised while assembling a prebuilt orchestration pattern.
#[derive(Error, Debug)]
pub enum PatternError {
    /// A pattern was built with no participating agents.
    #[error("the pattern requires at least one participating agent")]
    NoParticipants,

    /// Two participating agents share an id.
    #[error("duplicate agent id '{0}'")]
    DuplicateAgent(String),

    /// A handoff references an agent that was never added.
    #[error("handoff references unknown agent '{0}'")]
    UnknownAgent(String),

    /// The underlying workflow failed validation.
    #[error(transparent)]
    Workflow(#[from] agentflow_core::WorkflowError),

    /// JSON conversion failure while assembling payloads.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
