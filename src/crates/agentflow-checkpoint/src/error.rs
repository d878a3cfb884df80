//! Error types for checkpoint storage and retrieval.

use thiserror::Error;

/// Convenience result type using [`CheckpointError`].
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Errors raised while committing, looking up, or decoding checkpoints.
///
/// A [`NotFound`](CheckpointError::NotFound) or
/// [`Integrity`](CheckpointError::Integrity) error is terminal for the resume
/// attempt that triggered it; the caller must fall back to an earlier
/// checkpoint or restart the run.
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// No checkpoint exists under the requested id.
    #[error("Checkpoint '{0}' not found")]
    NotFound(String),

    /// Stored bytes exist but do not decode to the checkpoint they claim to be.
    ///
    /// Raised when deserialization fails or when the decoded snapshot
    /// disagrees with the [`CheckpointInfo`](crate::CheckpointInfo) used to
    /// look it up.
    #[error("Checkpoint integrity error: {0}")]
    Integrity(String),

    /// JSON encode/decode failure.
    #[error("Checkpoint serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend-specific storage failure.
    #[error("Checkpoint storage error: {0}")]
    Storage(String),
}
