//! The [`CheckpointStore`] trait - the persistence seam for run state.
//!
//! The runtime talks to storage exclusively through this trait. The
//! in-memory implementation in [`memory`](crate::memory) is the reference;
//! persistent backends live outside the core and must honor the same
//! contract:
//!
//! - `commit` then `lookup` with the returned info yields an equal
//!   checkpoint (read-after-write per id)
//! - stored bytes are preserved exactly
//! - `lookup` with an unknown id fails with
//!   [`CheckpointError::NotFound`](crate::CheckpointError::NotFound)

use crate::checkpoint::{CheckpointInfo, RunCheckpoint};
use crate::error::Result;
use async_trait::async_trait;

/// Storage backend for run checkpoints.
///
/// # Example
///
/// ```rust
/// use agentflow_checkpoint::{CheckpointStore, InMemoryCheckpointStore, RunCheckpoint};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryCheckpointStore::new();
/// let info = store.commit(RunCheckpoint::new("run-1")).await?;
/// let restored = store.lookup(&info).await?;
/// assert_eq!(restored.run_id, "run-1");
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist a checkpoint and return the info that names it.
    async fn commit(&self, checkpoint: RunCheckpoint) -> Result<CheckpointInfo>;

    /// Retrieve the checkpoint a previously returned info names.
    ///
    /// # Errors
    ///
    /// [`CheckpointError::NotFound`](crate::CheckpointError::NotFound) for an
    /// unknown id; [`CheckpointError::Integrity`](crate::CheckpointError::Integrity)
    /// when stored bytes fail to decode or disagree with `info`.
    async fn lookup(&self, info: &CheckpointInfo) -> Result<RunCheckpoint>;
}
