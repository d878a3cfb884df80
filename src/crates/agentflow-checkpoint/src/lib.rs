//! # agentflow-checkpoint - Run Persistence for Workflow Execution
//!
//! **Trait-based checkpoint abstractions and an in-memory implementation** for
//! persisting and restoring workflow run state. A checkpoint is a safe-point
//! snapshot of a run: the pending message queue, every state scope, partial
//! fan-in buffers, and an event cursor — everything needed to resume a run
//! with identical observable semantics.
//!
//! ## Overview
//!
//! Checkpoints enable:
//!
//! - **Fault recovery** - Resume a run after a crash without re-executing
//!   completed handlers
//! - **Pause and resume** - Park a run while waiting for external input
//! - **Inspection** - Examine the exact state a run was in at a safe point
//! - **Portability** - Move a run between runners sharing the same workflow
//!
//! ## Core Concepts
//!
//! ### 1. RunCheckpoint
//!
//! [`RunCheckpoint`] is the snapshot itself. It captures the dispatcher's
//! pending queue ([`QueuedMessage`]), all state scopes keyed by a stable
//! scope string, per-edge fan-in buffers ([`FanInBufferSnapshot`]), the
//! superstep counter, and the event cursor. The cursor guarantees that a
//! resumed run never re-emits events the caller already observed.
//!
//! ### 2. CheckpointStore
//!
//! The [`CheckpointStore`] trait is the persistence seam:
//!
//! - **`commit()`** - Persist a checkpoint, returning a [`CheckpointInfo`]
//! - **`lookup()`** - Retrieve the checkpoint a [`CheckpointInfo`] names
//!
//! This crate ships [`InMemoryCheckpointStore`] as the reference
//! implementation. Persistent backends (databases, object stores) live
//! outside the core and implement the same trait over opaque bytes.
//!
//! ### 3. Serialization
//!
//! Stores hold **opaque bytes** produced by a [`SerializerProtocol`]
//! (default: [`JsonSerializer`]). Implementations must preserve bytes
//! exactly and honor read-after-write for the same checkpoint id.
//!
//! ## Quick Start
//!
//! ```rust
//! use agentflow_checkpoint::{InMemoryCheckpointStore, CheckpointStore, RunCheckpoint};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = InMemoryCheckpointStore::new();
//!
//!     let checkpoint = RunCheckpoint::new("run-1");
//!     let info = store.commit(checkpoint).await?;
//!
//!     let restored = store.lookup(&info).await?;
//!     assert_eq!(restored.run_id, "run-1");
//!     Ok(())
//! }
//! ```
//!
//! ## See Also
//!
//! - `agentflow-core` - The execution engine that produces and consumes
//!   checkpoints at safe points
//! - [`CheckpointError`] - Error taxonomy for storage and integrity failures

pub mod checkpoint;
pub mod error;
pub mod memory;
pub mod serializer;
pub mod traits;

pub use checkpoint::{
    CheckpointId, CheckpointInfo, FanInBufferSnapshot, MessageSnapshot, PendingRequestSnapshot,
    QueuedMessage, RunCheckpoint,
};
pub use error::{CheckpointError, Result};
pub use memory::InMemoryCheckpointStore;
pub use serializer::{JsonSerializer, SerializerProtocol};
pub use traits::CheckpointStore;
