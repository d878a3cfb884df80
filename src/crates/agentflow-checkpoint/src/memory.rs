//! In-memory checkpoint storage for development and testing.
//!
//! [`InMemoryCheckpointStore`] keeps serialized checkpoints in a
//! `tokio::sync::RwLock<HashMap>` keyed by checkpoint id. All operations are
//! in-memory and data is lost on process exit — use it for tests, demos, and
//! short-lived runs; implement [`CheckpointStore`] over a database for
//! anything that must survive a restart.
//!
//! Checkpoints are held as the **bytes** produced by the configured
//! [`SerializerProtocol`], not as live structs, so the store exercises the
//! same byte-fidelity contract a persistent backend must satisfy.
//!
//! # Example
//!
//! ```rust
//! use agentflow_checkpoint::{CheckpointStore, InMemoryCheckpointStore, RunCheckpoint};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = InMemoryCheckpointStore::new();
//!
//! let info = store.commit(RunCheckpoint::new("run-1")).await?;
//! assert_eq!(store.len().await, 1);
//!
//! let restored = store.lookup(&info).await?;
//! assert_eq!(restored.info(), info);
//! # Ok(())
//! # }
//! ```

use crate::checkpoint::{CheckpointInfo, RunCheckpoint};
use crate::error::{CheckpointError, Result};
use crate::serializer::{JsonSerializer, SerializerProtocol};
use crate::traits::CheckpointStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

struct StoredEntry {
    info: CheckpointInfo,
    bytes: Vec<u8>,
}

/// Thread-safe in-memory [`CheckpointStore`].
///
/// Cloning the store shares the underlying map.
#[derive(Clone)]
pub struct InMemoryCheckpointStore {
    entries: Arc<RwLock<HashMap<String, StoredEntry>>>,
    serializer: Arc<dyn SerializerProtocol>,
}

impl InMemoryCheckpointStore {
    /// Create an empty store using the default JSON serializer.
    pub fn new() -> Self {
        Self::with_serializer(Arc::new(JsonSerializer::new()))
    }

    /// Create an empty store using a custom serializer protocol.
    pub fn with_serializer(serializer: Arc<dyn SerializerProtocol>) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            serializer,
        }
    }

    /// Number of checkpoints currently held.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the store holds no checkpoints.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Drop every stored checkpoint. Intended for test isolation.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

impl Default for InMemoryCheckpointStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryCheckpointStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryCheckpointStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn commit(&self, checkpoint: RunCheckpoint) -> Result<CheckpointInfo> {
        let info = checkpoint.info();
        let bytes = self.serializer.dumps(&checkpoint)?;
        self.entries.write().await.insert(
            info.checkpoint_id.clone(),
            StoredEntry {
                info: info.clone(),
                bytes,
            },
        );
        Ok(info)
    }

    async fn lookup(&self, info: &CheckpointInfo) -> Result<RunCheckpoint> {
        let entries = self.entries.read().await;
        let entry = entries
            .get(&info.checkpoint_id)
            .ok_or_else(|| CheckpointError::NotFound(info.checkpoint_id.clone()))?;

        if entry.info != *info {
            return Err(CheckpointError::Integrity(format!(
                "checkpoint '{}' does not match the supplied info",
                info.checkpoint_id
            )));
        }

        let checkpoint = self
            .serializer
            .loads(&entry.bytes)
            .map_err(|e| CheckpointError::Integrity(e.to_string()))?;
        Ok(checkpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn commit_and_lookup_round_trip() {
        let store = InMemoryCheckpointStore::new();
        let checkpoint = RunCheckpoint::new("run-1");
        let id = checkpoint.checkpoint_id.clone();

        let info = store.commit(checkpoint).await.unwrap();
        assert_eq!(info.checkpoint_id, id);

        let restored = store.lookup(&info).await.unwrap();
        assert_eq!(restored.checkpoint_id, id);
        assert_eq!(restored.run_id, "run-1");
    }

    #[tokio::test]
    async fn lookup_unknown_id_fails() {
        let store = InMemoryCheckpointStore::new();
        let info = CheckpointInfo {
            checkpoint_id: "missing".to_string(),
            created_at: Utc::now(),
            run_id: "run-1".to_string(),
        };

        match store.lookup(&info).await {
            Err(CheckpointError::NotFound(id)) => assert_eq!(id, "missing"),
            other => panic!("expected NotFound, got {:?}", other.map(|c| c.checkpoint_id)),
        }
    }

    #[tokio::test]
    async fn lookup_with_mismatched_info_fails() {
        let store = InMemoryCheckpointStore::new();
        let checkpoint = RunCheckpoint::new("run-1");
        let mut info = store.commit(checkpoint).await.unwrap();
        info.run_id = "someone-else".to_string();

        assert!(matches!(
            store.lookup(&info).await,
            Err(CheckpointError::Integrity(_))
        ));
    }

    #[tokio::test]
    async fn clear_empties_the_store() {
        let store = InMemoryCheckpointStore::new();
        store.commit(RunCheckpoint::new("run-1")).await.unwrap();
        store.commit(RunCheckpoint::new("run-2")).await.unwrap();
        assert_eq!(store.len().await, 2);

        store.clear().await;
        assert!(store.is_empty().await);
    }
}
