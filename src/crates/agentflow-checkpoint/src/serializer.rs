//! Serialization protocol between checkpoints and byte stores.
//!
//! Stores persist **opaque bytes**; a [`SerializerProtocol`] implementation
//! decides the encoding. The default is [`JsonSerializer`]. Custom protocols
//! (compressed, binary) implement the same two methods; whatever `dumps`
//! produces, the store must hand back to `loads` byte-for-byte.

use crate::checkpoint::RunCheckpoint;
use crate::error::Result;

/// Encodes checkpoints to bytes and back.
pub trait SerializerProtocol: Send + Sync {
    /// Serialize a checkpoint to opaque bytes.
    fn dumps(&self, checkpoint: &RunCheckpoint) -> Result<Vec<u8>>;

    /// Reconstruct a checkpoint from bytes produced by [`dumps`](Self::dumps).
    fn loads(&self, bytes: &[u8]) -> Result<RunCheckpoint>;
}

/// JSON encoding of checkpoints.
///
/// Human-readable and cross-language friendly; the default protocol for
/// every store in this workspace.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl JsonSerializer {
    pub fn new() -> Self {
        Self
    }
}

impl SerializerProtocol for JsonSerializer {
    fn dumps(&self, checkpoint: &RunCheckpoint) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(checkpoint)?)
    }

    fn loads(&self, bytes: &[u8]) -> Result<RunCheckpoint> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_round_trip() {
        let serializer = JsonSerializer::new();
        let checkpoint = RunCheckpoint::new("run-1");

        let bytes = serializer.dumps(&checkpoint).unwrap();
        let restored = serializer.loads(&bytes).unwrap();
        assert_eq!(restored.checkpoint_id, checkpoint.checkpoint_id);
        assert_eq!(restored.run_id, "run-1");
    }

    #[test]
    fn loads_rejects_garbage() {
        let serializer = JsonSerializer::new();
        assert!(serializer.loads(b"not json").is_err());
    }
}
