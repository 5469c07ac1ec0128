//! Wire envelope for document operations.
//!
//! Every WebSocket binary message carries exactly one [`Frame`]. The relay
//! never looks inside; only sessions encode and decode them.
//!
//! Wire format (bincode, standard config):
//! ```text
//! ┌──────────┬────────────┬──────────────────────────┐
//! │ kind     │ compressed │ payload                  │
//! │ 1 byte   │ 1 byte     │ varint len + bytes       │
//! └──────────┴────────────┴──────────────────────────┘
//! ```
//!
//! Snapshots scale with the document, so large ones are LZ4-compressed.
//! Incremental updates are typically a few dozen bytes and go out raw.

use serde::{Deserialize, Serialize};

use crate::error::FrameError;

/// Snapshots above this many bytes are compressed.
pub const COMPRESS_THRESHOLD: usize = 1024;

/// What the payload of a frame holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum FrameKind {
    /// Full document state, sent whenever a connection opens
    Snapshot = 1,
    /// Incremental update produced by one local transaction
    Update = 2,
}

/// One operation on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub kind: FrameKind,
    /// Payload is `lz4_flex` block data with a prepended size
    pub compressed: bool,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Wrap an encoded full-state snapshot.
    pub fn snapshot(state: Vec<u8>) -> Self {
        if state.len() > COMPRESS_THRESHOLD {
            Self {
                kind: FrameKind::Snapshot,
                compressed: true,
                payload: lz4_flex::compress_prepend_size(&state),
            }
        } else {
            Self {
                kind: FrameKind::Snapshot,
                compressed: false,
                payload: state,
            }
        }
    }

    /// Wrap an incremental update.
    pub fn update(update: Vec<u8>) -> Self {
        Self {
            kind: FrameKind::Update,
            compressed: false,
            payload: update,
        }
    }

    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| FrameError::Encode(e.to_string()))
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        let (frame, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| FrameError::Decode(e.to_string()))?;
        Ok(frame)
    }

    /// The operation bytes, decompressed if needed.
    pub fn into_payload(self) -> Result<Vec<u8>, FrameError> {
        if self.compressed {
            lz4_flex::decompress_size_prepended(&self.payload)
                .map_err(|e| FrameError::Decompress(e.to_string()))
        } else {
            Ok(self.payload)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_frame_roundtrip() {
        let frame = Frame::update(vec![1, 2, 3, 4, 5]);
        let decoded = Frame::decode(&frame.encode().unwrap()).unwrap();

        assert_eq!(decoded.kind, FrameKind::Update);
        assert!(!decoded.compressed);
        assert_eq!(decoded.into_payload().unwrap(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_small_snapshot_is_not_compressed() {
        let frame = Frame::snapshot(vec![7; 64]);
        assert!(!frame.compressed);
        assert_eq!(frame.payload.len(), 64);
    }

    #[test]
    fn test_large_snapshot_is_compressed() {
        let state = vec![42u8; 64 * 1024];
        let frame = Frame::snapshot(state.clone());
        assert!(frame.compressed);
        assert!(frame.payload.len() < state.len() / 10);

        let encoded = frame.encode().unwrap();
        let decoded = Frame::decode(&encoded).unwrap();
        assert_eq!(decoded.kind, FrameKind::Snapshot);
        assert_eq!(decoded.into_payload().unwrap(), state);
    }

    #[test]
    fn test_update_header_is_small() {
        let encoded = Frame::update(vec![0u8; 32]).encode().unwrap();
        // kind + flag + length prefix
        assert!(encoded.len() <= 32 + 4, "frame too large: {}", encoded.len());
    }

    #[test]
    fn test_decode_invalid_bytes() {
        assert!(matches!(
            Frame::decode(&[0xFF, 0xFE, 0xFD]),
            Err(FrameError::Decode(_))
        ));
        assert!(Frame::decode(&[]).is_err());
    }

    #[test]
    fn test_corrupt_compressed_payload() {
        let frame = Frame {
            kind: FrameKind::Snapshot,
            compressed: true,
            // claims 10 bytes, then a truncated literal run
            payload: vec![10, 0, 0, 0, 0xFF],
        };
        assert!(matches!(frame.into_payload(), Err(FrameError::Decompress(_))));
    }
}
