//! JSON wire protocol for room synchronization.
//!
//! One JSON object per WebSocket frame, tagged by `type`:
//! ```text
//! { "type": "code",   "fileId": 1, "data": "x=2" }
//! { "type": "cursor", "fileId": 1, "position": { "line": 3, "column": 5 }, "senderId": "…" }
//! ```
//!
//! A `code` message always carries the complete content of the file. There
//! is no diff or patch form, so applying the same message twice is harmless
//! and the newest message wins.

use codecollab_core::{FileId, Position};
use serde::{Deserialize, Serialize};

/// Top-level protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SyncMessage {
    /// Full-content replacement for one file.
    #[serde(rename_all = "camelCase")]
    Code { file_id: FileId, data: String },

    /// Ephemeral caret presence of one participant.
    #[serde(rename_all = "camelCase")]
    Cursor {
        file_id: FileId,
        position: Position,
        sender_id: String,
    },
}

impl SyncMessage {
    pub fn code(file_id: FileId, data: impl Into<String>) -> Self {
        Self::Code {
            file_id,
            data: data.into(),
        }
    }

    pub fn cursor(file_id: FileId, position: Position, sender_id: impl Into<String>) -> Self {
        Self::Cursor {
            file_id,
            position,
            sender_id: sender_id.into(),
        }
    }

    /// The file this message targets.
    pub fn file_id(&self) -> FileId {
        match self {
            Self::Code { file_id, .. } | Self::Cursor { file_id, .. } => *file_id,
        }
    }

    /// Wire kind, as found in the `type` field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Code { .. } => "code",
            Self::Cursor { .. } => "cursor",
        }
    }

    /// Serialize to a JSON text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    /// Deserialize from a JSON text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Decode)
    }

    /// Deserialize from a binary frame holding UTF-8 JSON.
    pub fn decode_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let text = std::str::from_utf8(bytes).map_err(|_| ProtocolError::NotUtf8)?;
        Self::decode(text)
    }
}

/// Protocol errors.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to decode message: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("binary frame is not valid UTF-8")]
    NotUtf8,
}
