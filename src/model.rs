use bytes::Bytes;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Metadata for a file held by a room, mirrored to every participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub id: String,
    pub original_name: String,
    pub size: u64,
    pub mimetype: String,
    pub uploaded_at: i64,
    /// Retrieval path usable by any participant of the room.
    pub preview_url: String,
}

/// Raw payload of an uploaded file. One-to-one with its [`FileInfo`] and
/// destroyed together with the owning room.
#[derive(Debug, Clone)]
pub struct FileBlob {
    pub bytes: Bytes,
    pub name: String,
    pub mimetype: String,
}

/// A non-file share relayed to everyone in the room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareMessage {
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    pub timestamp: i64,
    pub payload: SharePayload,
}

impl ShareMessage {
    pub fn new(payload: SharePayload, sender_name: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender_name,
            timestamp: OffsetDateTime::now_utc().unix_timestamp(),
            payload,
        }
    }
}

/// Kind-specific content of a share. Each variant carries only the fields
/// that make sense for its kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SharePayload {
    Text { content: String },
    Url { content: String },
    Clipboard { content: String },
    #[serde(rename_all = "camelCase")]
    Voice { file_id: String, duration_secs: f32 },
    #[serde(rename_all = "camelCase")]
    Image { file_id: String, file_name: String },
    #[serde(rename_all = "camelCase")]
    File {
        file_id: String,
        file_name: String,
        size: u64,
    },
}
