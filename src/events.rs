use serde::{Deserialize, Serialize};

use crate::model::{FileInfo, ShareMessage, SharePayload};

/// Messages a client may send over the event channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "camelCase")]
pub enum ClientEvent {
    #[serde(rename_all = "camelCase")]
    JoinRoom {
        room_id: String,
        #[serde(default)]
        host_token: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    ShareMessage {
        payload: SharePayload,
        #[serde(default)]
        sender_name: Option<String>,
    },
}

/// Messages the relay pushes to bound connections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "camelCase")]
pub enum ServerEvent {
    #[serde(rename_all = "camelCase")]
    RoomJoined {
        room_id: String,
        files: Vec<FileInfo>,
        messages: Vec<ShareMessage>,
        is_host: bool,
    },
    FileUploaded {
        file: FileInfo,
    },
    MessageShared {
        message: ShareMessage,
    },
    ParticipantCountUpdate {
        count: u32,
    },
    RoomClosed {
        reason: String,
    },
    Error {
        message: String,
    },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}
