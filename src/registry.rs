use std::collections::HashMap;

use bytes::Bytes;
use rand::Rng;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::RelayError;
use crate::model::{FileBlob, FileInfo, ShareMessage};

/// Length of a room code.
pub const CODE_LEN: usize = 8;
/// Attempts at an unused code before giving up. Collisions are rare at any
/// realistic room count, so exhausting this many means the code space is
/// effectively full.
const MAX_CODE_ATTEMPTS: usize = 64;

/// A live room. Owns its file arena (descriptors plus blob bytes) and its
/// share-message log, so destroying the room drops everything in one step.
#[derive(Debug)]
pub struct Room {
    host_token: String,
    created_at: i64,
    participants: u32,
    files: Vec<FileInfo>,
    blobs: HashMap<String, FileBlob>,
    messages: Vec<ShareMessage>,
}

impl Room {
    fn new(host_token: String) -> Self {
        Self {
            host_token,
            created_at: OffsetDateTime::now_utc().unix_timestamp(),
            participants: 0,
            files: Vec::new(),
            blobs: HashMap::new(),
            messages: Vec::new(),
        }
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    pub fn participants(&self) -> u32 {
        self.participants
    }
}

/// Authoritative map of live rooms. A plain struct: callers serialize access
/// through the relay's lock.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: HashMap<String, Room>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh room, returning its code and host token.
    pub fn create_room(&mut self) -> Result<(String, String), RelayError> {
        let mut code = random_code();
        let mut attempts = 1;
        while self.rooms.contains_key(&code) {
            if attempts >= MAX_CODE_ATTEMPTS {
                return Err(RelayError::CodeSpaceExhausted);
            }
            code = random_code();
            attempts += 1;
        }
        let host_token = Uuid::new_v4().to_string();
        self.rooms.insert(code.clone(), Room::new(host_token.clone()));
        Ok((code, host_token))
    }

    pub fn exists(&self, code: &str) -> bool {
        self.rooms.contains_key(code)
    }

    pub fn get(&self, code: &str) -> Option<&Room> {
        self.rooms.get(code)
    }

    /// Pure check; unknown rooms and mismatched tokens are both `false`.
    pub fn verify_host(&self, code: &str, token: &str) -> bool {
        self.rooms.get(code).map_or(false, |r| r.host_token == token)
    }

    /// Remove a room and everything it owns. Idempotent: destroying an
    /// unknown or already-destroyed code is a no-op.
    pub fn destroy_room(&mut self, code: &str) -> bool {
        self.rooms.remove(code).is_some()
    }

    /// Increment the participant count, returning the new count.
    pub fn join(&mut self, code: &str) -> Option<u32> {
        let room = self.rooms.get_mut(code)?;
        room.participants += 1;
        Some(room.participants)
    }

    /// Decrement the participant count, returning the new count. Saturates
    /// at zero so racing disconnects cannot drive it negative.
    pub fn leave(&mut self, code: &str) -> Option<u32> {
        let room = self.rooms.get_mut(code)?;
        room.participants = room.participants.saturating_sub(1);
        Some(room.participants)
    }

    /// Store a blob and append its descriptor to the room's ordered list.
    pub fn put_file(
        &mut self,
        code: &str,
        bytes: Bytes,
        name: String,
        mimetype: String,
        limit: u64,
    ) -> Result<FileInfo, RelayError> {
        let size = bytes.len() as u64;
        if size > limit {
            return Err(RelayError::PayloadTooLarge { size, limit });
        }
        let room = self.rooms.get_mut(code).ok_or(RelayError::RoomNotFound)?;
        let id = Uuid::new_v4().to_string();
        let info = FileInfo {
            id: id.clone(),
            original_name: name.clone(),
            size,
            mimetype: mimetype.clone(),
            uploaded_at: OffsetDateTime::now_utc().unix_timestamp(),
            preview_url: format!("/api/rooms/{code}/files/{id}"),
        };
        room.blobs.insert(
            id,
            FileBlob {
                bytes,
                name,
                mimetype,
            },
        );
        room.files.push(info.clone());
        Ok(info)
    }

    /// Ordered descriptors for a room; empty for unknown codes. Existence is
    /// the caller's concern, the registry is the source of truth for it.
    pub fn list_files(&self, code: &str) -> Vec<FileInfo> {
        self.rooms.get(code).map(|r| r.files.clone()).unwrap_or_default()
    }

    /// Blob lookup. "Room gone" and "no such file" are indistinguishable.
    pub fn get_blob(&self, code: &str, file_id: &str) -> Option<FileBlob> {
        self.rooms.get(code)?.blobs.get(file_id).cloned()
    }

    /// Append a share message; `false` if the room is gone.
    pub fn push_message(&mut self, code: &str, message: ShareMessage) -> bool {
        match self.rooms.get_mut(code) {
            Some(room) => {
                room.messages.push(message);
                true
            }
            None => false,
        }
    }

    /// Join snapshot: the room's files and messages in arrival order.
    pub fn snapshot(&self, code: &str) -> Option<(Vec<FileInfo>, Vec<ShareMessage>)> {
        self.rooms
            .get(code)
            .map(|r| (r.files.clone(), r.messages.clone()))
    }
}

fn random_code() -> String {
    let mut rng = rand::thread_rng();
    (0..CODE_LEN)
        .map(|_| (rng.sample(rand::distributions::Alphanumeric) as char).to_ascii_uppercase())
        .collect()
}
