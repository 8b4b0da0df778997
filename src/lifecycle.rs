use std::collections::HashMap;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};
use uuid::Uuid;

use crate::binder::ConnectionBinder;
use crate::error::RelayError;
use crate::events::{ClientEvent, ServerEvent};
use crate::model::{FileBlob, FileInfo, ShareMessage, SharePayload};
use crate::registry::RoomRegistry;

/// Reason sent to guests when the host departs.
const HOST_LEFT_REASON: &str = "host left, room closed";

struct RelayState {
    registry: RoomRegistry,
    binder: ConnectionBinder,
    peers: HashMap<Uuid, UnboundedSender<ServerEvent>>,
}

impl RelayState {
    fn send_to(&self, conn: Uuid, event: ServerEvent) {
        if let Some(tx) = self.peers.get(&conn) {
            // Fire and forget: a receiver that went away mid-send is already
            // on its own disconnect path.
            let _ = tx.send(event);
        }
    }

    fn broadcast(&self, code: &str, event: ServerEvent) {
        let conns = self.binder.connections_in(code);
        if conns.is_empty() {
            debug!(room = %code, "dropping broadcast, no bound connections");
            return;
        }
        for conn in conns {
            self.send_to(conn, event.clone());
        }
    }
}

/// Lifecycle controller. Owns the room registry, the connection binder and
/// the per-connection event channels behind a single lock, so every
/// transition is serialized and the event order seen by any one connection
/// matches the mutation order. Sends are non-blocking; socket writes happen
/// in per-connection forwarder tasks outside the lock.
pub struct Relay {
    state: Mutex<RelayState>,
    max_upload_bytes: u64,
    host_only_uploads: bool,
}

impl Relay {
    pub fn new(max_upload_bytes: u64, host_only_uploads: bool) -> Self {
        Self {
            state: Mutex::new(RelayState {
                registry: RoomRegistry::new(),
                binder: ConnectionBinder::new(),
                peers: HashMap::new(),
            }),
            max_upload_bytes,
            host_only_uploads,
        }
    }

    /// Register a connection's outbound event channel.
    pub fn connect(&self, conn: Uuid, tx: UnboundedSender<ServerEvent>) {
        self.state.lock().peers.insert(conn, tx);
    }

    /// Dispatch one inbound client event.
    pub fn handle(&self, conn: Uuid, event: ClientEvent) {
        match event {
            ClientEvent::JoinRoom {
                room_id,
                host_token,
            } => self.join(conn, &room_id, host_token.as_deref()),
            ClientEvent::ShareMessage {
                payload,
                sender_name,
            } => self.share(conn, payload, sender_name),
        }
    }

    /// Bind a connection to a room. Unknown rooms produce an `error` event
    /// to the requester and no state change. A binding to a different room
    /// is torn down first, with leave-accounting for the old room. The
    /// participant count only moves on a genuinely new binding.
    pub fn join(&self, conn: Uuid, code: &str, host_token: Option<&str>) {
        let code = normalize(code);
        let mut st = self.state.lock();
        if !st.registry.exists(&code) {
            st.send_to(conn, ServerEvent::error(RelayError::RoomNotFound.to_string()));
            return;
        }
        let is_host = host_token.map_or(false, |t| st.registry.verify_host(&code, t));
        let bound = st.binder.bind(conn, &code, is_host);
        if let Some(prev) = bound.previous {
            if let Some(count) = st.registry.leave(&prev.code) {
                st.broadcast(&prev.code, ServerEvent::ParticipantCountUpdate { count });
            }
        }
        if !bound.rejoin {
            st.registry.join(&code);
        }
        // a duplicate join keeps the flag of the original binding
        let is_host = st.binder.get(conn).map_or(is_host, |b| b.is_host);
        let Some((files, messages)) = st.registry.snapshot(&code) else {
            return;
        };
        st.send_to(
            conn,
            ServerEvent::RoomJoined {
                room_id: code.clone(),
                files,
                messages,
                is_host,
            },
        );
        if let Some(room) = st.registry.get(&code) {
            let count = room.participants();
            st.broadcast(&code, ServerEvent::ParticipantCountUpdate { count });
        }
        info!(room = %code, %conn, host = is_host, rejoin = bound.rejoin, "connection joined room");
    }

    /// Store a file and fan the descriptor out to the whole room. Rejections
    /// are returned to the uploader only, with no broadcast.
    pub fn upload(
        &self,
        code: &str,
        bytes: Bytes,
        name: String,
        mimetype: String,
        host_token: Option<&str>,
    ) -> Result<FileInfo, RelayError> {
        let code = normalize(code);
        let mut st = self.state.lock();
        if !st.registry.exists(&code) {
            return Err(RelayError::RoomNotFound);
        }
        if self.host_only_uploads
            && !host_token.map_or(false, |t| st.registry.verify_host(&code, t))
        {
            return Err(RelayError::Unauthorized);
        }
        let info = st
            .registry
            .put_file(&code, bytes, name, mimetype, self.max_upload_bytes)?;
        info!(room = %code, file = %info.id, size = info.size, "file uploaded");
        st.broadcast(&code, ServerEvent::FileUploaded { file: info.clone() });
        Ok(info)
    }

    /// Relay a share message from a bound connection to its room.
    pub fn share(&self, conn: Uuid, payload: SharePayload, sender_name: Option<String>) {
        let mut st = self.state.lock();
        let Some(code) = st.binder.get(conn).map(|b| b.code.clone()) else {
            st.send_to(conn, ServerEvent::error("not in a room"));
            return;
        };
        let message = ShareMessage::new(payload, sender_name);
        if st.registry.push_message(&code, message.clone()) {
            st.broadcast(&code, ServerEvent::MessageShared { message });
        } else {
            debug!(room = %code, "dropping share, room already destroyed");
        }
    }

    /// Handle a connection going away. Guests decrement the count; a host
    /// departure destroys the room, notifying the remaining guests before
    /// their bindings and channels are severed.
    pub fn disconnect(&self, conn: Uuid) {
        let mut st = self.state.lock();
        st.peers.remove(&conn);
        let Some(binding) = st.binder.unbind(conn) else {
            return;
        };
        if binding.is_host {
            let guests = st.binder.connections_in(&binding.code);
            for guest in &guests {
                st.send_to(
                    *guest,
                    ServerEvent::RoomClosed {
                        reason: HOST_LEFT_REASON.into(),
                    },
                );
            }
            for guest in guests {
                st.binder.unbind(guest);
                st.peers.remove(&guest);
            }
            st.registry.destroy_room(&binding.code);
            info!(room = %binding.code, "host left, room destroyed");
        } else if let Some(count) = st.registry.leave(&binding.code) {
            st.broadcast(&binding.code, ServerEvent::ParticipantCountUpdate { count });
        }
    }

    /// Allocate a room, returning its code and host token.
    pub fn create_room(&self) -> Result<(String, String), RelayError> {
        let mut st = self.state.lock();
        let (code, token) = st.registry.create_room()?;
        info!(room = %code, "room created");
        Ok((code, token))
    }

    /// Snapshot for the HTTP join path.
    pub fn join_snapshot(&self, code: &str) -> Result<Vec<FileInfo>, RelayError> {
        let code = normalize(code);
        let st = self.state.lock();
        if !st.registry.exists(&code) {
            return Err(RelayError::RoomNotFound);
        }
        Ok(st.registry.list_files(&code))
    }

    pub fn verify_host(&self, code: &str, token: &str) -> Result<bool, RelayError> {
        let code = normalize(code);
        let st = self.state.lock();
        if !st.registry.exists(&code) {
            return Err(RelayError::RoomNotFound);
        }
        Ok(st.registry.verify_host(&code, token))
    }

    pub fn list_files(&self, code: &str) -> Result<Vec<FileInfo>, RelayError> {
        let code = normalize(code);
        let st = self.state.lock();
        if !st.registry.exists(&code) {
            return Err(RelayError::RoomNotFound);
        }
        Ok(st.registry.list_files(&code))
    }

    pub fn get_blob(&self, code: &str, file_id: &str) -> Result<FileBlob, RelayError> {
        let code = normalize(code);
        let st = self.state.lock();
        st.registry
            .get_blob(&code, file_id)
            .ok_or(RelayError::FileNotFound)
    }

    /// Current participant count, `None` once the room is gone.
    pub fn participant_count(&self, code: &str) -> Option<u32> {
        let st = self.state.lock();
        st.registry.get(&normalize(code)).map(|r| r.participants())
    }

    pub fn room_exists(&self, code: &str) -> bool {
        self.state.lock().registry.exists(&normalize(code))
    }
}

fn normalize(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}
