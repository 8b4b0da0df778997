use std::collections::HashMap;

use uuid::Uuid;

/// Live association between one connection and one room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub code: String,
    pub is_host: bool,
}

/// Result of a bind call. `rejoin` flags a duplicate join of the room the
/// connection is already in; `previous` carries a replaced binding to a
/// different room so the caller can settle its leave-accounting.
#[derive(Debug, Default)]
pub struct BindResult {
    pub rejoin: bool,
    pub previous: Option<Binding>,
}

/// Maps each live connection to at most one room.
#[derive(Debug, Default)]
pub struct ConnectionBinder {
    bindings: HashMap<Uuid, Binding>,
}

impl ConnectionBinder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a connection to a room. Binding to the room it is already in is
    /// an idempotent no-op; a binding to a different room is replaced and
    /// reported back.
    pub fn bind(&mut self, conn: Uuid, code: &str, is_host: bool) -> BindResult {
        match self.bindings.get(&conn) {
            Some(existing) if existing.code == code => BindResult {
                rejoin: true,
                previous: None,
            },
            _ => {
                let previous = self.bindings.insert(
                    conn,
                    Binding {
                        code: code.to_owned(),
                        is_host,
                    },
                );
                BindResult {
                    rejoin: false,
                    previous,
                }
            }
        }
    }

    /// Remove a connection's binding. Safe on unbound connections: connect
    /// and disconnect signals may arrive out of order.
    pub fn unbind(&mut self, conn: Uuid) -> Option<Binding> {
        self.bindings.remove(&conn)
    }

    pub fn get(&self, conn: Uuid) -> Option<&Binding> {
        self.bindings.get(&conn)
    }

    /// Every connection currently bound to a room code.
    pub fn connections_in(&self, code: &str) -> Vec<Uuid> {
        self.bindings
            .iter()
            .filter(|(_, b)| b.code == code)
            .map(|(id, _)| *id)
            .collect()
    }
}
