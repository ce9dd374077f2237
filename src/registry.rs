use std::time::{Duration, Instant};

use dashmap::DashMap;
use thiserror::Error;

use crate::protocol::{ConnId, UserId};

/// Binding of a live transport connection to a lobby identity.
#[derive(Debug, Clone)]
pub struct ConnBinding {
    pub user_id: UserId,
    pub room_code: String,
    pub last_seen: Instant,
    /// When the last persisted ping write happened for this connection.
    /// Drives the heartbeat debounce; `None` means no write yet.
    last_db_ping: Option<Instant>,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("connection {conn_id} is already attached")]
pub struct AlreadyAttached {
    pub conn_id: ConnId,
}

/// Process-local registry of live inbound connections.
///
/// Source of truth for "is this connection currently attached". Not
/// persistent: after a restart it is empty and the heartbeat reconciler
/// re-seeds Member rows to disconnected within one sweep cycle.
///
/// A user may hold more than one connection per room; the registry
/// tolerates it and the lobby manager coalesces where needed.
#[derive(Default)]
pub struct ConnectionRegistry {
    bindings: DashMap<ConnId, ConnBinding>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            bindings: DashMap::new(),
        }
    }

    /// Record a binding. Fails if the connection id is already bound.
    pub fn attach(
        &self,
        conn_id: ConnId,
        user_id: UserId,
        room_code: &str,
    ) -> Result<(), AlreadyAttached> {
        match self.bindings.entry(conn_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(AlreadyAttached { conn_id }),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(ConnBinding {
                    user_id,
                    room_code: room_code.to_string(),
                    last_seen: Instant::now(),
                    last_db_ping: None,
                });
                Ok(())
            }
        }
    }

    /// Remove and return the prior binding, if any.
    pub fn detach(&self, conn_id: &ConnId) -> Option<(UserId, String)> {
        self.bindings
            .remove(conn_id)
            .map(|(_, binding)| (binding.user_id, binding.room_code))
    }

    /// Refresh the liveness timestamp for a connection.
    pub fn touch(&self, conn_id: &ConnId) {
        if let Some(mut binding) = self.bindings.get_mut(conn_id) {
            binding.last_seen = Instant::now();
        }
    }

    /// All connection ids a user currently holds in a room.
    pub fn lookup(&self, user_id: &UserId, room_code: &str) -> Vec<ConnId> {
        self.bindings
            .iter()
            .filter(|entry| {
                entry.value().user_id == *user_id && entry.value().room_code == room_code
            })
            .map(|entry| *entry.key())
            .collect()
    }

    /// Whether the user holds at least one live connection in the room.
    pub fn is_user_attached(&self, user_id: &UserId, room_code: &str) -> bool {
        self.bindings
            .iter()
            .any(|entry| entry.value().user_id == *user_id && entry.value().room_code == room_code)
    }

    pub fn get(&self, conn_id: &ConnId) -> Option<(UserId, String)> {
        self.bindings
            .get(conn_id)
            .map(|binding| (binding.user_id, binding.room_code.clone()))
    }

    /// All connections currently attached to a room, with their users.
    pub fn conns_in_room(&self, room_code: &str) -> Vec<(ConnId, UserId)> {
        self.bindings
            .iter()
            .filter(|entry| entry.value().room_code == room_code)
            .map(|entry| (*entry.key(), entry.value().user_id))
            .collect()
    }

    /// Bindings that have not been touched within `older_than`.
    pub fn sweep(&self, older_than: Duration) -> Vec<(ConnId, UserId, String)> {
        let now = Instant::now();
        self.bindings
            .iter()
            .filter(|entry| now.duration_since(entry.value().last_seen) > older_than)
            .map(|entry| {
                (
                    *entry.key(),
                    entry.value().user_id,
                    entry.value().room_code.clone(),
                )
            })
            .collect()
    }

    /// Heartbeat debounce check: returns true (and records the write) when
    /// at least `debounce` has passed since the last persisted ping for this
    /// connection. The first heartbeat on a connection always persists.
    pub fn should_persist_ping(&self, conn_id: &ConnId, debounce: Duration) -> bool {
        if let Some(mut binding) = self.bindings.get_mut(conn_id) {
            let now = Instant::now();
            let due = match binding.last_db_ping {
                None => true,
                Some(last) => now.duration_since(last) >= debounce,
            };
            if due {
                binding.last_db_ping = Some(now);
            }
            due
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}
