use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashSet;
use tokio::sync::mpsc;

use gather_models::gateway::ServerFrame;

pub type ConnectionId = uuid::Uuid;

/// Outbound half of a live connection. Frames pushed here are written to
/// the socket by that connection's writer task.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub user_id: String,
    pub sender: mpsc::UnboundedSender<ServerFrame>,
}

#[derive(Debug, thiserror::Error)]
#[error("too many concurrent connections for this user")]
pub struct UserCapacityExceeded;

/// Source of truth for "is this user online": identity -> live connection
/// set, plus the per-connection outbound senders used for fan-out.
#[derive(Default)]
pub struct PresenceRegistry {
    users: DashMap<String, HashSet<ConnectionId>>,
    connections: DashMap<ConnectionId, ConnectionHandle>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind an authenticated connection to its user. Returns `true` when
    /// this was the user's first live connection (they just came online).
    /// Enforces the per-user connection cap under the same entry lock so a
    /// burst of handshakes cannot overshoot it.
    pub fn register(
        &self,
        connection_id: ConnectionId,
        user_id: &str,
        sender: mpsc::UnboundedSender<ServerFrame>,
        max_per_user: usize,
    ) -> Result<bool, UserCapacityExceeded> {
        let mut entry = self.users.entry(user_id.to_string()).or_default();
        if entry.len() >= max_per_user {
            drop(entry);
            // Leave no empty set behind if the cap was zero.
            self.users.remove_if(user_id, |_, conns| conns.is_empty());
            return Err(UserCapacityExceeded);
        }
        let came_online = entry.is_empty();
        entry.insert(connection_id);
        drop(entry);
        self.connections.insert(
            connection_id,
            ConnectionHandle {
                user_id: user_id.to_string(),
                sender,
            },
        );
        Ok(came_online)
    }

    /// Drop a connection. Returns the owning user id and whether this was
    /// their last connection; the set removal and the offline flip happen
    /// under one entry lock, so no one can observe "empty but online".
    pub fn unregister(&self, connection_id: ConnectionId) -> Option<(String, bool)> {
        let handle = self.connections.remove(&connection_id)?.1;
        let mut went_offline = false;
        if let Entry::Occupied(mut entry) = self.users.entry(handle.user_id.clone()) {
            entry.get_mut().remove(&connection_id);
            if entry.get().is_empty() {
                entry.remove();
                went_offline = true;
            }
        }
        Some((handle.user_id, went_offline))
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.users
            .get(user_id)
            .map(|conns| !conns.is_empty())
            .unwrap_or(false)
    }

    pub fn connections_for(&self, user_id: &str) -> Vec<ConnectionId> {
        self.users
            .get(user_id)
            .map(|conns| conns.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Push a frame to one connection. `false` means the connection's
    /// writer is gone (it is being torn down).
    pub fn send_to_connection(&self, connection_id: ConnectionId, frame: ServerFrame) -> bool {
        match self.connections.get(&connection_id) {
            Some(handle) => handle.sender.send(frame).is_ok(),
            None => false,
        }
    }

    /// Push a frame to every live connection of a user; returns how many
    /// accepted it.
    pub fn send_to_user(&self, user_id: &str, frame: &ServerFrame) -> usize {
        let mut delivered = 0;
        for connection_id in self.connections_for(user_id) {
            if self.send_to_connection(connection_id, frame.clone()) {
                delivered += 1;
            }
        }
        delivered
    }

    /// Push a frame to every authenticated connection (presence
    /// transitions; the population is bounded by design).
    pub fn broadcast(&self, frame: &ServerFrame) {
        for entry in self.connections.iter() {
            let _ = entry.value().sender.send(frame.clone());
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}
