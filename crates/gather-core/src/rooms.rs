use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashSet;

use gather_models::RoomKey;

use crate::presence::ConnectionId;

/// Room key -> member connections, with the reverse index kept in
/// lockstep: a connection is a member of a room iff the room lists it.
/// All mutation funnels through `join`/`leave`/`remove_connection` so the
/// two maps never drift. Empty rooms are pruned on leave; absence of
/// members is absence of the room.
#[derive(Default)]
pub struct RoomDirectory {
    rooms: DashMap<RoomKey, HashSet<ConnectionId>>,
    memberships: DashMap<ConnectionId, HashSet<RoomKey>>,
}

impl RoomDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent: joining a room twice is a no-op.
    pub fn join(&self, connection_id: ConnectionId, room: &RoomKey) {
        self.rooms
            .entry(room.clone())
            .or_default()
            .insert(connection_id);
        self.memberships
            .entry(connection_id)
            .or_default()
            .insert(room.clone());
    }

    /// Idempotent: leaving a room the connection is not in is a silent
    /// no-op, not an error.
    pub fn leave(&self, connection_id: ConnectionId, room: &RoomKey) {
        if let Entry::Occupied(mut entry) = self.rooms.entry(room.clone()) {
            entry.get_mut().remove(&connection_id);
            if entry.get().is_empty() {
                entry.remove();
            }
        }
        if let Entry::Occupied(mut entry) = self.memberships.entry(connection_id) {
            entry.get_mut().remove(room);
            if entry.get().is_empty() {
                entry.remove();
            }
        }
    }

    /// Tear down every membership of a dying connection.
    pub fn remove_connection(&self, connection_id: ConnectionId) {
        let Some((_, rooms)) = self.memberships.remove(&connection_id) else {
            return;
        };
        for room in rooms {
            if let Entry::Occupied(mut entry) = self.rooms.entry(room) {
                entry.get_mut().remove(&connection_id);
                if entry.get().is_empty() {
                    entry.remove();
                }
            }
        }
    }

    pub fn members(&self, room: &RoomKey) -> Vec<ConnectionId> {
        self.rooms
            .get(room)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_member(&self, connection_id: ConnectionId, room: &RoomKey) -> bool {
        self.rooms
            .get(room)
            .map(|members| members.contains(&connection_id))
            .unwrap_or(false)
    }

    pub fn rooms_of(&self, connection_id: ConnectionId) -> Vec<RoomKey> {
        self.memberships
            .get(&connection_id)
            .map(|rooms| rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
