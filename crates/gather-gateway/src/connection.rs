use std::collections::VecDeque;

use tokio::time::Instant;

use gather_core::presence::ConnectionId;
use gather_models::{Identity, RoomKey};

/// Room ops a client sent before its handshake finished. Replayed in call
/// order the moment the connection enters `Authenticated`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingRoomOp {
    Join(RoomKey),
    Leave(RoomKey),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Connecting,
    Authenticating,
    Authenticated,
    /// Terminal for this Connection instance; reconnecting mints a fresh
    /// one with a new id.
    Disconnected,
}

const MAX_PENDING_ROOM_OPS: usize = 64;

/// One live duplex transport and everything scoped to it.
pub struct Connection {
    pub id: ConnectionId,
    pub session_id: String,
    pub identity: Option<Identity>,
    pub state: ConnState,
    pending_rooms: VecDeque<PendingRoomOp>,
    pub last_activity: Instant,
}

impl Connection {
    pub fn new() -> Self {
        Self {
            id: ConnectionId::new_v4(),
            session_id: uuid::Uuid::new_v4().to_string(),
            identity: None,
            state: ConnState::Connecting,
            pending_rooms: VecDeque::new(),
            last_activity: Instant::now(),
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == ConnState::Authenticated
    }

    /// Bind the verified identity. Re-authentication replaces the identity
    /// rather than appending a second one.
    pub fn authenticate(&mut self, identity: Identity) {
        self.identity = Some(identity);
        self.state = ConnState::Authenticated;
        self.touch();
    }

    /// Queue a pre-auth room op. Returns `false` when the queue is full
    /// and the op was dropped.
    pub fn queue_room_op(&mut self, op: PendingRoomOp) -> bool {
        if self.pending_rooms.len() >= MAX_PENDING_ROOM_OPS {
            return false;
        }
        self.pending_rooms.push_back(op);
        true
    }

    pub fn drain_pending_room_ops(&mut self) -> VecDeque<PendingRoomOp> {
        std::mem::take(&mut self.pending_rooms)
    }
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}
