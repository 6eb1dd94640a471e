use serde::{Deserialize, Serialize};

use crate::identity::Identity;
use crate::message::{ChatMessage, DeliveryReceipt};
use crate::notification::Notification;
use crate::room::RoomKey;

// Event kinds exposed on the client subscription surface.
pub const EVENT_MESSAGE: &str = "message";
pub const EVENT_RECEIPT: &str = "receipt";
pub const EVENT_NOTIFICATION: &str = "notification";
pub const EVENT_PRESENCE: &str = "presence";
pub const EVENT_CONNECTION: &str = "connection";

/// Where a send is aimed: an explicit room, or a direct-message recipient
/// (resolved to the deterministic pair key server-side).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SendTarget {
    Room(RoomKey),
    User { user_id: String },
}

/// Frames the client writes to the socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum ClientFrame {
    Authenticate {
        credential: String,
    },
    Join {
        room: RoomKey,
    },
    Leave {
        room: RoomKey,
    },
    #[serde(rename = "message:send")]
    MessageSend {
        client_id: String,
        to: SendTarget,
        content: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    AuthFailed,
    NotAuthenticated,
    InvalidPayload,
    RateLimited,
    Capacity,
    Internal,
}

/// Frames the server writes to the socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Handshake accepted; the connection is now Authenticated.
    Ready {
        user: Identity,
        session_id: String,
    },
    Receipt(DeliveryReceipt),
    #[serde(rename = "message:delivered")]
    MessageDelivered {
        message: ChatMessage,
    },
    Notification {
        notification: Notification,
    },
    Presence {
        user_id: String,
        online: bool,
    },
    Error {
        code: ErrorCode,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        retry_after_ms: Option<u64>,
    },
}

impl ServerFrame {
    /// The subscription event kind this frame is delivered under.
    pub fn event_kind(&self) -> &'static str {
        match self {
            ServerFrame::Ready { .. } | ServerFrame::Error { .. } => EVENT_CONNECTION,
            ServerFrame::Receipt(_) => EVENT_RECEIPT,
            ServerFrame::MessageDelivered { .. } => EVENT_MESSAGE,
            ServerFrame::Notification { .. } => EVENT_NOTIFICATION,
            ServerFrame::Presence { .. } => EVENT_PRESENCE,
        }
    }
}
