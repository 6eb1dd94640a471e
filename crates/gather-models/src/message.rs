use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::room::RoomKey;

/// A chat message in flight through the gateway. Durable ownership belongs
/// to the message store; the gateway only carries it between connections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub room: RoomKey,
    pub sender_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
}

/// Client-side lifecycle of a sent message. An entry starts `Optimistic`
/// the moment the UI shows it, and is reconciled by the matching receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Optimistic,
    Confirmed,
    Failed,
}

/// Correlates a client-generated optimistic id with the outcome of a send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeliveryReceipt {
    Confirmed {
        client_id: String,
        id: String,
        created_at: DateTime<Utc>,
    },
    Failed {
        client_id: String,
        reason: String,
    },
}

impl DeliveryReceipt {
    pub fn client_id(&self) -> &str {
        match self {
            DeliveryReceipt::Confirmed { client_id, .. } => client_id,
            DeliveryReceipt::Failed { client_id, .. } => client_id,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, DeliveryReceipt::Confirmed { .. })
    }
}
