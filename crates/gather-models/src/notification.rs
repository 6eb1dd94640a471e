use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// New chat message while the target is away from the conversation.
    Message,
    /// A help/skill request was accepted or rejected.
    RequestUpdate,
    Generic,
}

/// Typed, user-targeted event pushed to every live connection of the
/// target. Read state is flipped by the REST layer, never by the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub kind: NotificationKind,
    pub target_user_id: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_read: bool,
}

impl Notification {
    pub fn new(
        kind: NotificationKind,
        target_user_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            target_user_id: target_user_id.into(),
            payload,
            created_at: Utc::now(),
            is_read: false,
        }
    }
}
