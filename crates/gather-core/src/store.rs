use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::Mutex;

use gather_models::{ChatMessage, Notification, RoomKey};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("internal store error: {0}")]
    Internal(String),
}

/// Durable id and timestamp assigned by the store on persist.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub room: RoomKey,
    pub sender_id: String,
    pub content: String,
}

#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    /// Only return messages created strictly before this instant.
    pub before: Option<DateTime<Utc>>,
    pub limit: usize,
}

impl Pagination {
    pub const DEFAULT_LIMIT: usize = 50;
    pub const MAX_LIMIT: usize = 100;

    pub fn clamped(before: Option<DateTime<Utc>>, limit: Option<usize>) -> Self {
        Self {
            before,
            limit: limit.unwrap_or(Self::DEFAULT_LIMIT).clamp(1, Self::MAX_LIMIT),
        }
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            before: None,
            limit: Self::DEFAULT_LIMIT,
        }
    }
}

/// Seam to the document store that owns messages. Persistence success is
/// the gate for real-time delivery, so `persist` is awaited before any
/// broadcast happens.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn persist(&self, message: &NewMessage) -> Result<StoredMessage, StoreError>;
    async fn history(&self, room: &RoomKey, page: Pagination)
        -> Result<Vec<ChatMessage>, StoreError>;
}

/// Seam for the durable copy of a notification. Fire-and-forget: the
/// real-time fan-out never depends on this succeeding.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn record_if_requested(&self, notification: &Notification);
}

/// In-memory message store backing the dev server and the test suites.
/// Real deployments plug the document store in through `MessageStore`.
#[derive(Default)]
pub struct MemoryMessageStore {
    rooms: DashMap<RoomKey, Vec<ChatMessage>>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn persist(&self, message: &NewMessage) -> Result<StoredMessage, StoreError> {
        let stored = StoredMessage {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: Utc::now(),
        };
        self.rooms
            .entry(message.room.clone())
            .or_default()
            .push(ChatMessage {
                id: stored.id.clone(),
                room: message.room.clone(),
                sender_id: message.sender_id.clone(),
                content: message.content.clone(),
                created_at: stored.created_at,
                read: false,
            });
        Ok(stored)
    }

    async fn history(
        &self,
        room: &RoomKey,
        page: Pagination,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        let Some(messages) = self.rooms.get(room) else {
            return Ok(Vec::new());
        };
        // Newest first, bounded by the page limit.
        let mut out: Vec<ChatMessage> = messages
            .iter()
            .filter(|m| page.before.is_none_or(|b| m.created_at < b))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out.truncate(page.limit);
        Ok(out)
    }
}

#[derive(Default)]
pub struct MemoryNotificationStore {
    records: Mutex<Vec<Notification>>,
}

impl MemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn recorded(&self) -> Vec<Notification> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl NotificationStore for MemoryNotificationStore {
    async fn record_if_requested(&self, notification: &Notification) {
        self.records.lock().await.push(notification.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn history_is_newest_first_and_respects_before() {
        let store = MemoryMessageStore::new();
        let room = RoomKey::topic("t1");
        for i in 0..3 {
            store
                .persist(&NewMessage {
                    room: room.clone(),
                    sender_id: "u1".into(),
                    content: format!("m{i}"),
                })
                .await
                .unwrap();
        }
        let all = store.history(&room, Pagination::default()).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].content, "m2");

        let older = store
            .history(&room, Pagination::clamped(Some(all[0].created_at), Some(10)))
            .await
            .unwrap();
        assert!(older.iter().all(|m| m.created_at < all[0].created_at));
    }

    #[tokio::test]
    async fn unknown_room_history_is_empty() {
        let store = MemoryMessageStore::new();
        let page = store
            .history(&RoomKey::topic("nope"), Pagination::default())
            .await
            .unwrap();
        assert!(page.is_empty());
    }
}
