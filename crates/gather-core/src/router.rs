use std::sync::Arc;

use gather_models::gateway::{SendTarget, ServerFrame};
use gather_models::{ChatMessage, DeliveryReceipt, Identity, Notification, NotificationKind, RoomKey};

use crate::error::GatewayError;
use crate::presence::{ConnectionId, PresenceRegistry};
use crate::rooms::RoomDirectory;
use crate::store::{MessageStore, NewMessage, NotificationStore};

/// Validates and persists an outgoing message, then delivers it to every
/// live connection in the target room. Decoupled from storage through the
/// `MessageStore` seam; persistence success gates delivery so a message
/// that would not survive a crash is never broadcast.
#[derive(Clone)]
pub struct MessageRouter {
    presence: Arc<PresenceRegistry>,
    rooms: Arc<RoomDirectory>,
    messages: Arc<dyn MessageStore>,
    notifications: Arc<dyn NotificationStore>,
    max_content_len: usize,
}

impl MessageRouter {
    pub fn new(
        presence: Arc<PresenceRegistry>,
        rooms: Arc<RoomDirectory>,
        messages: Arc<dyn MessageStore>,
        notifications: Arc<dyn NotificationStore>,
        max_content_len: usize,
    ) -> Self {
        Self {
            presence,
            rooms,
            messages,
            notifications,
            max_content_len,
        }
    }

    /// Direct-message recipients map to the deterministic pair key;
    /// explicit room ids pass through after validation. A sender may only
    /// address direct rooms it participates in.
    fn resolve_target(&self, sender_id: &str, to: &SendTarget) -> Result<RoomKey, GatewayError> {
        match to {
            SendTarget::User { user_id } => {
                if user_id.trim().is_empty() {
                    return Err(GatewayError::Validation("empty recipient id".into()));
                }
                Ok(RoomKey::direct(sender_id, user_id))
            }
            SendTarget::Room(key) => {
                let key = RoomKey::parse(key.as_str())
                    .ok_or_else(|| GatewayError::Validation("malformed room key".into()))?;
                if key.is_direct() && key.direct_counterpart(sender_id).is_none() {
                    return Err(GatewayError::Validation(
                        "sender is not a participant of this room".into(),
                    ));
                }
                Ok(key)
            }
        }
    }

    /// The send pipeline: validate, persist, broadcast, receipt. The
    /// origin connection is excluded from the broadcast; it reconciles its
    /// optimistic entry through the returned receipt instead. A store
    /// failure yields a `Failed` receipt and no broadcast; retrying is the
    /// client's decision.
    pub async fn send(
        &self,
        origin: ConnectionId,
        sender: &Identity,
        client_id: &str,
        to: &SendTarget,
        content: &str,
    ) -> Result<DeliveryReceipt, GatewayError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(GatewayError::Validation("empty message content".into()));
        }
        if content.len() > self.max_content_len {
            return Err(GatewayError::Validation(format!(
                "content must be {} bytes or fewer",
                self.max_content_len
            )));
        }
        let room = self.resolve_target(&sender.user_id, to)?;

        let stored = match self
            .messages
            .persist(&NewMessage {
                room: room.clone(),
                sender_id: sender.user_id.clone(),
                content: content.to_string(),
            })
            .await
        {
            Ok(stored) => stored,
            Err(err) => {
                tracing::warn!(room = %room, error = %err, "message persist failed, send dropped");
                return Ok(DeliveryReceipt::Failed {
                    client_id: client_id.to_string(),
                    reason: err.to_string(),
                });
            }
        };

        let message = ChatMessage {
            id: stored.id.clone(),
            room: room.clone(),
            sender_id: sender.user_id.clone(),
            content: content.to_string(),
            created_at: stored.created_at,
            read: false,
        };

        let mut delivered = 0;
        for member in self.rooms.members(&room) {
            if member == origin {
                continue;
            }
            if self.presence.send_to_connection(
                member,
                ServerFrame::MessageDelivered {
                    message: message.clone(),
                },
            ) {
                delivered += 1;
            }
        }
        tracing::debug!(room = %room, message_id = %stored.id, delivered, "message routed");

        if let Some(peer) = room.direct_counterpart(&sender.user_id) {
            if peer != sender.user_id {
                let notification = Notification::new(
                    NotificationKind::Message,
                    peer,
                    serde_json::json!({
                        "room": room,
                        "message_id": stored.id,
                        "sender_id": sender.user_id,
                        "sender_name": sender.display_name,
                    }),
                );
                self.notifications.record_if_requested(&notification).await;
                self.notify(&notification);
            }
        }

        Ok(DeliveryReceipt::Confirmed {
            client_id: client_id.to_string(),
            id: stored.id,
            created_at: stored.created_at,
        })
    }

    /// Best-effort push to every live connection of the target user.
    /// Zero live connections is an expected miss, not an error: the
    /// durable copy (if the requester wanted one) is fetched over REST on
    /// next login.
    pub fn notify(&self, notification: &Notification) -> usize {
        let delivered = self.presence.send_to_user(
            &notification.target_user_id,
            &ServerFrame::Notification {
                notification: notification.clone(),
            },
        );
        if delivered == 0 {
            tracing::debug!(
                target_user_id = %notification.target_user_id,
                kind = ?notification.kind,
                "notification target offline, dropped from real-time path"
            );
        }
        delivered
    }

    pub async fn record_and_notify(&self, notification: &Notification) -> usize {
        self.notifications.record_if_requested(notification).await;
        self.notify(notification)
    }
}
