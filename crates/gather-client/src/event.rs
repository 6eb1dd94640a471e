use gather_models::gateway::{
    EVENT_CONNECTION, EVENT_MESSAGE, EVENT_NOTIFICATION, EVENT_PRESENCE, EVENT_RECEIPT,
};
use gather_models::{ChatMessage, DeliveryReceipt, Notification};

/// Connection health as the UI sees it.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionStatus {
    Connecting,
    Online,
    /// Transport dropped; the bounded reconnect schedule is running.
    Degraded { attempt: usize },
    /// No connection and no automatic retry pending. `ensure_connected`
    /// starts over.
    Offline { reason: String },
}

/// Everything the controller surfaces to subscribed views.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Message(ChatMessage),
    Receipt(DeliveryReceipt),
    /// An optimistic entry was reverted; the content goes back to the
    /// compose field.
    SendFailed { client_id: String, content: String },
    Notification(Notification),
    Presence { user_id: String, online: bool },
    Status(SessionStatus),
}

impl SessionEvent {
    /// The subscription kind this event is delivered under.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionEvent::Message(_) => EVENT_MESSAGE,
            SessionEvent::Receipt(_) | SessionEvent::SendFailed { .. } => EVENT_RECEIPT,
            SessionEvent::Notification(_) => EVENT_NOTIFICATION,
            SessionEvent::Presence { .. } => EVENT_PRESENCE,
            SessionEvent::Status(_) => EVENT_CONNECTION,
        }
    }
}
