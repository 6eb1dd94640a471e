pub mod gateway;
pub mod identity;
pub mod message;
pub mod notification;
pub mod room;

pub use identity::Identity;
pub use message::{ChatMessage, DeliveryReceipt, DeliveryState};
pub use notification::{Notification, NotificationKind};
pub use room::RoomKey;
