pub mod auth;
pub mod error;
pub mod presence;
pub mod rooms;
pub mod router;
pub mod store;

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use tokio::sync::Notify;

use crate::auth::AuthVerifier;
use crate::presence::PresenceRegistry;
use crate::rooms::RoomDirectory;
use crate::router::MessageRouter;
use crate::store::{MessageStore, NotificationStore};

/// Per-user rate limiter shared across all of a user's connections, so
/// opening extra tabs does not multiply the budget.
pub type SendLimiter = DefaultKeyedRateLimiter<String>;

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    /// A connection that has not completed the handshake within this
    /// interval is forcibly disconnected (half-open transport leak guard).
    pub handshake_timeout: Duration,
    pub ping_interval: Duration,
    pub max_global_connections: usize,
    pub max_connections_per_user: usize,
    pub max_messages_per_minute: u32,
    pub max_content_len: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(30),
            ping_interval: Duration::from_secs(20),
            max_global_connections: 2_000,
            max_connections_per_user: 5,
            max_messages_per_minute: 240,
            max_content_len: 4_000,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: GatewayConfig,
    pub auth: Arc<dyn AuthVerifier>,
    pub presence: Arc<PresenceRegistry>,
    pub rooms: Arc<RoomDirectory>,
    pub router: MessageRouter,
    pub messages: Arc<dyn MessageStore>,
    pub send_limiter: Arc<SendLimiter>,
    pub shutdown: Arc<Notify>,
}

impl AppState {
    pub fn new(
        config: GatewayConfig,
        auth: Arc<dyn AuthVerifier>,
        messages: Arc<dyn MessageStore>,
        notifications: Arc<dyn NotificationStore>,
    ) -> Self {
        let presence = Arc::new(PresenceRegistry::new());
        let rooms = Arc::new(RoomDirectory::new());
        let router = MessageRouter::new(
            presence.clone(),
            rooms.clone(),
            messages.clone(),
            notifications,
            config.max_content_len,
        );
        let per_minute = NonZeroU32::new(config.max_messages_per_minute.max(1))
            .unwrap_or(NonZeroU32::MIN);
        let send_limiter = Arc::new(RateLimiter::keyed(Quota::per_minute(per_minute)));
        Self {
            config,
            auth,
            presence,
            rooms,
            router,
            messages,
            send_limiter,
            shutdown: Arc::new(Notify::new()),
        }
    }
}
