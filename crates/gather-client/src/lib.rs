//! Client-side session layer for the Gather gateway.
//!
//! A UI embeds exactly one [`SessionController`] per authenticated user.
//! The controller owns the websocket, replays room memberships across
//! reconnects, keeps the optimistic outbox, and fans incoming events out
//! to subscribed views with per-subscriber deduplication.

pub mod backoff;
pub mod controller;
pub mod event;
pub mod outbox;

pub use backoff::ReconnectSchedule;
pub use controller::{ClientConfig, ClientError, SessionController, Subscription};
pub use event::{SessionEvent, SessionStatus};
pub use outbox::{OutboxEntry, Reconciled};
