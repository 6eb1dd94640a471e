use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use gather_models::gateway::{ClientFrame, ErrorCode, SendTarget, ServerFrame};
use gather_models::{DeliveryReceipt, DeliveryState, Identity, RoomKey};

use crate::backoff::ReconnectSchedule;
use crate::event::{SessionEvent, SessionStatus};
use crate::outbox::{reconcile, OutboxEntry, Reconciled};

#[derive(Debug, Error)]
pub enum ClientError {
    /// Rejected locally, before any network round trip.
    #[error("validation error: {0}")]
    Validation(String),
    #[error("not connected")]
    NotConnected,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub gateway_url: String,
    pub reconnect: ReconnectSchedule,
    /// A send with no receipt within this bound fails like a persistence
    /// error would.
    pub send_timeout: Duration,
}

impl ClientConfig {
    pub fn new(gateway_url: impl Into<String>) -> Self {
        Self {
            gateway_url: gateway_url.into(),
            reconnect: ReconnectSchedule::default(),
            send_timeout: Duration::from_secs(10),
        }
    }
}

type Handler = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

struct Inner {
    config: ClientConfig,
    credential: RwLock<String>,
    /// At most one active handler per (event kind, subscriber id).
    handlers: DashMap<(String, String), Handler>,
    phase: Mutex<SessionStatus>,
    writer: Mutex<Option<mpsc::UnboundedSender<ClientFrame>>>,
    /// Rooms the UI wants to be in; re-joined on every (re)connect.
    desired_rooms: Mutex<HashSet<RoomKey>>,
    outbox: Mutex<Vec<OutboxEntry>>,
    online: DashMap<String, ()>,
    identity: Mutex<Option<Identity>>,
    /// Bumped on every connect/disconnect request; a running connect loop
    /// that observes a newer generation stops touching shared state.
    generation: AtomicU64,
}

/// The one logical connection an authenticated session owns, process-wide.
/// UI views talk to the gateway exclusively through this controller so
/// that remounts and duplicate mounts can never register duplicate socket
/// handlers or duplicate server-side room joins.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

impl SessionController {
    pub fn new(config: ClientConfig, credential: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                credential: RwLock::new(credential.into()),
                handlers: DashMap::new(),
                phase: Mutex::new(SessionStatus::Offline {
                    reason: "never connected".into(),
                }),
                writer: Mutex::new(None),
                desired_rooms: Mutex::new(HashSet::new()),
                outbox: Mutex::new(Vec::new()),
                online: DashMap::new(),
                identity: Mutex::new(None),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Idempotent: opens the connection if absent or offline, no-ops while
    /// connected or while the reconnect schedule is still running.
    pub fn ensure_connected(&self) {
        {
            let phase = self.inner.phase.lock().unwrap();
            if !matches!(*phase, SessionStatus::Offline { .. }) {
                return;
            }
        }
        let generation = self.inner.generation.fetch_add(1, AtomicOrdering::SeqCst) + 1;
        let inner = self.inner.clone();
        tokio::spawn(run_connect_loop(inner, generation));
    }

    /// Explicit close; no automatic retry afterwards.
    pub fn disconnect(&self) {
        self.inner.generation.fetch_add(1, AtomicOrdering::SeqCst);
        // Dropping the last writer ends the session loop promptly.
        *self.inner.writer.lock().unwrap() = None;
        self.inner.online.clear();
        set_status(
            &self.inner,
            SessionStatus::Offline {
                reason: "explicitly disconnected".into(),
            },
        );
    }

    /// Register a handler for one event kind. Re-subscribing under the
    /// same subscriber id replaces the previous handler, so a view that
    /// re-renders can never accumulate duplicates. Dropping the returned
    /// token unregisters the handler — unless a newer subscription already
    /// took the slot.
    pub fn subscribe(
        &self,
        kind: &str,
        subscriber_id: &str,
        handler: impl Fn(&SessionEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let key = (kind.to_string(), subscriber_id.to_string());
        let handler: Handler = Arc::new(handler);
        self.inner.handlers.insert(key.clone(), handler.clone());
        Subscription {
            inner: Arc::downgrade(&self.inner),
            key,
            handler,
        }
    }

    /// Optimistic send: the returned client id identifies the entry the UI
    /// shows immediately; the matching receipt (or the send timeout)
    /// resolves it.
    pub fn send(&self, to: SendTarget, content: &str) -> Result<String, ClientError> {
        let content = content.trim().to_string();
        if content.is_empty() {
            return Err(ClientError::Validation("empty message content".into()));
        }
        let Some(writer) = self.inner.writer.lock().unwrap().clone() else {
            return Err(ClientError::NotConnected);
        };

        let client_id = uuid::Uuid::new_v4().to_string();
        self.inner.outbox.lock().unwrap().push(OutboxEntry {
            client_id: client_id.clone(),
            to: to.clone(),
            content: content.clone(),
            state: DeliveryState::Optimistic,
        });
        if writer
            .send(ClientFrame::MessageSend {
                client_id: client_id.clone(),
                to,
                content,
            })
            .is_err()
        {
            // Tore down between the writer check and the send.
            self.inner
                .outbox
                .lock()
                .unwrap()
                .retain(|entry| entry.client_id != client_id);
            return Err(ClientError::NotConnected);
        }

        let inner = self.inner.clone();
        let pending_id = client_id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(inner.config.send_timeout).await;
            let still_pending = inner
                .outbox
                .lock()
                .unwrap()
                .iter()
                .any(|entry| entry.client_id == pending_id);
            if still_pending {
                apply_receipt(
                    &inner,
                    &DeliveryReceipt::Failed {
                        client_id: pending_id,
                        reason: "send timed out".into(),
                    },
                );
            }
        });
        Ok(client_id)
    }

    /// Join a room. The membership is remembered and replayed on every
    /// reconnect; joining again is a no-op end to end.
    pub fn join(&self, room: RoomKey) {
        self.inner.desired_rooms.lock().unwrap().insert(room.clone());
        if let Some(writer) = self.inner.writer.lock().unwrap().as_ref() {
            let _ = writer.send(ClientFrame::Join { room });
        }
    }

    pub fn leave(&self, room: RoomKey) {
        self.inner.desired_rooms.lock().unwrap().remove(&room);
        if let Some(writer) = self.inner.writer.lock().unwrap().as_ref() {
            let _ = writer.send(ClientFrame::Leave { room });
        }
    }

    /// Answered from the presence cache fed by server broadcasts.
    pub fn is_online(&self, user_id: &str) -> bool {
        self.inner.online.contains_key(user_id)
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.phase.lock().unwrap().clone()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.inner.identity.lock().unwrap().clone()
    }

    /// Swap the credential used by the next authenticate. A live session
    /// keeps running; only a server-side rejection forces a reconnect, at
    /// which point the refreshed credential is already in place.
    pub fn rotate_credential(&self, credential: impl Into<String>) {
        *self.inner.credential.write().unwrap() = credential.into();
    }
}

/// Removes its handler on drop, but only if the slot still holds this
/// exact handler — a newer subscription under the same key wins.
#[must_use = "dropping the subscription unregisters the handler"]
pub struct Subscription {
    inner: Weak<Inner>,
    key: (String, String),
    handler: Handler,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner
                .handlers
                .remove_if(&self.key, |_, existing| Arc::ptr_eq(existing, &self.handler));
        }
    }
}

enum SessionEnd {
    /// Known-bad credential or capacity rejection; retrying automatically
    /// would loop, so the controller stops until told otherwise.
    Fatal(String),
    Dropped {
        reason: String,
        was_authenticated: bool,
    },
}

enum Control {
    Continue,
    Fatal(String),
}

async fn run_connect_loop(inner: Arc<Inner>, generation: u64) {
    let mut attempt = 0usize;
    loop {
        if inner.generation.load(AtomicOrdering::SeqCst) != generation {
            return;
        }
        set_status(&inner, SessionStatus::Connecting);
        let end = connect_once(&inner).await;
        if inner.generation.load(AtomicOrdering::SeqCst) != generation {
            // A newer session owns the shared state now; an explicit
            // disconnect already published its own status. Touch nothing.
            return;
        }
        *inner.writer.lock().unwrap() = None;
        inner.online.clear();
        match end {
            SessionEnd::Fatal(reason) => {
                tracing::warn!(reason, "session ended, not retrying");
                set_status(&inner, SessionStatus::Offline { reason });
                return;
            }
            SessionEnd::Dropped {
                reason,
                was_authenticated,
            } => {
                if was_authenticated {
                    attempt = 0;
                }
                match inner.config.reconnect.delay_for(attempt) {
                    Some(delay) => {
                        attempt += 1;
                        tracing::debug!(reason, attempt, ?delay, "transport dropped, reconnecting");
                        set_status(&inner, SessionStatus::Degraded { attempt });
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        tracing::warn!(reason, "reconnect schedule exhausted");
                        set_status(&inner, SessionStatus::Offline { reason });
                        return;
                    }
                }
            }
        }
    }
}

async fn connect_once(inner: &Arc<Inner>) -> SessionEnd {
    let url = inner.config.gateway_url.clone();
    let ws = match connect_async(url).await {
        Ok((ws, _)) => ws,
        Err(err) => {
            return SessionEnd::Dropped {
                reason: format!("connect failed: {err}"),
                was_authenticated: false,
            }
        }
    };
    let (mut sink, mut stream) = ws.split();

    // The credential goes out first, so the server validates during the
    // initial handshake; desired rooms follow and the server queues them
    // until the handshake completes.
    let (writer, mut queued) = mpsc::unbounded_channel::<ClientFrame>();
    let _ = writer.send(ClientFrame::Authenticate {
        credential: inner.credential.read().unwrap().clone(),
    });
    for room in inner.desired_rooms.lock().unwrap().iter() {
        let _ = writer.send(ClientFrame::Join { room: room.clone() });
    }
    *inner.writer.lock().unwrap() = Some(writer);

    let mut authenticated = false;
    loop {
        tokio::select! {
            frame = queued.recv() => {
                let Some(frame) = frame else {
                    return SessionEnd::Dropped {
                        reason: "writer closed".into(),
                        was_authenticated: authenticated,
                    };
                };
                let Ok(payload) = serde_json::to_string(&frame) else { continue };
                if sink.send(Message::Text(payload.into())).await.is_err() {
                    return SessionEnd::Dropped {
                        reason: "websocket send error".into(),
                        was_authenticated: authenticated,
                    };
                }
            }
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let Ok(frame) = serde_json::from_str::<ServerFrame>(&text) else {
                            tracing::debug!("unrecognized server frame, ignored");
                            continue;
                        };
                        match apply_server_frame(inner, frame, &mut authenticated) {
                            Control::Continue => {}
                            Control::Fatal(reason) => return SessionEnd::Fatal(reason),
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        return SessionEnd::Dropped {
                            reason: "server closed the connection".into(),
                            was_authenticated: authenticated,
                        };
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        return SessionEnd::Dropped {
                            reason: format!("transport error: {err}"),
                            was_authenticated: authenticated,
                        };
                    }
                    None => {
                        return SessionEnd::Dropped {
                            reason: "websocket stream ended".into(),
                            was_authenticated: authenticated,
                        };
                    }
                }
            }
        }
    }
}

fn apply_server_frame(
    inner: &Arc<Inner>,
    frame: ServerFrame,
    authenticated: &mut bool,
) -> Control {
    match frame {
        ServerFrame::Ready { user, session_id } => {
            *authenticated = true;
            tracing::info!(user_id = %user.user_id, %session_id, "session ready");
            inner.online.insert(user.user_id.clone(), ());
            *inner.identity.lock().unwrap() = Some(user);
            set_status(inner, SessionStatus::Online);
            Control::Continue
        }
        ServerFrame::Receipt(receipt) => {
            apply_receipt(inner, &receipt);
            Control::Continue
        }
        ServerFrame::MessageDelivered { message } => {
            emit(inner, &SessionEvent::Message(message));
            Control::Continue
        }
        ServerFrame::Notification { notification } => {
            emit(inner, &SessionEvent::Notification(notification));
            Control::Continue
        }
        ServerFrame::Presence { user_id, online } => {
            if online {
                inner.online.insert(user_id.clone(), ());
            } else {
                inner.online.remove(&user_id);
            }
            emit(inner, &SessionEvent::Presence { user_id, online });
            Control::Continue
        }
        ServerFrame::Error {
            code,
            message,
            retry_after_ms,
        } => match code {
            ErrorCode::AuthFailed => Control::Fatal(format!("authentication failed: {message}")),
            ErrorCode::Capacity => Control::Fatal(message),
            _ => {
                tracing::warn!(?code, message, retry_after_ms, "server rejected a frame");
                Control::Continue
            }
        },
    }
}

fn apply_receipt(inner: &Arc<Inner>, receipt: &DeliveryReceipt) {
    let outcome = reconcile(&mut inner.outbox.lock().unwrap(), receipt);
    emit(inner, &SessionEvent::Receipt(receipt.clone()));
    if let Some(Reconciled::Failed { client_id, content }) = outcome {
        emit(inner, &SessionEvent::SendFailed { client_id, content });
    }
}

fn set_status(inner: &Arc<Inner>, status: SessionStatus) {
    *inner.phase.lock().unwrap() = status.clone();
    emit(inner, &SessionEvent::Status(status));
}

fn emit(inner: &Arc<Inner>, event: &SessionEvent) {
    let kind = event.kind();
    // Collected first so a handler may subscribe/unsubscribe re-entrantly.
    let handlers: Vec<Handler> = inner
        .handlers
        .iter()
        .filter(|entry| entry.key().0 == kind)
        .map(|entry| entry.value().clone())
        .collect();
    for handler in handlers {
        handler(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gather_models::gateway::{EVENT_MESSAGE, EVENT_RECEIPT};
    use gather_models::ChatMessage;
    use std::sync::atomic::AtomicUsize;

    fn controller() -> SessionController {
        SessionController::new(ClientConfig::new("ws://localhost:0/gateway"), "token")
    }

    fn message_frame() -> ServerFrame {
        ServerFrame::MessageDelivered {
            message: ChatMessage {
                id: "m1".into(),
                room: RoomKey::topic("t"),
                sender_id: "u2".into(),
                content: "hi".into(),
                created_at: chrono::Utc::now(),
                read: false,
            },
        }
    }

    #[test]
    fn resubscribing_replaces_the_previous_handler() {
        let controller = controller();
        let count = Arc::new(AtomicUsize::new(0));

        let first = {
            let count = count.clone();
            controller.subscribe(EVENT_MESSAGE, "chat-view", move |_| {
                count.fetch_add(1, AtomicOrdering::SeqCst);
            })
        };
        // Remounted view re-subscribes before the old unsubscribe fires.
        let _second = {
            let count = count.clone();
            controller.subscribe(EVENT_MESSAGE, "chat-view", move |_| {
                count.fetch_add(1, AtomicOrdering::SeqCst);
            })
        };

        let mut authenticated = false;
        apply_server_frame(&controller.inner, message_frame(), &mut authenticated);
        assert_eq!(count.load(AtomicOrdering::SeqCst), 1);

        // The stale token's drop must not tear down the new handler.
        drop(first);
        apply_server_frame(&controller.inner, message_frame(), &mut authenticated);
        assert_eq!(count.load(AtomicOrdering::SeqCst), 2);
    }

    #[test]
    fn dropping_the_active_subscription_unregisters_it() {
        let controller = controller();
        let count = Arc::new(AtomicUsize::new(0));
        let token = {
            let count = count.clone();
            controller.subscribe(EVENT_MESSAGE, "chat-view", move |_| {
                count.fetch_add(1, AtomicOrdering::SeqCst);
            })
        };
        drop(token);
        let mut authenticated = false;
        apply_server_frame(&controller.inner, message_frame(), &mut authenticated);
        assert_eq!(count.load(AtomicOrdering::SeqCst), 0);
    }

    #[test]
    fn send_requires_a_connection_and_non_empty_content() {
        let controller = controller();
        assert!(matches!(
            controller.send(
                SendTarget::User {
                    user_id: "u2".into()
                },
                "hello"
            ),
            Err(ClientError::NotConnected)
        ));

        let (tx, _rx) = mpsc::unbounded_channel();
        *controller.inner.writer.lock().unwrap() = Some(tx);
        assert!(matches!(
            controller.send(
                SendTarget::User {
                    user_id: "u2".into()
                },
                "   "
            ),
            Err(ClientError::Validation(_))
        ));
    }

    #[test]
    fn presence_frames_feed_the_online_cache() {
        let controller = controller();
        let mut authenticated = false;
        apply_server_frame(
            &controller.inner,
            ServerFrame::Presence {
                user_id: "u2".into(),
                online: true,
            },
            &mut authenticated,
        );
        assert!(controller.is_online("u2"));
        apply_server_frame(
            &controller.inner,
            ServerFrame::Presence {
                user_id: "u2".into(),
                online: false,
            },
            &mut authenticated,
        );
        assert!(!controller.is_online("u2"));
    }

    #[tokio::test(start_paused = true)]
    async fn unacknowledged_send_fails_after_the_timeout() {
        let controller = controller();
        let failures: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let _token = {
            let failures = failures.clone();
            controller.subscribe(EVENT_RECEIPT, "compose-view", move |event| {
                if let SessionEvent::SendFailed { content, .. } = event {
                    failures.lock().unwrap().push(content.clone());
                }
            })
        };

        let (tx, _rx) = mpsc::unbounded_channel();
        *controller.inner.writer.lock().unwrap() = Some(tx);
        controller
            .send(
                SendTarget::User {
                    user_id: "u2".into(),
                },
                "hello",
            )
            .unwrap();

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(failures.lock().unwrap().as_slice(), ["hello"]);
        assert!(controller.inner.outbox.lock().unwrap().is_empty());
    }

    #[test]
    fn rotating_the_credential_keeps_the_live_writer() {
        let controller = controller();
        let (tx, _rx) = mpsc::unbounded_channel();
        *controller.inner.writer.lock().unwrap() = Some(tx);

        controller.rotate_credential("refreshed-token");
        assert!(controller.inner.writer.lock().unwrap().is_some());
        assert_eq!(
            *controller.inner.credential.read().unwrap(),
            "refreshed-token"
        );
    }

    #[tokio::test]
    async fn stale_connect_loop_leaves_the_successor_session_alone() {
        // Accepts the TCP connection but never answers the websocket
        // handshake, parking the connect loop mid-attempt.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let config = ClientConfig {
            gateway_url: format!("ws://{addr}/gateway"),
            reconnect: ReconnectSchedule::new(Vec::new()),
            send_timeout: Duration::from_secs(10),
        };
        let controller = SessionController::new(config, "token");
        let inner = controller.inner.clone();

        let stale = tokio::spawn(run_connect_loop(inner.clone(), 0));
        tokio::time::sleep(Duration::from_millis(50)).await;

        // A rapid disconnect/ensure_connected cycle hands the shared state
        // to a newer session while the old loop is still in flight.
        inner.generation.fetch_add(1, AtomicOrdering::SeqCst);
        let (tx, _rx) = mpsc::unbounded_channel();
        *inner.writer.lock().unwrap() = Some(tx);
        inner.online.insert("peer".into(), ());
        set_status(&inner, SessionStatus::Online);

        drop(listener);
        tokio::time::timeout(Duration::from_secs(5), stale)
            .await
            .expect("stale loop did not finish")
            .expect("stale loop task");

        // The exiting loop must not null the new writer or wipe the
        // presence cache out from under the live session.
        assert!(inner.writer.lock().unwrap().is_some());
        assert!(controller.is_online("peer"));
        assert_eq!(controller.status(), SessionStatus::Online);
    }

    #[test]
    fn auth_rejection_is_fatal_for_the_session() {
        let controller = controller();
        let mut authenticated = false;
        let control = apply_server_frame(
            &controller.inner,
            ServerFrame::Error {
                code: ErrorCode::AuthFailed,
                message: "token expired".into(),
                retry_after_ms: None,
            },
            &mut authenticated,
        );
        assert!(matches!(control, Control::Fatal(_)));
    }
}
