use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use governor::clock::{Clock, DefaultClock};
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use tokio::sync::mpsc;
use tokio::time::sleep;

use gather_core::AppState;
use gather_models::gateway::{ClientFrame, ErrorCode, ServerFrame};
use gather_models::RoomKey;

use crate::connection::{ConnState, Connection, PendingRoomOp};

static ACTIVE_CONNECTIONS: AtomicUsize = AtomicUsize::new(0);

/// Releases the global connection slot when the handler unwinds, whatever
/// path it took out of the loop.
struct ConnectionGuard {
    global_acquired: bool,
}

impl ConnectionGuard {
    fn new() -> Self {
        Self {
            global_acquired: false,
        }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if self.global_acquired {
            ACTIVE_CONNECTIONS.fetch_sub(1, AtomicOrdering::SeqCst);
        }
    }
}

fn try_acquire_global_slot(max: usize) -> bool {
    let mut current = ACTIVE_CONNECTIONS.load(AtomicOrdering::SeqCst);
    loop {
        if current >= max {
            return false;
        }
        match ACTIVE_CONNECTIONS.compare_exchange(
            current,
            current + 1,
            AtomicOrdering::SeqCst,
            AtomicOrdering::SeqCst,
        ) {
            Ok(_) => return true,
            Err(observed) => current = observed,
        }
    }
}

/// `Ok(())` if the user may send, `Err(retry_after_ms)` when rate limited.
fn check_send_limit(state: &AppState, user_id: &str) -> Result<(), u64> {
    match state.send_limiter.check_key(&user_id.to_string()) {
        Ok(()) => Ok(()),
        Err(not_until) => {
            let wait = not_until.wait_time_from(DefaultClock::default().now());
            Err(wait.as_millis().max(1) as u64)
        }
    }
}

enum Flow {
    Continue,
    Close(&'static str),
}

pub async fn handle_connection(socket: WebSocket, state: AppState) {
    let mut guard = ConnectionGuard::new();
    let (mut sender, mut receiver) = socket.split();

    if !try_acquire_global_slot(state.config.max_global_connections) {
        let _ = sender
            .send(Message::Close(Some(CloseFrame {
                code: 1013,
                reason: "gateway is at connection capacity".into(),
            })))
            .await;
        return;
    }
    guard.global_acquired = true;

    let mut conn = Connection::new();
    // The transport is open by the time the upgrade handler runs.
    conn.state = ConnState::Authenticating;
    tracing::debug!(connection_id = %conn.id, "connection opened, awaiting handshake");

    // Everything outbound funnels through this queue so receipts and
    // broadcasts reach the socket in a single ordered stream.
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ServerFrame>();

    let mut ping_interval = tokio::time::interval(state.config.ping_interval);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let handshake_deadline = sleep(state.config.handshake_timeout);
    tokio::pin!(handshake_deadline);

    let disconnect_reason = loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        conn.touch();
                        match serde_json::from_str::<ClientFrame>(&text) {
                            Ok(frame) => {
                                match handle_frame(frame, &mut conn, &state, &out_tx).await {
                                    Flow::Continue => {}
                                    Flow::Close(reason) => {
                                        // Flush queued frames (e.g. the auth
                                        // error) before dropping the socket.
                                        while let Ok(frame) = out_rx.try_recv() {
                                            let Ok(payload) = serde_json::to_string(&frame) else {
                                                continue;
                                            };
                                            if sender.send(Message::Text(payload.into())).await.is_err() {
                                                break;
                                            }
                                        }
                                        break reason.to_string();
                                    }
                                }
                            }
                            Err(err) => {
                                tracing::debug!(connection_id = %conn.id, error = %err, "unparseable frame");
                                let _ = out_tx.send(ServerFrame::Error {
                                    code: ErrorCode::InvalidPayload,
                                    message: "unrecognized frame".into(),
                                    retry_after_ms: None,
                                });
                            }
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break match frame {
                            Some(frame) => format!("client close (code={}, reason={})", frame.code, frame.reason),
                            None => "client close".to_string(),
                        };
                    }
                    Some(Ok(_)) => {
                        // Binary frames are not part of the protocol; pings
                        // and pongs are handled by the transport layer.
                        conn.touch();
                    }
                    Some(Err(err)) => break format!("websocket receive error: {err}"),
                    None => break "websocket stream ended".to_string(),
                }
            }
            frame = out_rx.recv() => {
                // The handler holds `out_tx`, so the queue never closes
                // before the loop exits.
                let Some(frame) = frame else { break "outbound queue closed".to_string() };
                let payload = match serde_json::to_string(&frame) {
                    Ok(payload) => payload,
                    Err(err) => {
                        tracing::error!(connection_id = %conn.id, error = %err, "frame serialization failed");
                        continue;
                    }
                };
                if sender.send(Message::Text(payload.into())).await.is_err() {
                    break "websocket send error".to_string();
                }
            }
            () = &mut handshake_deadline, if !conn.is_authenticated() => {
                let _ = sender
                    .send(Message::Close(Some(CloseFrame {
                        code: 1008,
                        reason: "handshake timeout".into(),
                    })))
                    .await;
                break "handshake timeout".to_string();
            }
            _ = ping_interval.tick() => {
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break "websocket ping send error".to_string();
                }
            }
        }
    };

    // Entry to Disconnected: the room memberships and the presence entry
    // go together, before anything else can observe this connection.
    conn.state = ConnState::Disconnected;
    state.rooms.remove_connection(conn.id);
    if let Some((user_id, went_offline)) = state.presence.unregister(conn.id) {
        if went_offline {
            state.presence.broadcast(&ServerFrame::Presence {
                user_id: user_id.clone(),
                online: false,
            });
        }
        tracing::info!(
            connection_id = %conn.id,
            user_id = %user_id,
            went_offline,
            reason = %disconnect_reason,
            "connection closed"
        );
    } else {
        tracing::info!(
            connection_id = %conn.id,
            reason = %disconnect_reason,
            "unauthenticated connection closed"
        );
    }
}

async fn handle_frame(
    frame: ClientFrame,
    conn: &mut Connection,
    state: &AppState,
    out_tx: &mpsc::UnboundedSender<ServerFrame>,
) -> Flow {
    match frame {
        ClientFrame::Authenticate { credential } => {
            authenticate(conn, state, out_tx, &credential).await
        }
        ClientFrame::Join { room } => {
            room_op(conn, state, out_tx, PendingRoomOp::Join(room));
            Flow::Continue
        }
        ClientFrame::Leave { room } => {
            room_op(conn, state, out_tx, PendingRoomOp::Leave(room));
            Flow::Continue
        }
        ClientFrame::MessageSend {
            client_id,
            to,
            content,
        } => {
            let Some(identity) = conn.identity.clone().filter(|_| conn.is_authenticated()) else {
                let _ = out_tx.send(ServerFrame::Error {
                    code: ErrorCode::NotAuthenticated,
                    message: "authenticate before sending".into(),
                    retry_after_ms: None,
                });
                return Flow::Continue;
            };

            if let Err(retry_after_ms) = check_send_limit(state, &identity.user_id) {
                let _ = out_tx.send(ServerFrame::Error {
                    code: ErrorCode::RateLimited,
                    message: "message rate limit exceeded".into(),
                    retry_after_ms: Some(retry_after_ms),
                });
                return Flow::Continue;
            }

            match state
                .router
                .send(conn.id, &identity, &client_id, &to, &content)
                .await
            {
                Ok(receipt) => {
                    let _ = out_tx.send(ServerFrame::Receipt(receipt));
                }
                Err(err) => {
                    // Well-behaved clients validate before the round trip;
                    // either way the optimistic entry must be reverted.
                    let _ = out_tx.send(ServerFrame::Receipt(
                        gather_models::DeliveryReceipt::Failed {
                            client_id,
                            reason: err.to_string(),
                        },
                    ));
                }
            }
            Flow::Continue
        }
    }
}

async fn authenticate(
    conn: &mut Connection,
    state: &AppState,
    out_tx: &mpsc::UnboundedSender<ServerFrame>,
    credential: &str,
) -> Flow {
    // A duplicate authenticate on a live session only refreshes activity.
    if conn.is_authenticated() {
        conn.touch();
        return Flow::Continue;
    }

    let identity = match state.auth.verify(credential).await {
        Ok(identity) => identity,
        Err(err) => {
            tracing::info!(connection_id = %conn.id, error = %err, "handshake rejected");
            let _ = out_tx.send(ServerFrame::Error {
                code: ErrorCode::AuthFailed,
                message: err.to_string(),
                retry_after_ms: None,
            });
            return Flow::Close("authentication failed");
        }
    };

    let came_online = match state.presence.register(
        conn.id,
        &identity.user_id,
        out_tx.clone(),
        state.config.max_connections_per_user,
    ) {
        Ok(came_online) => came_online,
        Err(_) => {
            let _ = out_tx.send(ServerFrame::Error {
                code: ErrorCode::Capacity,
                message: "too many concurrent sessions for this user".into(),
                retry_after_ms: None,
            });
            return Flow::Close("per-user connection capacity");
        }
    };

    conn.authenticate(identity.clone());
    let _ = out_tx.send(ServerFrame::Ready {
        user: identity,
        session_id: conn.session_id.clone(),
    });

    // Replay room ops queued during the handshake, preserving call order.
    for op in conn.drain_pending_room_ops() {
        apply_room_op(conn, state, out_tx, op);
    }

    if came_online {
        let user_id = conn.identity.as_ref().map(|i| i.user_id.clone()).unwrap_or_default();
        state.presence.broadcast(&ServerFrame::Presence {
            user_id,
            online: true,
        });
    }
    tracing::debug!(connection_id = %conn.id, session_id = %conn.session_id, "handshake complete");
    Flow::Continue
}

fn room_op(
    conn: &mut Connection,
    state: &AppState,
    out_tx: &mpsc::UnboundedSender<ServerFrame>,
    op: PendingRoomOp,
) {
    if conn.is_authenticated() {
        apply_room_op(conn, state, out_tx, op);
    } else if !conn.queue_room_op(op) {
        tracing::debug!(connection_id = %conn.id, "pre-auth room queue full, op dropped");
        let _ = out_tx.send(ServerFrame::Error {
            code: ErrorCode::InvalidPayload,
            message: "too many queued room operations".into(),
            retry_after_ms: None,
        });
    }
}

fn apply_room_op(
    conn: &Connection,
    state: &AppState,
    out_tx: &mpsc::UnboundedSender<ServerFrame>,
    op: PendingRoomOp,
) {
    let (raw, joining) = match &op {
        PendingRoomOp::Join(room) => (room, true),
        PendingRoomOp::Leave(room) => (room, false),
    };
    let Some(room) = RoomKey::parse(raw.as_str()) else {
        let _ = out_tx.send(ServerFrame::Error {
            code: ErrorCode::InvalidPayload,
            message: format!("malformed room key: {raw}"),
            retry_after_ms: None,
        });
        return;
    };
    // Direct rooms are only joinable by their two participants.
    if room.is_direct() {
        let participant = conn
            .identity
            .as_ref()
            .and_then(|identity| room.direct_counterpart(&identity.user_id))
            .is_some();
        if !participant {
            let _ = out_tx.send(ServerFrame::Error {
                code: ErrorCode::InvalidPayload,
                message: "not a participant of this room".into(),
                retry_after_ms: None,
            });
            return;
        }
    }
    if joining {
        state.rooms.join(conn.id, &room);
    } else {
        state.rooms.leave(conn.id, &room);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_slot_acquisition_respects_the_cap() {
        // Runs against the process-global counter, so derive the cap from
        // whatever is currently held.
        let base = ACTIVE_CONNECTIONS.load(AtomicOrdering::SeqCst);
        assert!(try_acquire_global_slot(base + 1));
        assert!(!try_acquire_global_slot(base + 1));
        ACTIVE_CONNECTIONS.fetch_sub(1, AtomicOrdering::SeqCst);
    }
}
