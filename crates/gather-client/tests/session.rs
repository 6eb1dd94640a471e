use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use gather_client::{
    ClientConfig, ReconnectSchedule, SessionController, SessionEvent, SessionStatus,
};
use gather_core::auth::{create_token, JwtVerifier};
use gather_core::store::{MemoryMessageStore, MemoryNotificationStore};
use gather_core::{AppState, GatewayConfig};
use gather_models::gateway::{SendTarget, EVENT_CONNECTION, EVENT_MESSAGE, EVENT_RECEIPT};
use gather_models::{DeliveryReceipt, RoomKey};

const SECRET: &str = "client-integration-test-secret";

fn token(user: &str) -> String {
    create_token(user, user, SECRET, 60).expect("mint token")
}

async fn spawn_gateway() -> SocketAddr {
    let state = AppState::new(
        GatewayConfig::default(),
        Arc::new(JwtVerifier::new(SECRET)),
        Arc::new(MemoryMessageStore::new()),
        Arc::new(MemoryNotificationStore::new()),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let app = gather_gateway::gateway_router().with_state(state);
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service())
            .await
            .expect("serve");
    });
    addr
}

fn controller(addr: SocketAddr, user: &str) -> SessionController {
    SessionController::new(
        ClientConfig::new(format!("ws://{addr}/gateway")),
        token(user),
    )
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn session_comes_online_and_round_trips_a_message() {
    let addr = spawn_gateway().await;
    let room = RoomKey::topic("general");

    let alice = controller(addr, "alice");
    let seen_messages: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let _messages = {
        let seen = seen_messages.clone();
        alice.subscribe(EVENT_MESSAGE, "chat-view", move |event| {
            if let SessionEvent::Message(message) = event {
                seen.lock().unwrap().push(message.content.clone());
            }
        })
    };
    alice.ensure_connected();
    wait_for(|| alice.status() == SessionStatus::Online).await;
    assert_eq!(alice.identity().expect("identity").user_id, "alice");
    alice.join(room.clone());

    let bob = controller(addr, "bob");
    let confirmed: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let _receipts = {
        let confirmed = confirmed.clone();
        bob.subscribe(EVENT_RECEIPT, "compose-view", move |event| {
            if let SessionEvent::Receipt(DeliveryReceipt::Confirmed { client_id, .. }) = event {
                confirmed.lock().unwrap().push(client_id.clone());
            }
        })
    };
    bob.ensure_connected();
    wait_for(|| bob.status() == SessionStatus::Online).await;
    bob.join(room.clone());

    // Both ends observe each other through presence broadcasts.
    wait_for(|| alice.is_online("bob")).await;

    let client_id = bob
        .send(SendTarget::Room(room), "hello from bob")
        .expect("send");
    wait_for(|| confirmed.lock().unwrap().contains(&client_id)).await;
    wait_for(|| {
        seen_messages
            .lock()
            .unwrap()
            .iter()
            .any(|content| content == "hello from bob")
    })
    .await;
}

#[tokio::test]
async fn rejected_credential_goes_offline_without_retrying() {
    let addr = spawn_gateway().await;

    let session = SessionController::new(
        ClientConfig::new(format!("ws://{addr}/gateway")),
        "not-a-valid-token",
    );
    let statuses: Arc<Mutex<Vec<SessionStatus>>> = Arc::new(Mutex::new(Vec::new()));
    let _status = {
        let statuses = statuses.clone();
        session.subscribe(EVENT_CONNECTION, "status-bar", move |event| {
            if let SessionEvent::Status(status) = event {
                statuses.lock().unwrap().push(status.clone());
            }
        })
    };

    session.ensure_connected();
    wait_for(|| matches!(session.status(), SessionStatus::Offline { .. })).await;
    // A credential rejection must never enter the reconnect schedule.
    assert!(statuses
        .lock()
        .unwrap()
        .iter()
        .all(|status| !matches!(status, SessionStatus::Degraded { .. })));
}

/// Gateway hosted on its own runtime so a test can tear the whole server
/// down, live connections included.
async fn spawn_killable_gateway() -> (tokio::runtime::Runtime, SocketAddr) {
    tokio::task::spawn_blocking(|| {
        let runtime = tokio::runtime::Runtime::new().expect("runtime");
        let addr = runtime.block_on(async {
            let state = AppState::new(
                GatewayConfig::default(),
                Arc::new(JwtVerifier::new(SECRET)),
                Arc::new(MemoryMessageStore::new()),
                Arc::new(MemoryNotificationStore::new()),
            );
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
                .await
                .expect("bind");
            let addr = listener.local_addr().expect("local addr");
            let app = gather_gateway::gateway_router().with_state(state);
            tokio::spawn(async move {
                let _ = axum::serve(listener, app.into_make_service()).await;
            });
            addr
        });
        (runtime, addr)
    })
    .await
    .expect("spawn gateway runtime")
}

#[tokio::test]
async fn reconnect_attempts_stay_within_the_bound_then_stop() {
    let (server_rt, addr) = spawn_killable_gateway().await;

    let mut config = ClientConfig::new(format!("ws://{addr}/gateway"));
    config.reconnect = ReconnectSchedule::new(vec![
        Duration::from_millis(50),
        Duration::from_millis(100),
    ]);
    let session = SessionController::new(config, token("alice"));
    let statuses: Arc<Mutex<Vec<SessionStatus>>> = Arc::new(Mutex::new(Vec::new()));
    let _status = {
        let statuses = statuses.clone();
        session.subscribe(EVENT_CONNECTION, "status-bar", move |event| {
            if let SessionEvent::Status(status) = event {
                statuses.lock().unwrap().push(status.clone());
            }
        })
    };

    session.ensure_connected();
    wait_for(|| session.status() == SessionStatus::Online).await;

    // Kill the gateway, taking the live socket with it.
    tokio::task::spawn_blocking(move || drop(server_rt))
        .await
        .expect("stop gateway");
    wait_for(|| matches!(session.status(), SessionStatus::Offline { .. })).await;

    let attempts: Vec<usize> = statuses
        .lock()
        .unwrap()
        .iter()
        .filter_map(|status| match status {
            SessionStatus::Degraded { attempt } => Some(*attempt),
            _ => None,
        })
        .collect();
    assert!(!attempts.is_empty());
    assert!(attempts.iter().all(|attempt| *attempt <= 2));

    // The schedule is exhausted: nothing runs again until the UI asks.
    let settled = statuses.lock().unwrap().len();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(statuses.lock().unwrap().len(), settled);
    assert!(matches!(session.status(), SessionStatus::Offline { .. }));
}

#[tokio::test]
async fn rotated_credential_is_used_by_the_next_connect() {
    let addr = spawn_gateway().await;

    let session = SessionController::new(
        ClientConfig::new(format!("ws://{addr}/gateway")),
        "stale-token",
    );
    session.ensure_connected();
    wait_for(|| matches!(session.status(), SessionStatus::Offline { .. })).await;

    session.rotate_credential(token("alice"));
    session.ensure_connected();
    wait_for(|| session.status() == SessionStatus::Online).await;
    assert_eq!(session.identity().expect("identity").user_id, "alice");
}

#[tokio::test]
async fn room_membership_is_replayed_on_a_fresh_connection() {
    let addr = spawn_gateway().await;
    let room = RoomKey::topic("replay");

    let alice = controller(addr, "alice");
    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let _messages = {
        let seen = seen.clone();
        alice.subscribe(EVENT_MESSAGE, "chat-view", move |event| {
            if let SessionEvent::Message(message) = event {
                seen.lock().unwrap().push(message.content.clone());
            }
        })
    };
    // Declared before the connection exists; sent once the socket is up.
    alice.join(room.clone());
    alice.ensure_connected();
    wait_for(|| alice.status() == SessionStatus::Online).await;

    let bob = controller(addr, "bob");
    bob.ensure_connected();
    wait_for(|| bob.status() == SessionStatus::Online).await;
    bob.join(room.clone());
    bob.send(SendTarget::Room(room), "replayed join works")
        .expect("send");

    wait_for(|| {
        seen.lock()
            .unwrap()
            .iter()
            .any(|content| content == "replayed join works")
    })
    .await;
}
