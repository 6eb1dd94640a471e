mod connection;
mod handler;
mod routes;

use axum::{
    extract::{ws::WebSocketUpgrade, State},
    response::IntoResponse,
    routing::get,
    Router,
};
use gather_core::AppState;

/// The gateway surface: the WebSocket endpoint plus the room history
/// fetch used to catch up after reconnecting or logging back in.
pub fn gateway_router() -> Router<AppState> {
    Router::new()
        .route("/gateway", get(ws_upgrade))
        .route("/rooms/{room_key}/messages", get(routes::room_history))
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handler::handle_connection(socket, state))
}
