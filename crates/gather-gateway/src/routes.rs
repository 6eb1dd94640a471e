use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use gather_core::store::Pagination;
use gather_core::AppState;
use gather_models::{ChatMessage, Identity, RoomKey};

pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

async fn bearer_identity(state: &AppState, headers: &HeaderMap) -> Result<Identity, ApiError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::new(StatusCode::UNAUTHORIZED, "missing bearer credential"))?;
    state
        .auth
        .verify(token)
        .await
        .map_err(|err| ApiError::new(StatusCode::UNAUTHORIZED, err.to_string()))
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub before: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

/// Paginated room history, newest first. This is how a client that was
/// offline catches up after its next login; real-time delivery only covers
/// connections that were live at send time.
pub async fn room_history(
    State(state): State<AppState>,
    Path(room_key): Path<String>,
    Query(params): Query<HistoryParams>,
    headers: HeaderMap,
) -> Result<Json<Vec<ChatMessage>>, ApiError> {
    let identity = bearer_identity(&state, &headers).await?;
    let room = RoomKey::parse(&room_key)
        .ok_or_else(|| ApiError::new(StatusCode::BAD_REQUEST, "malformed room key"))?;
    if room.is_direct() && room.direct_counterpart(&identity.user_id).is_none() {
        return Err(ApiError::new(
            StatusCode::FORBIDDEN,
            "not a participant of this room",
        ));
    }

    let page = Pagination::clamped(params.before, params.limit);
    let messages = state
        .messages
        .history(&room, page)
        .await
        .map_err(|err| ApiError::new(StatusCode::SERVICE_UNAVAILABLE, err.to_string()))?;
    Ok(Json(messages))
}
