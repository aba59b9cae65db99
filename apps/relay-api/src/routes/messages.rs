//! Message history endpoints.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::auth::middleware::AuthUser;
use crate::error::{ApiError, ApiErrorBody};
use crate::models::message::ChatMessage;
use crate::AppState;

use super::auth::MessageResponse;

pub fn router() -> Router<AppState> {
    Router::new().route("/messages", get(list_messages).delete(clear_messages))
}

/// One history entry as returned to clients.
#[derive(Debug, Serialize, ToSchema)]
pub struct HistoryEntry {
    pub username: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl From<ChatMessage> for HistoryEntry {
    fn from(m: ChatMessage) -> Self {
        Self {
            username: m.username,
            message: m.message,
            timestamp: m.created_at,
        }
    }
}

// ---------------------------------------------------------------------------
// GET /messages
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/messages",
    tag = "Messages",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Full history in insertion order", body = [HistoryEntry]),
        (status = 401, description = "Missing or invalid token", body = ApiErrorBody),
    ),
)]
pub async fn list_messages(
    _auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<HistoryEntry>>, ApiError> {
    let messages = state.log.list_all().await?;
    Ok(Json(messages.into_iter().map(HistoryEntry::from).collect()))
}

// ---------------------------------------------------------------------------
// DELETE /messages
// ---------------------------------------------------------------------------

#[utoipa::path(
    delete,
    path = "/messages",
    tag = "Messages",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "History cleared", body = MessageResponse),
        (status = 401, description = "Missing or invalid token", body = ApiErrorBody),
    ),
)]
pub async fn clear_messages(
    AuthUser { username }: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<MessageResponse>, ApiError> {
    let removed = state.log.clear_all().await?;

    tracing::info!(%username, removed, "message log cleared");

    Ok(Json(MessageResponse {
        msg: format!("All messages cleared by {username}"),
    }))
}
