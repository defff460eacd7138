use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use tasktalk_sync::{ChatConversationSync, ChatListSync, Session};
use tasktalk_types::api::{ChatQuery, SendMessageRequest};
use tasktalk_types::models::{MediaKind, Message, PeerEntry};

use crate::error::ApiError;
use crate::state::AppState;

/// The chat screen: every other user with their conversation state,
/// optionally filtered by `q`.
pub async fn list_chats(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Query(query): Query<ChatQuery>,
) -> Result<Json<Vec<PeerEntry>>, ApiError> {
    let chats = ChatListSync::new(state.backend.clone(), &session);
    Ok(Json(chats.directory(&query.q).await?))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(peer_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    ChatListSync::new(state.backend.clone(), &session)
        .mark_read(peer_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_messages(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(peer_id): Path<Uuid>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let chat = ChatConversationSync::open(state.backend.clone(), &session, peer_id).await?;
    Ok(Json(chat.messages().await?))
}

pub async fn send_message(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(peer_id): Path<Uuid>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let chat = ChatConversationSync::open(state.backend.clone(), &session, peer_id).await?;
    let message = match req.kind {
        MediaKind::Text => chat.send_text(&req.text).await?,
        kind => {
            chat.send_media(kind, req.media_uri.as_deref().unwrap_or_default())
                .await?
        }
    };
    Ok((StatusCode::CREATED, Json(message)))
}
