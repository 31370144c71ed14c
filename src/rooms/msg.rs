use axum::{
    Json, debug_handler,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Deserialize;

use crate::{
    AppResult, AppState,
    auth::Identity,
    payload::{MessageKind, MessagePayload, MessagesPayload},
};

use super::room::existing_room;

#[derive(Debug, Deserialize)]
pub(crate) struct SendMessageRequest {
    message: String,
    #[serde(rename = "type", default)]
    kind: MessageKind,
}

#[debug_handler]
pub(crate) async fn last_messages(
    State(state): State<AppState>,
    _identity: Identity,
    Path(room_id): Path<String>,
) -> AppResult<Json<MessagesPayload>> {
    let room_id = existing_room(&state.store, &room_id).await?;
    let messages = state.store.last_messages(room_id, state.history_limit).await?;
    Ok(Json(MessagesPayload {
        size: messages.len(),
        messages,
    }))
}

/// Persists the message, then treats it exactly like a frame from a live
/// connection: broadcast to the room, then bot dispatch.
#[debug_handler]
pub(crate) async fn send_msg(
    State(state): State<AppState>,
    identity: Identity,
    Path(room_id): Path<String>,

    Json(SendMessageRequest { message, kind }): Json<SendMessageRequest>,
) -> AppResult<(StatusCode, Json<MessagePayload>)> {
    let room_id = existing_room(&state.store, &room_id).await?;
    let payload = state
        .store
        .create_message(&message, &kind, Some(identity.user_id), room_id)
        .await?
        .into_payload(Some(identity.username));

    state.hub.broadcast(payload.clone()).await?;
    state
        .bots
        .dispatch(&state.hub, room_id, &payload.message)
        .await?;

    Ok((StatusCode::CREATED, Json(payload)))
}
