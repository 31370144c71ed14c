use axum::{Json, debug_handler, extract::State, http::StatusCode};
use serde::Deserialize;
use tracing::info;

use crate::{
    AppResult, AppState,
    auth::Identity,
    payload::{RoomPayload, RoomsPayload},
    store::ChatStore,
};

#[derive(Debug, Deserialize)]
pub(crate) struct NewRoomRequest {
    name: String,
}

#[debug_handler(state = AppState)]
pub(crate) async fn list_rooms(
    State(store): State<ChatStore>,
    _identity: Identity,
) -> AppResult<Json<RoomsPayload>> {
    let rooms = store.list_rooms().await?;
    Ok(Json(RoomsPayload {
        size: rooms.len(),
        rooms,
    }))
}

#[debug_handler(state = AppState)]
pub(crate) async fn new_room(
    State(store): State<ChatStore>,
    identity: Identity,

    Json(NewRoomRequest { name }): Json<NewRoomRequest>,
) -> AppResult<(StatusCode, Json<RoomPayload>)> {
    let room = store.create_room(&name).await?;
    info!(room_id = room.id, name = %room.name, username = %identity.username, "created room");
    Ok((StatusCode::CREATED, Json(room)))
}
