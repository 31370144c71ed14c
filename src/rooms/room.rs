use crate::{AppError, AppResult, payload::RoomId, store::ChatStore};

/// Parses a room id taken from the path and checks that the room exists.
pub(crate) async fn existing_room(store: &ChatStore, room_id: &str) -> AppResult<RoomId> {
    let Ok(room_id) = room_id.parse::<RoomId>() else {
        return Err(AppError::bad_request(format!(
            "{room_id:?} is not a valid room id"
        )));
    };

    if !store.room_exists(room_id).await? {
        return Err(AppError::not_found(format!("room {room_id} does not exist")));
    }

    Ok(room_id)
}
