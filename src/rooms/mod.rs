mod msg;
mod new;
mod room;
mod ws;

use axum::{Router, routing::get};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/rooms", get(new::list_rooms).post(new::new_room))
        .route(
            "/rooms/{room_id}/messages",
            get(msg::last_messages).post(msg::send_msg),
        )
        .route("/ws/{room_id}", get(ws::room_ws))
}
