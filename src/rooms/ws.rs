use std::sync::Arc;

use axum::{
    debug_handler,
    extract::{Path, State, WebSocketUpgrade},
    response::Response,
};
use tracing::{debug, warn};

use crate::{
    AppResult, AppState,
    auth::Identity,
    bots::BotDispatcher,
    config::ClientConfig,
    hub::{Connection, HubHandle},
    store::ChatStore,
};

use super::room::existing_room;

#[debug_handler(state = AppState)]
pub(crate) async fn room_ws(
    Path(room_id): Path<String>,
    State(store): State<ChatStore>,
    State(hub): State<HubHandle>,
    State(bots): State<BotDispatcher>,
    State(config): State<Arc<ClientConfig>>,
    identity: Identity,

    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    let room_id = existing_room(&store, &room_id).await?;

    Ok(ws
        .max_message_size(config.max_message_size)
        .max_frame_size(config.max_message_size)
        .on_failed_upgrade(move |err| {
            warn!(room_id, %err, "error trying to set up websocket connection");
        })
        .on_upgrade(move |socket| async move {
            let connection = Connection::new(room_id, identity.username, hub, bots, config);
            let conn_id = connection.id();
            match connection.start(socket).await {
                Ok(()) => debug!(%conn_id, room_id, "client connected"),
                Err(err) => warn!(%conn_id, room_id, %err, "unable to register client"),
            }
        }))
}
