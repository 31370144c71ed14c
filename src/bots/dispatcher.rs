use tracing::{debug, error};

use crate::{
    hub::{HubError, HubHandle},
    payload::{BotCommandPayload, MessagePayload, RoomId},
    queue::QueueBridge,
};

use super::BotCommandParser;

pub const NOT_CONFIGURED: &str = "This chatroom isn't configured to work with bots";
const PUBLISH_FAILED: &str = "Could not send a valid request to the bot. Please review your command";

/// Hands chat messages that look like bot commands to the bot queue.
#[derive(Clone)]
pub struct BotDispatcher {
    parser: BotCommandParser,
    bridge: Option<QueueBridge>,
}

impl BotDispatcher {
    /// Without a bridge every command is answered with an error frame.
    pub fn new(parser: BotCommandParser, bridge: Option<QueueBridge>) -> Self {
        Self { parser, bridge }
    }

    /// Returns whether `text` was a bot command. Bot replies arrive later
    /// through the response queue; only local failures are broadcast here.
    pub async fn dispatch(
        &self,
        hub: &HubHandle,
        room_id: RoomId,
        text: &str,
    ) -> Result<bool, HubError> {
        let Some((command, argument)) = self.parser.parse(text) else {
            return Ok(false);
        };

        let Some(bridge) = &self.bridge else {
            debug!(room_id, command, "bot command without a bot queue");
            hub.broadcast(MessagePayload::error(room_id, NOT_CONFIGURED))
                .await?;
            return Ok(true);
        };

        let request = BotCommandPayload {
            command: command.to_owned(),
            argument: argument.to_owned(),
            room_id,
        };
        if let Err(err) = bridge.publish(&request).await {
            error!(%err, room_id, command, "unable to publish bot command");
            hub.broadcast(MessagePayload::error(room_id, PUBLISH_FAILED))
                .await?;
        }
        Ok(true)
    }
}
