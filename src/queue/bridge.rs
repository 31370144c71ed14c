use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    hub::HubHandle,
    payload::{BotCommandPayload, MessagePayload},
};

use super::{MessageQueue, QueueError};

/// Chat-server side of the bot queues: publishes commands and feeds bot
/// replies back into the hub.
#[derive(Clone)]
pub struct QueueBridge {
    queue: Arc<dyn MessageQueue>,
    request_queue: String,
    response_queue: String,
}

impl QueueBridge {
    /// Declares both queues before handing out the bridge.
    pub async fn new(
        queue: Arc<dyn MessageQueue>,
        request_queue: impl Into<String>,
        response_queue: impl Into<String>,
    ) -> Result<Self, QueueError> {
        let bridge = Self {
            queue,
            request_queue: request_queue.into(),
            response_queue: response_queue.into(),
        };
        bridge.queue.declare(&bridge.request_queue).await?;
        bridge.queue.declare(&bridge.response_queue).await?;
        Ok(bridge)
    }

    pub async fn publish(&self, command: &BotCommandPayload) -> Result<(), QueueError> {
        let body = serde_json::to_vec(command)?;
        self.queue.publish(&self.request_queue, body).await?;
        debug!(command = %command.command, room_id = command.room_id, "published bot command");
        Ok(())
    }

    /// Broadcasts every decodable reply until cancelled or until the hub or
    /// the queue goes away.
    pub async fn run(self, hub: HubHandle, token: CancellationToken) -> Result<(), QueueError> {
        let mut deliveries = self.queue.consume(&self.response_queue).await?;
        info!(queue = %self.response_queue, "listening for bot responses");

        loop {
            let body = tokio::select! {
                () = token.cancelled() => break,
                body = deliveries.recv() => match body {
                    Some(body) => body,
                    None => break,
                },
            };

            let message: MessagePayload = match serde_json::from_slice(&body) {
                Ok(message) => message,
                Err(err) => {
                    warn!(%err, "unable to decode bot response");
                    continue;
                }
            };

            if hub.broadcast(message).await.is_err() {
                break;
            }
        }

        info!("stopped listening for bot responses");
        Ok(())
    }
}
