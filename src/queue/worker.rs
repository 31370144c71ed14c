use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    bots::BotRegistry,
    payload::{BotCommandPayload, MessagePayload},
};

use super::{MessageQueue, QueueError};

/// Consumes bot commands, runs them against the registry and publishes the
/// replies. Each command is handled on its own task.
pub struct BotWorker {
    queue: Arc<dyn MessageQueue>,
    request_queue: String,
    response_queue: String,
    registry: Arc<BotRegistry>,
}

impl BotWorker {
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        request_queue: impl Into<String>,
        response_queue: impl Into<String>,
        registry: BotRegistry,
    ) -> Self {
        Self {
            queue,
            request_queue: request_queue.into(),
            response_queue: response_queue.into(),
            registry: Arc::new(registry),
        }
    }

    pub async fn run(self, token: CancellationToken) -> Result<(), QueueError> {
        self.queue.declare(&self.request_queue).await?;
        self.queue.declare(&self.response_queue).await?;
        let mut deliveries = self.queue.consume(&self.request_queue).await?;
        info!(queue = %self.request_queue, "bot worker waiting for commands");

        loop {
            let body = tokio::select! {
                () = token.cancelled() => break,
                body = deliveries.recv() => match body {
                    Some(body) => body,
                    None => break,
                },
            };

            let request: BotCommandPayload = match serde_json::from_slice(&body) {
                Ok(request) => request,
                Err(err) => {
                    warn!(%err, "unable to decode bot command");
                    continue;
                }
            };

            let queue = self.queue.clone();
            let registry = self.registry.clone();
            let response_queue = self.response_queue.clone();
            tokio::spawn(async move {
                let reply = registry.respond(&request).await;
                if let Err(err) = publish_reply(queue.as_ref(), &response_queue, &reply).await {
                    error!(%err, command = %request.command, "unable to publish bot reply");
                }
            });
        }

        info!("bot worker stopped");
        Ok(())
    }
}

async fn publish_reply(
    queue: &dyn MessageQueue,
    response_queue: &str,
    reply: &MessagePayload,
) -> Result<(), QueueError> {
    let body = serde_json::to_vec(reply)?;
    queue.publish(response_queue, body).await
}
