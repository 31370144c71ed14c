//! Named, durable-style work queues between the chat server and bot workers.

mod bridge;
mod memory;
mod worker;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

pub use bridge::QueueBridge;
pub use memory::MemoryQueue;
pub use worker::BotWorker;

/// Message bodies delivered to a consumer, in publish order.
pub type Deliveries = mpsc::Receiver<Vec<u8>>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue {0:?} has not been declared")]
    UnknownQueue(String),
    #[error("queue {0:?} already has a consumer")]
    AlreadyConsumed(String),
    #[error("queue {0:?} is full")]
    Full(String),
    #[error("queue {0:?} is closed")]
    Closed(String),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Creates the queue if it does not exist yet.
    async fn declare(&self, name: &str) -> Result<(), QueueError>;

    async fn publish(&self, name: &str, body: Vec<u8>) -> Result<(), QueueError>;

    /// Each queue supports a single consumer.
    async fn consume(&self, name: &str) -> Result<Deliveries, QueueError>;
}
