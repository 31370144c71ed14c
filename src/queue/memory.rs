use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use super::{Deliveries, MessageQueue, QueueError};

const DEFAULT_CAPACITY: usize = 1024;

struct Slot {
    tx: mpsc::Sender<Vec<u8>>,
    rx: Option<mpsc::Receiver<Vec<u8>>>,
}

/// In-process broker. Bodies published before the consumer attaches are
/// buffered up to the queue capacity.
pub struct MemoryQueue {
    capacity: usize,
    queues: Mutex<HashMap<String, Slot>>,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl MemoryQueue {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            queues: Mutex::new(HashMap::new()),
        }
    }

    fn sender(&self, name: &str) -> Result<mpsc::Sender<Vec<u8>>, QueueError> {
        let queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        queues
            .get(name)
            .map(|slot| slot.tx.clone())
            .ok_or_else(|| QueueError::UnknownQueue(name.to_owned()))
    }
}

#[async_trait]
impl MessageQueue for MemoryQueue {
    async fn declare(&self, name: &str) -> Result<(), QueueError> {
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        queues.entry(name.to_owned()).or_insert_with(|| {
            debug!(queue = name, "declared queue");
            let (tx, rx) = mpsc::channel(self.capacity);
            Slot { tx, rx: Some(rx) }
        });
        Ok(())
    }

    async fn publish(&self, name: &str, body: Vec<u8>) -> Result<(), QueueError> {
        self.sender(name)?.try_send(body).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => QueueError::Full(name.to_owned()),
            mpsc::error::TrySendError::Closed(_) => QueueError::Closed(name.to_owned()),
        })
    }

    async fn consume(&self, name: &str) -> Result<Deliveries, QueueError> {
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = queues
            .get_mut(name)
            .ok_or_else(|| QueueError::UnknownQueue(name.to_owned()))?;
        slot.rx
            .take()
            .ok_or_else(|| QueueError::AlreadyConsumed(name.to_owned()))
    }
}
