//! Room registry for live websocket connections.
//!
//! The [`Hub`] owns every room's member set and is the only thing that ever
//! mutates it. Everything else talks to it through a cloneable [`HubHandle`],
//! whose register/deregister/broadcast calls land on dedicated channels that
//! the hub drains from a single loop (see [`Hub::run`]).

pub mod connection;

use std::{collections::HashMap, fmt};

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::payload::{MessagePayload, RoomId};

pub use connection::Connection;

const HUB_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HubError {
    #[error("hub is not running")]
    Stopped,
}

/// In-memory identity of one live connection. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.simple(), f)
    }
}

/// A connection's membership in one room, carrying the sending half of the
/// connection's outbound queue. Once registered the hub holds the only sender,
/// so removing the subscription is what closes the queue.
#[derive(Debug)]
pub struct Subscription {
    pub conn_id: ConnectionId,
    pub room_id: RoomId,
    sender: mpsc::Sender<MessagePayload>,
}

impl Subscription {
    /// Builds a subscription plus the receiving end the write pump drains.
    pub fn new(
        conn_id: ConnectionId,
        room_id: RoomId,
        queue_size: usize,
    ) -> (Self, mpsc::Receiver<MessagePayload>) {
        let (sender, receiver) = mpsc::channel(queue_size.max(1));
        (
            Self {
                conn_id,
                room_id,
                sender,
            },
            receiver,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Unsubscribe {
    conn_id: ConnectionId,
    room_id: RoomId,
}

#[derive(Debug)]
enum Query {
    ClientCount {
        room_id: RoomId,
        res_tx: oneshot::Sender<usize>,
    },
    Rooms {
        res_tx: oneshot::Sender<Vec<RoomId>>,
    },
}

/// The coordination loop. Create with [`Hub::new`], then spawn [`Hub::run`].
#[derive(Debug)]
pub struct Hub {
    rooms: HashMap<RoomId, HashMap<ConnectionId, mpsc::Sender<MessagePayload>>>,
    register_rx: mpsc::Receiver<Subscription>,
    deregister_rx: mpsc::Receiver<Unsubscribe>,
    broadcast_rx: mpsc::Receiver<MessagePayload>,
    query_rx: mpsc::Receiver<Query>,
    token: CancellationToken,
}

impl Hub {
    pub fn new(token: CancellationToken) -> (Self, HubHandle) {
        let (register_tx, register_rx) = mpsc::channel(HUB_CHANNEL_CAPACITY);
        let (deregister_tx, deregister_rx) = mpsc::channel(HUB_CHANNEL_CAPACITY);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(HUB_CHANNEL_CAPACITY);
        let (query_tx, query_rx) = mpsc::channel(HUB_CHANNEL_CAPACITY);

        let handle = HubHandle {
            register_tx,
            deregister_tx,
            broadcast_tx,
            query_tx,
            token: token.clone(),
        };

        (
            Self {
                rooms: HashMap::new(),
                register_rx,
                deregister_rx,
                broadcast_rx,
                query_rx,
                token,
            },
            handle,
        )
    }

    fn register_client(&mut self, subscription: Subscription) {
        let Subscription {
            conn_id,
            room_id,
            sender,
        } = subscription;
        debug!(%conn_id, room_id, "registering client");
        self.rooms
            .entry(room_id)
            .or_default()
            .insert(conn_id, sender);
    }

    /// Returns whether the connection was a member. Dropping the stored sender
    /// closes the connection's queue.
    fn deregister_client(&mut self, conn_id: ConnectionId, room_id: RoomId) -> bool {
        let Some(members) = self.rooms.get_mut(&room_id) else {
            return false;
        };
        if members.remove(&conn_id).is_none() {
            return false;
        }
        debug!(%conn_id, room_id, "deregistered client");

        if members.is_empty() {
            self.rooms.remove(&room_id);
            debug!(room_id, "removed empty room");
        }
        true
    }

    /// Best-effort fan-out. A member whose queue is full or closed is treated
    /// as dead and deregistered on the spot.
    fn broadcast_to_clients(&mut self, message: MessagePayload) {
        let Some(room_id) = message.room_id else {
            warn!(message = %message.message, "dropping broadcast without a room id");
            return;
        };
        let Some(members) = self.rooms.get(&room_id) else {
            trace!(room_id, "no clients to broadcast to");
            return;
        };

        let dead: Vec<ConnectionId> = members
            .iter()
            .filter_map(|(conn_id, sender)| match sender.try_send(message.clone()) {
                Ok(()) => None,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(%conn_id, room_id, "send queue is full, dropping client");
                    Some(*conn_id)
                }
                Err(mpsc::error::TrySendError::Closed(_)) => Some(*conn_id),
            })
            .collect();

        for conn_id in dead {
            self.deregister_client(conn_id, room_id);
        }
    }

    fn answer(&self, query: Query) {
        match query {
            Query::ClientCount { room_id, res_tx } => {
                let _ = res_tx.send(self.rooms.get(&room_id).map_or(0, HashMap::len));
            }
            Query::Rooms { res_tx } => {
                let _ = res_tx.send(self.rooms.keys().copied().collect());
            }
        }
    }

    /// Drains the hub's channels until cancelled. Membership changes are
    /// preferred over broadcasts, and broadcasts over queries, whenever
    /// several are ready at once.
    pub async fn run(mut self) {
        info!("hub started");
        loop {
            tokio::select! {
                biased;
                () = self.token.cancelled() => {
                    debug!("hub was cancelled");
                    break;
                }
                Some(subscription) = self.register_rx.recv() => self.register_client(subscription),
                Some(Unsubscribe { conn_id, room_id }) = self.deregister_rx.recv() => {
                    self.deregister_client(conn_id, room_id);
                }
                Some(message) = self.broadcast_rx.recv() => self.broadcast_to_clients(message),
                Some(query) = self.query_rx.recv() => self.answer(query),
                else => break,
            }
        }

        self.register_rx.close();
        self.deregister_rx.close();
        self.broadcast_rx.close();
        self.query_rx.close();
        // closes every send queue, so each write pump says goodbye to its peer
        self.rooms.clear();
        info!("hub stopped");
    }
}

/// Cheap, cloneable access to a running [`Hub`].
#[derive(Debug, Clone)]
pub struct HubHandle {
    register_tx: mpsc::Sender<Subscription>,
    deregister_tx: mpsc::Sender<Unsubscribe>,
    broadcast_tx: mpsc::Sender<MessagePayload>,
    query_tx: mpsc::Sender<Query>,
    token: CancellationToken,
}

impl HubHandle {
    pub async fn register(&self, subscription: Subscription) -> Result<(), HubError> {
        self.register_tx
            .send(subscription)
            .await
            .map_err(|_| HubError::Stopped)
    }

    /// Deregistering a connection that is not a member is a no-op.
    pub async fn deregister(&self, conn_id: ConnectionId, room_id: RoomId) -> Result<(), HubError> {
        self.deregister_tx
            .send(Unsubscribe { conn_id, room_id })
            .await
            .map_err(|_| HubError::Stopped)
    }

    pub async fn broadcast(&self, message: MessagePayload) -> Result<(), HubError> {
        self.broadcast_tx
            .send(message)
            .await
            .map_err(|_| HubError::Stopped)
    }

    /// Number of connections in the room at the moment the hub answers.
    /// In-flight registrations from other tasks may or may not be counted.
    pub async fn client_count(&self, room_id: RoomId) -> Result<usize, HubError> {
        let (res_tx, res_rx) = oneshot::channel();
        self.query_tx
            .send(Query::ClientCount { room_id, res_tx })
            .await
            .map_err(|_| HubError::Stopped)?;
        res_rx.await.map_err(|_| HubError::Stopped)
    }

    /// Rooms that currently have at least one member.
    pub async fn rooms(&self) -> Result<Vec<RoomId>, HubError> {
        let (res_tx, res_rx) = oneshot::channel();
        self.query_tx
            .send(Query::Rooms { res_tx })
            .await
            .map_err(|_| HubError::Stopped)?;
        res_rx.await.map_err(|_| HubError::Stopped)
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn shutdown(&self) {
        self.token.cancel();
    }
}
