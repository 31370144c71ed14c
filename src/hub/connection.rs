//! One websocket peer: a read pump feeding the hub and a write pump draining
//! the connection's send queue.

use std::{
    fmt::Display,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use axum::{
    body::Bytes,
    extract::ws::{CloseFrame, Message, WebSocket, close_code},
};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use thiserror::Error;
use tokio::{
    sync::mpsc,
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span, warn};

use crate::{
    bots::BotDispatcher,
    config::ClientConfig,
    payload::{MessageKind, MessagePayload, RoomId, now_rfc2822},
};

use super::{ConnectionId, HubError, HubHandle, Subscription};

#[derive(Debug, Error)]
enum WriteError {
    #[error("write timed out after {0:?}")]
    Timeout(Duration),
    #[error("{0}")]
    Socket(String),
}

pub struct Connection {
    id: ConnectionId,
    room_id: RoomId,
    username: String,
    hub: HubHandle,
    bots: BotDispatcher,
    config: Arc<ClientConfig>,
    token: CancellationToken,
    closed: AtomicBool,
}

impl Connection {
    pub fn new(
        room_id: RoomId,
        username: impl Into<String>,
        hub: HubHandle,
        bots: BotDispatcher,
        config: Arc<ClientConfig>,
    ) -> Self {
        let token = hub.token().child_token();
        Self {
            id: ConnectionId::new(),
            room_id,
            username: username.into(),
            hub,
            bots,
            config,
            token,
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub async fn start(self, socket: WebSocket) -> Result<(), HubError> {
        let (sink, stream) = socket.split();
        self.serve(sink, stream).await
    }

    /// Registers with the hub, then spawns both pumps. Nothing is spawned if
    /// the hub is gone.
    pub async fn serve<W, R, E>(self, sink: W, stream: R) -> Result<(), HubError>
    where
        W: Sink<Message> + Unpin + Send + 'static,
        W::Error: Display + Send,
        R: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
        E: Display + Send + 'static,
    {
        let (subscription, queue) =
            Subscription::new(self.id, self.room_id, self.config.send_queue_size);
        self.hub.register(subscription).await?;

        let span = info_span!(
            "connection",
            conn_id = %self.id,
            room_id = self.room_id,
            username = %self.username,
        );
        let connection = Arc::new(self);
        tokio::spawn(
            connection
                .clone()
                .write_pump(sink, queue)
                .instrument(span.clone()),
        );
        tokio::spawn(connection.read_pump(stream).instrument(span));
        Ok(())
    }

    async fn read_pump<R, E>(self: Arc<Self>, mut stream: R)
    where
        R: Stream<Item = Result<Message, E>> + Unpin,
        E: Display,
    {
        let mut deadline = Instant::now() + self.config.pong_wait;

        loop {
            let next = tokio::select! {
                () = self.token.cancelled() => break,
                next = tokio::time::timeout_at(deadline, stream.next()) => next,
            };

            let message = match next {
                Err(_) => {
                    debug!("read deadline passed without a pong");
                    break;
                }
                Ok(None) => break,
                Ok(Some(Err(err))) => {
                    warn!(%err, "unexpected websocket error");
                    break;
                }
                Ok(Some(Ok(message))) => message,
            };

            let decoded = match message {
                Message::Text(text) => serde_json::from_str::<MessagePayload>(text.as_str()),
                Message::Binary(bytes) => serde_json::from_slice(&bytes),
                Message::Pong(_) => {
                    deadline = Instant::now() + self.config.pong_wait;
                    continue;
                }
                Message::Ping(_) => continue,
                Message::Close(frame) => {
                    log_close(frame.as_ref());
                    break;
                }
            };

            let payload = match decoded {
                Ok(payload) => payload,
                Err(err) => {
                    warn!(%err, "malformed frame, closing connection");
                    break;
                }
            };

            if let Err(err) = self.handle_message(payload).await {
                debug!(%err, "dropping message");
                break;
            }
        }

        self.disconnect().await;
    }

    /// Room, author and kind always come from the connection, never the peer.
    async fn handle_message(&self, mut payload: MessagePayload) -> Result<(), HubError> {
        payload.kind = MessageKind::User;
        payload.room_id = Some(self.room_id);
        payload.username = Some(self.username.clone());
        payload.created = now_rfc2822();

        let text = payload.message.clone();
        self.hub.broadcast(payload).await?;
        self.bots.dispatch(&self.hub, self.room_id, &text).await?;
        Ok(())
    }

    async fn disconnect(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(err) = self.hub.deregister(self.id, self.room_id).await {
            debug!(%err, "hub gone before deregistration");
        }
        self.token.cancel();
        debug!("disconnecting client");
    }

    async fn write_pump<W>(self: Arc<Self>, mut sink: W, mut queue: mpsc::Receiver<MessagePayload>)
    where
        W: Sink<Message> + Unpin,
        W::Error: Display,
    {
        let ping_period = self.config.ping_period;
        let mut ticker = tokio::time::interval_at(Instant::now() + ping_period, ping_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let frame = tokio::select! {
                biased;
                message = queue.recv() => match message {
                    Some(message) => match serde_json::to_string(&message) {
                        Ok(json) => Message::Text(json.into()),
                        Err(err) => {
                            warn!(%err, "unable to encode message");
                            continue;
                        }
                    },
                    None => {
                        // the hub closed the queue
                        if let Err(err) = self.write(&mut sink, Message::Close(None)).await {
                            debug!(%err, "unable to send close frame");
                        }
                        break;
                    }
                },
                _ = ticker.tick() => Message::Ping(Bytes::new()),
            };

            if let Err(err) = self.write(&mut sink, frame).await {
                warn!(%err, "error sending message");
                break;
            }
        }

        let _ = tokio::time::timeout(self.config.write_wait, sink.close()).await;
        // wakes the read pump when the write side failed first
        self.token.cancel();
    }

    async fn write<W>(&self, sink: &mut W, frame: Message) -> Result<(), WriteError>
    where
        W: Sink<Message> + Unpin,
        W::Error: Display,
    {
        match tokio::time::timeout(self.config.write_wait, sink.send(frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(WriteError::Socket(err.to_string())),
            Err(_) => Err(WriteError::Timeout(self.config.write_wait)),
        }
    }
}

fn log_close(frame: Option<&CloseFrame>) {
    match frame {
        Some(frame) if frame.code != close_code::NORMAL && frame.code != close_code::AWAY => {
            warn!(code = frame.code, reason = frame.reason.as_str(), "unexpected close");
        }
        _ => debug!("peer closed the connection"),
    }
}
