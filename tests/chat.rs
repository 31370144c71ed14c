use std::{net::SocketAddr, sync::Arc, time::Duration};

use async_trait::async_trait;
use chatroom::{
    AppState,
    auth::AuthState,
    bots::{Bot, BotCommandParser, BotDispatcher, BotError, BotRegistry, NOT_CONFIGURED},
    config::ClientConfig,
    hub::{Hub, HubHandle},
    payload::{MessageKind, MessagePayload, MessagesPayload, RoomId, RoomPayload, RoomsPayload},
    queue::{BotWorker, MemoryQueue, MessageQueue, QueueBridge},
    store::ChatStore,
};
use futures_util::{SinkExt, StreamExt};
use reqwest::StatusCode;
use serde_json::{Value, json};
use tokio::{net::TcpStream, time::timeout};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{self, Message},
};
use tokio_util::sync::CancellationToken;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Shout;

#[async_trait]
impl Bot for Shout {
    fn command(&self) -> &str {
        "shout"
    }

    async fn process_command(&self, argument: &str) -> Result<String, BotError> {
        if argument.is_empty() {
            return Err(BotError::new("[Shout Bot] give me something to shout"));
        }
        Ok(argument.to_uppercase())
    }
}

struct TestServer {
    addr: SocketAddr,
    hub: HubHandle,
    http: reqwest::Client,
    token: CancellationToken,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

impl TestServer {
    async fn start(with_bots: bool) -> Self {
        let token = CancellationToken::new();
        let (hub, hub_handle) = Hub::new(token.clone());
        tokio::spawn(hub.run());

        let bridge = if with_bots {
            let queue: Arc<dyn MessageQueue> = Arc::new(MemoryQueue::default());
            let bridge = QueueBridge::new(queue.clone(), "requests", "responses")
                .await
                .unwrap();
            let worker = BotWorker::new(
                queue,
                "requests",
                "responses",
                BotRegistry::default().with(Shout),
            );
            tokio::spawn(worker.run(token.clone()));
            tokio::spawn(bridge.clone().run(hub_handle.clone(), token.clone()));
            Some(bridge)
        } else {
            None
        };

        let state = AppState {
            store: ChatStore::in_memory().await.unwrap(),
            auth: AuthState::new("test-secret", Duration::from_secs(3600)).with_bcrypt_cost(4),
            hub: hub_handle.clone(),
            bots: BotDispatcher::new(BotCommandParser::default(), bridge),
            client_config: Arc::new(ClientConfig::default()),
            history_limit: 50,
        };

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = token.clone();
        tokio::spawn(async move {
            axum::serve(listener, chatroom::app(state))
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
                .unwrap();
        });

        Self {
            addr,
            hub: hub_handle,
            http: reqwest::Client::new(),
            token,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    async fn sign_up(&self, username: &str) -> String {
        let response = self
            .http
            .post(self.url("/register"))
            .json(&json!({
                "username": username,
                "email": format!("{username}@example.com"),
                "password": "hunter2",
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = self
            .http
            .post(self.url("/login"))
            .json(&json!({ "username": username, "password": "hunter2" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body: Value = response.json().await.unwrap();
        body["token"].as_str().unwrap().to_owned()
    }

    async fn create_room(&self, token: &str, name: &str) -> RoomId {
        let response = self
            .http
            .post(self.url("/api/rooms"))
            .bearer_auth(token)
            .json(&json!({ "name": name }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        response.json::<RoomPayload>().await.unwrap().id
    }

    async fn join(&self, token: &str, room: &str) -> Result<Socket, tungstenite::Error> {
        let url = format!("ws://{}/api/ws/{room}?bearer={token}", self.addr);
        connect_async(url).await.map(|(socket, _)| socket)
    }

    async fn wait_for_clients(&self, room_id: RoomId, expected: usize) {
        for _ in 0..200 {
            if self.hub.client_count(room_id).await.unwrap() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("room {room_id} never reached {expected} clients");
    }
}

async fn say(socket: &mut Socket, text: &str) {
    let frame = json!({ "message": text }).to_string();
    socket.send(Message::text(frame)).await.unwrap();
}

async fn next_payload(socket: &mut Socket) -> MessagePayload {
    loop {
        let frame = timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("timed out waiting for a message")
            .expect("socket closed")
            .unwrap();
        match frame {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame {other:?}"),
        }
    }
}

#[tokio::test]
async fn two_clients_share_a_room() {
    let server = TestServer::start(false).await;
    let alice = server.sign_up("alice").await;
    let bob = server.sign_up("bob").await;
    let main = server.create_room(&alice, "main").await;

    let mut a = server.join(&alice, &main.to_string()).await.unwrap();
    let mut b = server.join(&bob, &main.to_string()).await.unwrap();
    server.wait_for_clients(main, 2).await;

    say(&mut a, "hello").await;
    for socket in [&mut a, &mut b] {
        let payload = next_payload(socket).await;
        assert_eq!(payload.message, "hello");
        assert_eq!(payload.username.as_deref(), Some("alice"));
        assert_eq!(payload.room_id, Some(main));
        assert_eq!(payload.kind, MessageKind::User);
    }

    say(&mut b, "/stock=FB").await;
    for socket in [&mut a, &mut b] {
        let echo = next_payload(socket).await;
        assert_eq!(echo.message, "/stock=FB");
        assert_eq!(echo.username.as_deref(), Some("bob"));

        let notice = next_payload(socket).await;
        assert_eq!(notice, MessagePayload::error(main, NOT_CONFIGURED));
    }
}

#[tokio::test]
async fn rooms_are_isolated() {
    let server = TestServer::start(false).await;
    let alice = server.sign_up("alice").await;
    let main = server.create_room(&alice, "main").await;
    let side = server.create_room(&alice, "side").await;

    let mut a = server.join(&alice, &main.to_string()).await.unwrap();
    let mut b = server.join(&alice, &side.to_string()).await.unwrap();
    server.wait_for_clients(main, 1).await;
    server.wait_for_clients(side, 1).await;

    say(&mut a, "only main").await;
    say(&mut b, "only side").await;

    assert_eq!(next_payload(&mut a).await.message, "only main");
    assert_eq!(next_payload(&mut b).await.message, "only side");
}

#[tokio::test]
async fn bot_replies_reach_the_room() {
    let server = TestServer::start(true).await;
    let alice = server.sign_up("alice").await;
    let bob = server.sign_up("bob").await;
    let main = server.create_room(&alice, "main").await;

    let mut a = server.join(&alice, &main.to_string()).await.unwrap();
    let mut b = server.join(&bob, &main.to_string()).await.unwrap();
    server.wait_for_clients(main, 2).await;

    say(&mut a, "/shout=hey").await;
    for socket in [&mut a, &mut b] {
        assert_eq!(next_payload(socket).await.message, "/shout=hey");
        assert_eq!(
            next_payload(socket).await,
            MessagePayload::bot_response(main, "HEY")
        );
    }

    say(&mut a, "/shout").await;
    assert_eq!(next_payload(&mut a).await.message, "/shout");
    let failure = next_payload(&mut a).await;
    assert_eq!(failure.kind, MessageKind::Error);
    assert_eq!(failure.message, "[Shout Bot] give me something to shout");

    say(&mut a, "/weather=Quito").await;
    assert_eq!(next_payload(&mut a).await.message, "/weather=Quito");
    assert_eq!(
        next_payload(&mut a).await,
        MessagePayload::error(main, "weather is not a recognized bot command")
    );
}

#[tokio::test]
async fn close_frame_leaves_the_room() {
    let server = TestServer::start(false).await;
    let alice = server.sign_up("alice").await;
    let main = server.create_room(&alice, "main").await;

    let mut a = server.join(&alice, &main.to_string()).await.unwrap();
    let _b = server.join(&alice, &main.to_string()).await.unwrap();
    server.wait_for_clients(main, 2).await;

    a.close(None).await.unwrap();
    server.wait_for_clients(main, 1).await;
}

#[tokio::test]
async fn malformed_frame_drops_the_connection() {
    let server = TestServer::start(false).await;
    let alice = server.sign_up("alice").await;
    let main = server.create_room(&alice, "main").await;

    let mut a = server.join(&alice, &main.to_string()).await.unwrap();
    server.wait_for_clients(main, 1).await;

    a.send(Message::text("{not json")).await.unwrap();
    server.wait_for_clients(main, 0).await;
}

#[tokio::test]
async fn oversized_frame_drops_the_connection() {
    let server = TestServer::start(false).await;
    let alice = server.sign_up("alice").await;
    let main = server.create_room(&alice, "main").await;

    let mut a = server.join(&alice, &main.to_string()).await.unwrap();
    let mut b = server.join(&alice, &main.to_string()).await.unwrap();
    server.wait_for_clients(main, 2).await;

    let limit = ClientConfig::default().max_message_size;
    let text = "x".repeat(limit + 1);
    a.send(Message::text(json!({ "message": text }).to_string()))
        .await
        .unwrap();
    server.wait_for_clients(main, 1).await;

    say(&mut b, "still here").await;
    assert_eq!(next_payload(&mut b).await.message, "still here");
}

#[tokio::test]
async fn upgrade_is_rejected_for_bad_rooms_and_strangers() {
    let server = TestServer::start(false).await;
    let alice = server.sign_up("alice").await;
    let main = server.create_room(&alice, "main").await;

    let status = |result: Result<Socket, tungstenite::Error>| match result {
        Err(tungstenite::Error::Http(response)) => response.status().as_u16(),
        Err(err) => panic!("unexpected error {err}"),
        Ok(_) => panic!("upgrade should have failed"),
    };

    assert_eq!(status(server.join(&alice, "abc").await), 400);
    assert_eq!(status(server.join(&alice, &(main + 41).to_string()).await), 404);
    assert_eq!(status(server.join("not-a-token", &main.to_string()).await), 403);

    let url = format!("ws://{}/api/ws/{main}", server.addr);
    assert_eq!(status(connect_async(url).await.map(|(socket, _)| socket)), 401);
}

#[tokio::test]
async fn http_messages_are_stored_and_broadcast() {
    let server = TestServer::start(false).await;
    let alice = server.sign_up("alice").await;
    let main = server.create_room(&alice, "main").await;

    let mut a = server.join(&alice, &main.to_string()).await.unwrap();
    server.wait_for_clients(main, 1).await;

    let response = server
        .http
        .post(server.url(&format!("/api/rooms/{main}/messages")))
        .bearer_auth(&alice)
        .json(&json!({ "message": "from http" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let live = next_payload(&mut a).await;
    assert_eq!(live.message, "from http");
    assert_eq!(live.username.as_deref(), Some("alice"));

    let history: MessagesPayload = server
        .http
        .get(server.url(&format!("/api/rooms/{main}/messages")))
        .bearer_auth(&alice)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(history.size, 1);
    assert_eq!(history.messages[0], live);
}

#[tokio::test]
async fn rooms_api() {
    let server = TestServer::start(false).await;

    let response = server.http.get(server.url("/api/rooms")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let alice = server.sign_up("alice").await;
    server.create_room(&alice, "main").await;
    server.create_room(&alice, "random").await;

    let rooms: RoomsPayload = server
        .http
        .get(server.url("/api/rooms"))
        .bearer_auth(&alice)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(rooms.size, 2);
    assert_eq!(rooms.rooms[1].name, "random");

    let response = server
        .http
        .post(server.url("/api/rooms"))
        .bearer_auth(&alice)
        .json(&json!({ "name": "" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn account_errors() {
    let server = TestServer::start(false).await;
    server.sign_up("alice").await;

    let duplicate = server
        .http
        .post(server.url("/register"))
        .json(&json!({ "username": "alice", "email": "x@example.com", "password": "pw" }))
        .send()
        .await
        .unwrap();
    assert_eq!(duplicate.status(), StatusCode::CONFLICT);

    let wrong_password = server
        .http
        .post(server.url("/login"))
        .json(&json!({ "username": "alice", "password": "nope" }))
        .send()
        .await
        .unwrap();
    assert_eq!(wrong_password.status(), StatusCode::UNAUTHORIZED);

    let unknown = server
        .http
        .post(server.url("/login"))
        .json(&json!({ "username": "zed", "password": "nope" }))
        .send()
        .await
        .unwrap();
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
}
