//! Shared helpers for the integration tests.
#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet},
    net::SocketAddr,
    sync::Arc,
    time::Duration,
};

use axum::{
    Router,
    extract::{
        Query, State,
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
};
use chatlink_session::{
    BackoffPolicy, ChatClient, ConnectionState, MemoryConnector, MessageEvent, SessionConfig,
    StaticIdentity, UserId,
    infrastructure::{
        dto::{ClientEvent, ServerEvent},
        transport::ServerPeer,
    },
};
use tokio::{net::TcpListener, sync::broadcast, sync::mpsc};

/// Upper bound for anything a test waits on over real sockets
pub const WAIT: Duration = Duration::from_secs(5);

pub fn user(id: &str) -> UserId {
    UserId::new(id).unwrap()
}

/// Default config without jitter, so backoff delays are exact
pub fn config() -> SessionConfig {
    SessionConfig::default().with_backoff(BackoffPolicy::default().with_jitter(0.0))
}

/// A client for `id` wired to an in-memory server
pub fn memory_client(id: &str, config: SessionConfig) -> (ChatClient, ServerPeer) {
    let (connector, server) = MemoryConnector::new();
    let client = ChatClient::new(
        Arc::new(connector),
        Arc::new(StaticIdentity::new(user(id))),
        config,
    );
    (client, server)
}

/// Wait until the client reaches `state`
pub async fn wait_for_state(client: &ChatClient, state: ConnectionState) {
    let mut rx = client.subscribe_state();
    rx.wait_for(|current| *current == state).await.unwrap();
}

/// Next timeline event, skipping nothing
pub async fn next_message_event(rx: &mut broadcast::Receiver<MessageEvent>) -> MessageEvent {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for a message event")
        .unwrap()
}

/// One accepted WebSocket link on the fixture server
pub struct FixtureLink {
    /// Identity from the `x-user-id` upgrade header
    pub header_user: Option<String>,
    /// Identity from the `user_id` query parameter
    pub query_user: Option<String>,
    socket: WebSocket,
}

impl FixtureLink {
    /// Next client event, or `None` once the client closed the link
    pub async fn recv_event(&mut self) -> Option<ClientEvent> {
        loop {
            let message = tokio::time::timeout(WAIT, self.socket.recv())
                .await
                .expect("timed out waiting for a client frame")?
                .ok()?;
            match message {
                WsMessage::Text(text) => return serde_json::from_str(text.as_str()).ok(),
                WsMessage::Close(_) => return None,
                _ => {}
            }
        }
    }

    pub async fn send_event(&mut self, event: &ServerEvent) {
        let frame = event.encode().unwrap();
        self.socket.send(WsMessage::Text(frame.into())).await.unwrap();
    }

    /// Close the link from the server side
    pub async fn close(mut self) {
        let _ = self.socket.send(WsMessage::Close(None)).await;
    }
}

#[derive(Clone)]
struct FixtureState {
    rejected: Arc<HashSet<String>>,
    accepted: mpsc::UnboundedSender<FixtureLink>,
}

/// Axum WebSocket server speaking the chat wire format, driven by the test
pub struct TestServer {
    addr: SocketAddr,
    accepted: mpsc::UnboundedReceiver<FixtureLink>,
}

impl TestServer {
    /// Start on an ephemeral port; upgrades from `rejected` users get 401
    pub async fn start(rejected: &[&str]) -> Self {
        let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
        let state = FixtureState {
            rejected: Arc::new(rejected.iter().map(|s| s.to_string()).collect()),
            accepted: accepted_tx,
        };
        let app = Router::new()
            .route("/ws", get(ws_handler))
            .with_state(state);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self {
            addr,
            accepted: accepted_rx,
        }
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Wait for the next upgraded link
    pub async fn accept(&mut self) -> FixtureLink {
        tokio::time::timeout(WAIT, self.accepted.recv())
            .await
            .expect("timed out waiting for a link")
            .unwrap()
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<FixtureState>,
) -> Response {
    let header_user = headers
        .get("x-user-id")
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);
    if header_user
        .as_ref()
        .is_some_and(|user| state.rejected.contains(user))
    {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let query_user = params.get("user_id").cloned();
    ws.on_upgrade(move |socket| async move {
        let _ = state.accepted.send(FixtureLink {
            header_user,
            query_user,
            socket,
        });
    })
}
