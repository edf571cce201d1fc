//! Chat socket tests against an in-process WebSocket server
//!
//! The server records every handshake URI and text frame so tests can assert
//! on ordering across connections.

use challenge_client::realtime::{ChatConfig, ChatSocket, ConnectionState};
use challenge_client::session::{MemoryTokenStore, TokenStore};
use challenge_client::{ApiClient, ClientConfig};
use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ROOM: &str = "room-1";
const UNAUTHORIZED: &str = r#"{"type":"unauthorized"}"#;

// ============================================================================
// Test server
// ============================================================================

#[derive(Debug, PartialEq, Eq)]
enum ServerEvent {
    Connected { conn: usize, uri: String },
    Frame { conn: usize, text: String },
    Disconnected { conn: usize },
}

struct ChatServer {
    chat_url: Url,
    events: mpsc::UnboundedReceiver<ServerEvent>,
}

impl ChatServer {
    /// Start a server that answers the first frame of the first
    /// `unauthorized_connections` connections with an unauthorized signal
    async fn start(unauthorized_connections: usize) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, events) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut conn = 0usize;
            while let Ok((tcp, _)) = listener.accept().await {
                let tx = tx.clone();
                let reject = conn < unauthorized_connections;
                let id = conn;
                conn += 1;

                tokio::spawn(async move {
                    let mut uri = String::new();
                    let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                        uri = req.uri().to_string();
                        Ok(resp)
                    };
                    let Ok(ws) = tokio_tungstenite::accept_hdr_async(tcp, callback).await else {
                        return;
                    };
                    let _ = tx.send(ServerEvent::Connected { conn: id, uri });

                    let (mut write, mut read) = ws.split();
                    let mut first = true;
                    while let Some(Ok(message)) = read.next().await {
                        match message {
                            Message::Text(text) => {
                                let _ = tx.send(ServerEvent::Frame { conn: id, text });
                                if first && reject {
                                    let _ = write.send(Message::Text(UNAUTHORIZED.to_string())).await;
                                }
                                first = false;
                            }
                            Message::Close(_) => break,
                            _ => {}
                        }
                    }
                    let _ = tx.send(ServerEvent::Disconnected { conn: id });
                });
            }
        });

        Self {
            chat_url: Url::parse(&format!("ws://{}/ws/chat", addr)).unwrap(),
            events,
        }
    }

    async fn next(&mut self) -> ServerEvent {
        tokio::time::timeout(Duration::from_secs(5), self.events.recv())
            .await
            .expect("timed out waiting for server event")
            .expect("server stopped")
    }

    async fn expect_frame(&mut self, conn: usize) -> String {
        match self.next().await {
            ServerEvent::Frame { conn: got, text } if got == conn => text,
            other => panic!("expected frame on connection {conn}, got {other:?}"),
        }
    }
}

async fn session_client(refresh: &MockServer, chat_url: &Url, token: &str) -> ApiClient {
    let mut config = ClientConfig::for_server(&refresh.uri()).unwrap();
    config.chat_url = chat_url.clone();
    let store: Arc<dyn TokenStore> = Arc::new(MemoryTokenStore::with_access_token(token));
    ApiClient::connect(config, store).unwrap()
}

fn enter_frame() -> String {
    format!(r#"{{"type":"enter","roomId":"{}"}}"#, ROOM)
}

async fn wait_for_state(socket: &ChatSocket, wanted: ConnectionState) {
    let mut states = socket.state_changes();
    tokio::time::timeout(Duration::from_secs(5), states.wait_for(|s| *s == wanted))
        .await
        .expect("timed out waiting for state")
        .unwrap();
}

// ============================================================================
// Ordering
// ============================================================================

#[tokio::test]
async fn test_messages_sent_while_connecting_follow_enter_in_order() {
    let refresh = MockServer::start().await;
    let mut server = ChatServer::start(0).await;
    let client = session_client(&refresh, &server.chat_url, "T1").await;

    let (socket, _inbound) = ChatSocket::connect(
        ChatConfig::from_client_config(client.config(), ROOM),
        Arc::clone(client.session()),
    );
    assert_eq!(socket.state(), ConnectionState::Connecting);
    socket.send("A");
    socket.send("B");

    match server.next().await {
        ServerEvent::Connected { conn: 0, uri } => {
            assert_eq!(uri, "/ws/chat/room-1?token=T1");
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(server.expect_frame(0).await, enter_frame());
    assert_eq!(server.expect_frame(0).await, "A");
    assert_eq!(server.expect_frame(0).await, "B");

    wait_for_state(&socket, ConnectionState::Open).await;
    socket.send("C");
    assert_eq!(server.expect_frame(0).await, "C");
}

#[tokio::test]
async fn test_close_leaves_room() {
    let refresh = MockServer::start().await;
    let mut server = ChatServer::start(0).await;
    let client = session_client(&refresh, &server.chat_url, "T1").await;

    let (socket, _inbound) = ChatSocket::connect(
        ChatConfig::from_client_config(client.config(), ROOM),
        Arc::clone(client.session()),
    );
    assert!(matches!(server.next().await, ServerEvent::Connected { conn: 0, .. }));
    assert_eq!(server.expect_frame(0).await, enter_frame());
    wait_for_state(&socket, ConnectionState::Open).await;

    let states = socket.state_changes();
    socket.shutdown().await;

    assert_eq!(
        server.expect_frame(0).await,
        format!(r#"{{"type":"leave","roomId":"{}"}}"#, ROOM)
    );
    assert_eq!(server.next().await, ServerEvent::Disconnected { conn: 0 });
    assert_eq!(*states.borrow(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_inbound_frames_are_delivered() {
    let refresh = MockServer::start().await;
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let chat_url = Url::parse(&format!("ws://{}/ws/chat", listener.local_addr().unwrap())).unwrap();

    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
        // enter
        let _ = ws.next().await;
        ws.send(Message::Text(r#"{"type":"message","text":"hi"}"#.into()))
            .await
            .unwrap();
        ws.send(Message::Binary(b"raw".to_vec())).await.unwrap();
        while ws.next().await.is_some() {}
    });

    let client = session_client(&refresh, &chat_url, "T1").await;
    let (socket, mut inbound) = ChatSocket::connect(
        ChatConfig::from_client_config(client.config(), ROOM),
        Arc::clone(client.session()),
    );

    let first = tokio::time::timeout(Duration::from_secs(5), inbound.recv()).await.unwrap();
    assert_eq!(first.as_deref(), Some(r#"{"type":"message","text":"hi"}"#));
    let second = tokio::time::timeout(Duration::from_secs(5), inbound.recv()).await.unwrap();
    assert_eq!(second.as_deref(), Some("raw"));

    socket.shutdown().await;
}

// ============================================================================
// Unauthorized recovery
// ============================================================================

#[tokio::test]
async fn test_unauthorized_refreshes_and_rejoins_with_new_token() {
    let refresh = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/users/refresh"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "accessToken": "T2" })),
        )
        .expect(1)
        .mount(&refresh)
        .await;

    let mut server = ChatServer::start(1).await;
    let client = session_client(&refresh, &server.chat_url, "T1").await;

    let (socket, _inbound) = ChatSocket::connect(
        ChatConfig::from_client_config(client.config(), ROOM),
        Arc::clone(client.session()),
    );

    match server.next().await {
        ServerEvent::Connected { conn: 0, uri } => assert!(uri.ends_with("token=T1")),
        other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(server.expect_frame(0).await, enter_frame());

    // Old connection goes away, new one carries the renewed token and
    // re-enters before anything else. The teardown of connection 0 may be
    // observed before or after connection 1 opens.
    let mut seen = Vec::new();
    loop {
        let event = server.next().await;
        let done = matches!(event, ServerEvent::Frame { conn: 1, .. });
        seen.push(event);
        if done {
            break;
        }
    }
    if !seen.contains(&ServerEvent::Disconnected { conn: 0 }) {
        assert_eq!(server.next().await, ServerEvent::Disconnected { conn: 0 });
    }
    assert!(seen.contains(&ServerEvent::Connected {
        conn: 1,
        uri: "/ws/chat/room-1?token=T2".to_string(),
    }));
    assert_eq!(
        seen.last(),
        Some(&ServerEvent::Frame {
            conn: 1,
            text: enter_frame(),
        })
    );

    wait_for_state(&socket, ConnectionState::Open).await;
    socket.send("after");
    assert_eq!(server.expect_frame(1).await, "after");
    assert_eq!(client.session().access_token().as_deref(), Some("T2"));
}

#[tokio::test]
async fn test_messages_sent_during_recovery_follow_new_enter() {
    let refresh = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/users/refresh"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "accessToken": "T2" }))
                .set_delay(Duration::from_millis(500)),
        )
        .expect(1)
        .mount(&refresh)
        .await;

    let mut server = ChatServer::start(1).await;
    let client = session_client(&refresh, &server.chat_url, "T1").await;

    let (socket, _inbound) = ChatSocket::connect(
        ChatConfig::from_client_config(client.config(), ROOM),
        Arc::clone(client.session()),
    );
    assert!(matches!(server.next().await, ServerEvent::Connected { conn: 0, .. }));
    assert_eq!(server.expect_frame(0).await, enter_frame());

    // Once the refresh call is in flight the socket is recovering
    tokio::time::timeout(Duration::from_secs(5), async {
        while refresh.received_requests().await.unwrap_or_default().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("refresh was never called");
    socket.send("A");
    socket.send("B");

    let mut frames = Vec::new();
    while frames.len() < 3 {
        match server.next().await {
            ServerEvent::Frame { conn: 1, text } => frames.push(text),
            ServerEvent::Frame { conn: 0, text } => panic!("sent on the old connection: {text}"),
            _ => {}
        }
    }
    assert_eq!(frames, vec![enter_frame(), "A".to_string(), "B".to_string()]);
}

#[tokio::test]
async fn test_unauthorized_with_failed_refresh_closes() {
    let refresh = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/users/refresh"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&refresh)
        .await;

    let mut server = ChatServer::start(usize::MAX).await;
    let client = session_client(&refresh, &server.chat_url, "T1").await;
    let mut events = client.session().subscribe();

    let (socket, _inbound) = ChatSocket::connect(
        ChatConfig::from_client_config(client.config(), ROOM),
        Arc::clone(client.session()),
    );

    assert!(matches!(server.next().await, ServerEvent::Connected { conn: 0, .. }));
    assert_eq!(server.expect_frame(0).await, enter_frame());
    assert_eq!(server.next().await, ServerEvent::Disconnected { conn: 0 });

    wait_for_state(&socket, ConnectionState::Closed).await;
    assert!(client.session().access_token().is_none());
    assert!(events.recv().await.unwrap().is_expired());
}

#[tokio::test]
async fn test_repeated_unauthorized_is_bounded() {
    let refresh = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/users/refresh"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "accessToken": "T2" })),
        )
        .expect(2)
        .mount(&refresh)
        .await;

    let server = ChatServer::start(usize::MAX).await;
    let client = session_client(&refresh, &server.chat_url, "T1").await;

    let mut config = ChatConfig::from_client_config(client.config(), ROOM);
    config.max_auth_recoveries = 2;
    let (socket, _inbound) = ChatSocket::connect(config, Arc::clone(client.session()));

    wait_for_state(&socket, ConnectionState::Closed).await;
    assert_eq!(socket.state(), ConnectionState::Closed);
}
