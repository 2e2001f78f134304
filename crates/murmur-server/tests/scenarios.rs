//! End-to-end session scenarios.
//!
//! Each test boots a full server (memory bus + memory presence) on an
//! ephemeral port and drives it with real WebSocket clients.

use futures_util::{SinkExt, StreamExt};
use murmur_bus::MemoryBus;
use murmur_core::{codec, now_millis, Envelope, UserInfo};
use murmur_presence::{MemoryPresence, PresenceStore as _};
use murmur_server::{fanout, handlers, registry::SessionRegistry, AppState, Config};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::error;

const RECV_TIMEOUT: Duration = Duration::from_secs(2);
const SILENCE_WINDOW: Duration = Duration::from_millis(150);

async fn spawn_server() -> (SocketAddr, Arc<AppState>) {
    let config = Config {
        host: "127.0.0.1".into(),
        port: 0,
        ..Config::default()
    };

    let state = Arc::new(AppState {
        config,
        registry: SessionRegistry::new(),
        bus: Arc::new(MemoryBus::new()),
        presence: Arc::new(MemoryPresence::new()),
        shutdown: CancellationToken::new(),
        tracker: TaskTracker::new(),
    });

    {
        let state = state.clone();
        let cancel = state.shutdown.child_token();
        state.tracker.clone().spawn(async move {
            if let Err(e) = fanout::run(state, cancel).await {
                error!(error = %e, "fan-out engine terminated");
            }
        });
    }

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(handlers::serve(listener, state.clone()));

    // Let the fan-out engine establish its subscription before any client
    // publishes.
    tokio::time::sleep(Duration::from_millis(50)).await;

    (addr, state)
}

struct Client {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl Client {
    async fn connect(addr: SocketAddr, query: &str) -> Self {
        let url = format!("ws://{addr}/api/chat?{query}");
        let (ws, _) = connect_async(url).await.unwrap();
        Self { ws }
    }

    /// Receive the next envelope, skipping transport chatter.
    async fn recv(&mut self) -> Envelope {
        loop {
            let msg = timeout(RECV_TIMEOUT, self.ws.next())
                .await
                .expect("timed out waiting for a frame")
                .expect("connection ended")
                .expect("websocket error");

            match msg {
                Message::Text(text) => return codec::decode(text.as_bytes()).unwrap(),
                Message::Ping(_) | Message::Pong(_) => {}
                other => panic!("unexpected frame: {other:?}"),
            }
        }
    }

    /// Assert nothing arrives for a short window.
    async fn expect_silence(&mut self) {
        let got = timeout(SILENCE_WINDOW, self.ws.next()).await;
        assert!(got.is_err(), "expected silence, got {got:?}");
    }

    async fn send_json(&mut self, json: String) {
        self.ws.send(Message::Text(json)).await.unwrap();
    }

    async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}

fn find_user<'a>(users: &'a [UserInfo], user_id: &str) -> &'a UserInfo {
    users
        .iter()
        .find(|u| u.user_id == user_id)
        .unwrap_or_else(|| panic!("user {user_id} not in sync"))
}

#[tokio::test]
async fn two_user_join_and_sync() {
    let (addr, _state) = spawn_server().await;

    // First user connects and sees itself in the snapshot, then its own
    // join event off the bus.
    let mut alice = Client::connect(addr, "uid=user1&username=Alice&color=%23ef4444").await;

    match alice.recv().await {
        Envelope::UserSync(sync) => {
            assert_eq!(sync.user_id, "system");
            assert_eq!(sync.users.len(), 1);
            let me = find_user(&sync.users, "user1");
            assert_eq!(me.username.as_deref(), Some("Alice"));
            assert_eq!(me.color.as_deref(), Some("#ef4444"));
        }
        other => panic!("first frame must be a sync, got {other:?}"),
    }

    match alice.recv().await {
        Envelope::UserJoined(join) => {
            assert_eq!(join.user_id, "user1");
            assert_eq!(join.username.as_deref(), Some("Alice"));
            assert_eq!(join.color.as_deref(), Some("#ef4444"));
        }
        other => panic!("expected own join event, got {other:?}"),
    }

    // Second user's snapshot contains both; both see the new join.
    let mut bob = Client::connect(addr, "uid=user2&username=Bob&color=%2310b981").await;

    match bob.recv().await {
        Envelope::UserSync(sync) => {
            assert_eq!(sync.users.len(), 2);
            assert_eq!(
                find_user(&sync.users, "user1").username.as_deref(),
                Some("Alice")
            );
            assert_eq!(
                find_user(&sync.users, "user2").color.as_deref(),
                Some("#10b981")
            );
        }
        other => panic!("first frame must be a sync, got {other:?}"),
    }

    match alice.recv().await {
        Envelope::UserJoined(join) => assert_eq!(join.user_id, "user2"),
        other => panic!("expected peer join event, got {other:?}"),
    }

    match bob.recv().await {
        Envelope::UserJoined(join) => assert_eq!(join.user_id, "user2"),
        other => panic!("expected own join event, got {other:?}"),
    }
}

#[tokio::test]
async fn chat_echo_suppression() {
    let (addr, _state) = spawn_server().await;

    let mut alice = Client::connect(addr, "uid=user1&username=Alice").await;
    alice.recv().await; // sync
    alice.recv().await; // own join

    let mut bob = Client::connect(addr, "uid=user2&username=Bob").await;
    bob.recv().await; // sync
    alice.recv().await; // bob joined
    bob.recv().await; // own join

    alice
        .send_json(format!(
            r#"{{"type":"chat","channel_id":"default","user_id":"user1","payload":"hi","position":{{"x":10.0,"y":20.0}},"timestamp":{}}}"#,
            now_millis()
        ))
        .await;

    match bob.recv().await {
        Envelope::Chat(chat) => {
            assert_eq!(chat.user_id, "user1");
            assert_eq!(chat.payload.as_deref(), Some("hi"));
            assert!(
                chat.message_id.as_deref().is_some_and(|id| !id.is_empty()),
                "published chat must carry a message id"
            );
        }
        other => panic!("expected chat, got {other:?}"),
    }

    // The sender never hears its own chat back.
    alice.expect_silence().await;
}

#[tokio::test]
async fn rename_preserves_color() {
    let (addr, state) = spawn_server().await;

    let mut alice = Client::connect(addr, "uid=user1&username=Alice&color=%23ef4444").await;
    alice.recv().await;
    alice.recv().await;

    let mut bob = Client::connect(addr, "uid=user2&username=Bob&color=%2310b981").await;
    bob.recv().await;
    alice.recv().await;
    bob.recv().await;

    bob.send_json(format!(
        r#"{{"type":"username_changed","channel_id":"default","user_id":"user2","username":"Bob Smith","timestamp":{}}}"#,
        now_millis()
    ))
    .await;

    // Both sides see the event, origin included.
    for client in [&mut alice, &mut bob] {
        match client.recv().await {
            Envelope::UsernameChanged(ev) => {
                assert_eq!(ev.user_id, "user2");
                assert_eq!(ev.username.as_deref(), Some("Bob Smith"));
            }
            other => panic!("expected rename event, got {other:?}"),
        }
    }

    let users = state.presence.list("default").await.unwrap();
    let bob_entry = find_user(&users, "user2");
    assert_eq!(bob_entry.username.as_deref(), Some("Bob Smith"));
    assert_eq!(bob_entry.color.as_deref(), Some("#10b981"));
}

#[tokio::test]
async fn color_change_preserves_name() {
    let (addr, state) = spawn_server().await;

    let mut alice = Client::connect(addr, "uid=user1&username=Alice&color=%23ef4444").await;
    alice.recv().await;
    alice.recv().await;

    let mut bob = Client::connect(addr, "uid=user2&username=Bob").await;
    bob.recv().await;
    alice.recv().await;
    bob.recv().await;

    alice
        .send_json(format!(
            r##"{{"type":"color_changed","channel_id":"default","user_id":"user1","color":"#8b5cf6","timestamp":{}}}"##,
            now_millis()
        ))
        .await;

    for client in [&mut alice, &mut bob] {
        match client.recv().await {
            Envelope::ColorChanged(ev) => {
                assert_eq!(ev.user_id, "user1");
                assert_eq!(ev.color.as_deref(), Some("#8b5cf6"));
            }
            other => panic!("expected color event, got {other:?}"),
        }
    }

    let users = state.presence.list("default").await.unwrap();
    let alice_entry = find_user(&users, "user1");
    assert_eq!(alice_entry.username.as_deref(), Some("Alice"));
    assert_eq!(alice_entry.color.as_deref(), Some("#8b5cf6"));
}

#[tokio::test]
async fn disconnect_announces_and_clears_presence() {
    let (addr, state) = spawn_server().await;

    let mut alice = Client::connect(addr, "uid=user1&username=Alice").await;
    alice.recv().await;
    alice.recv().await;

    let bob = Client::connect(addr, "uid=user2&username=Bob").await;
    {
        // Drain bob's connect traffic before closing.
        let mut bob = bob;
        bob.recv().await;
        alice.recv().await;
        bob.recv().await;
        bob.close().await;
    }

    match alice.recv().await {
        Envelope::UserLeft(left) => assert_eq!(left.user_id, "user2"),
        other => panic!("expected leave event, got {other:?}"),
    }

    let users = state.presence.list("default").await.unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].user_id, "user1");
}

#[tokio::test]
async fn spoofed_frames_are_dropped() {
    let (addr, _state) = spawn_server().await;

    let mut alice = Client::connect(addr, "uid=user1").await;
    alice.recv().await;
    alice.recv().await;

    let mut bob = Client::connect(addr, "uid=user2").await;
    bob.recv().await;
    alice.recv().await;
    bob.recv().await;

    // Alice claims to be user2; the session guard drops the frame.
    alice
        .send_json(format!(
            r#"{{"type":"chat","channel_id":"default","user_id":"user2","payload":"forged","timestamp":{}}}"#,
            now_millis()
        ))
        .await;

    bob.expect_silence().await;
    alice.expect_silence().await;
}

#[tokio::test]
async fn connection_without_uid_is_rejected() {
    let (addr, state) = spawn_server().await;

    let (mut ws, _) = connect_async(format!("ws://{addr}/api/chat?username=Ghost"))
        .await
        .unwrap();

    // The server closes without ever binding a session.
    let frame = timeout(RECV_TIMEOUT, ws.next()).await.unwrap();
    match frame {
        Some(Ok(Message::Close(_))) | None => {}
        other => panic!("expected close, got {other:?}"),
    }

    assert!(state.presence.list("default").await.unwrap().is_empty());
    assert!(state.registry.is_empty());
}

#[tokio::test]
async fn undecodable_frames_do_not_close_the_session() {
    let (addr, _state) = spawn_server().await;

    let mut alice = Client::connect(addr, "uid=user1").await;
    alice.recv().await;
    alice.recv().await;

    let mut bob = Client::connect(addr, "uid=user2").await;
    bob.recv().await;
    alice.recv().await;
    bob.recv().await;

    alice.send_json("{not json".to_string()).await;

    // The session survives and still relays the next valid frame.
    alice
        .send_json(format!(
            r#"{{"type":"chat","channel_id":"default","user_id":"user1","payload":"still here","timestamp":{}}}"#,
            now_millis()
        ))
        .await;

    match bob.recv().await {
        Envelope::Chat(chat) => assert_eq!(chat.payload.as_deref(), Some("still here")),
        other => panic!("expected chat, got {other:?}"),
    }
}

#[tokio::test]
async fn shutdown_drains_sessions() {
    let (addr, state) = spawn_server().await;

    let mut alice = Client::connect(addr, "uid=user1").await;
    alice.recv().await;
    alice.recv().await;

    state.shutdown.cancel();
    state.registry.close_all();
    state.tracker.close();

    timeout(Duration::from_secs(5), state.tracker.wait())
        .await
        .expect("shutdown exceeded its budget");

    assert!(state.registry.is_empty());
}
