use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, header};
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use uuid::Uuid;

use twofold_api::identity::issue_token;
use twofold_api::{AppState, AppStateInner, router};
use twofold_db::Database;
use twofold_db::users::NewUser;
use twofold_gateway::{ChatPolicy, Gateway};
use twofold_types::events::{GatewayCommand, GatewayEvent};
use twofold_types::models::Mode;

const SECRET: &str = "realtime-test-secret";

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn test_state(policy: ChatPolicy) -> AppState {
    let db = Arc::new(Database::open_in_memory().unwrap());
    Arc::new(AppStateInner {
        gateway: Gateway::new(db, policy),
        jwt_secret: SECRET.to_string(),
        token_ttl: chrono::Duration::days(1),
    })
}

async fn spawn_server(state: AppState) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router::build(state)).await.unwrap();
    });
    addr
}

fn seed_user(state: &AppState, username: &str) -> (Uuid, String) {
    let id = Uuid::new_v4();
    state
        .db()
        .create_user(&NewUser {
            id,
            username,
            password_hash: "x",
            social_name: username,
            professional_name: username,
        })
        .unwrap();
    let token = issue_token(SECRET, id, username, chrono::Duration::days(1)).unwrap();
    (id, token)
}

async fn connect(addr: SocketAddr, token: &str) -> Client {
    let (ws, _) = connect_async(format!("ws://{}/gateway?token={}", addr, token))
        .await
        .unwrap();
    ws
}

async fn send(ws: &mut Client, cmd: &GatewayCommand) {
    let text = serde_json::to_string(cmd).unwrap();
    ws.send(WsMessage::Text(text.into())).await.unwrap();
}

fn say(room_id: Uuid, text: &str) -> GatewayCommand {
    GatewayCommand::SendMessage {
        room_id,
        text: text.into(),
    }
}

/// Next gateway event, skipping control frames. None on timeout.
async fn next_event(ws: &mut Client, wait: Duration) -> Option<GatewayEvent> {
    let result = tokio::time::timeout(wait, async {
        while let Some(frame) = ws.next().await {
            if let WsMessage::Text(text) = frame.unwrap() {
                return Some(serde_json::from_str::<GatewayEvent>(text.as_str()).unwrap());
            }
        }
        None
    })
    .await;
    result.ok().flatten()
}

async fn wait_for_subscribers(state: &AppState, room_id: Uuid, count: usize) {
    let dispatcher = &state.gateway.dispatcher;
    tokio::time::timeout(Duration::from_secs(5), async {
        while dispatcher.room_subscriber_count(room_id) < count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("subscribers never arrived");
}

#[tokio::test]
async fn handshake_without_valid_token_is_rejected() {
    let state = test_state(ChatPolicy::default());
    let addr = spawn_server(state.clone()).await;

    for url in [
        format!("ws://{}/gateway", addr),
        format!("ws://{}/gateway?token=not-a-jwt", addr),
    ] {
        match connect_async(url).await {
            Err(tungstenite::Error::Http(response)) => assert_eq!(response.status().as_u16(), 401),
            other => panic!("expected HTTP 401, got {:?}", other.map(|_| ())),
        }
    }
    assert_eq!(state.gateway.dispatcher.connection_count(), 0);
}

#[tokio::test]
async fn handshake_accepts_bearer_header() {
    let state = test_state(ChatPolicy::default());
    let (u1, t1) = seed_user(&state, "u1");
    let (u2, _) = seed_user(&state, "u2");
    let room = state.db().find_or_create_room(u1, u2, Mode::Social).unwrap();
    let addr = spawn_server(state.clone()).await;

    let mut request = format!("ws://{}/gateway", addr).into_client_request().unwrap();
    request.headers_mut().insert(
        header::AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", t1)).unwrap(),
    );
    let (mut alice, _) = connect_async(request).await.unwrap();
    wait_for_subscribers(&state, room.id, 1).await;

    send(&mut alice, &say(room.id, "via header")).await;
    match next_event(&mut alice, Duration::from_secs(5)).await {
        Some(GatewayEvent::MessageReceived(message)) => assert_eq!(message.text, "via header"),
        other => panic!("expected MessageReceived, got {:?}", other),
    }
}

#[tokio::test]
async fn members_receive_messages_including_their_own() {
    let state = test_state(ChatPolicy::default());
    let (u1, t1) = seed_user(&state, "u1");
    let (u2, t2) = seed_user(&state, "u2");
    let room = state.db().find_or_create_room(u1, u2, Mode::Social).unwrap();
    let addr = spawn_server(state.clone()).await;

    let mut alice = connect(addr, &t1).await;
    let mut bob = connect(addr, &t2).await;
    wait_for_subscribers(&state, room.id, 2).await;

    send(&mut alice, &say(room.id, "hello")).await;

    let to_bob = next_event(&mut bob, Duration::from_secs(5)).await.unwrap();
    let to_alice = next_event(&mut alice, Duration::from_secs(5)).await.unwrap();
    assert_eq!(to_bob, to_alice);

    let history = state.db().list_messages(room.id).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].sender_id, u1);
    assert_eq!(history[0].text, "hello");
    assert_eq!(to_bob, GatewayEvent::MessageReceived(history[0].clone()));

    // Blank text: nothing stored, nothing delivered.
    send(&mut alice, &say(room.id, "   ")).await;
    assert!(next_event(&mut bob, Duration::from_millis(300)).await.is_none());
    assert_eq!(state.db().list_messages(room.id).unwrap().len(), 1);
}

#[tokio::test]
async fn outsider_hears_room_only_after_explicit_join() {
    let state = test_state(ChatPolicy::default());
    let (u1, t1) = seed_user(&state, "u1");
    let (u2, _) = seed_user(&state, "u2");
    let (_u3, t3) = seed_user(&state, "u3");
    let room = state.db().find_or_create_room(u1, u2, Mode::Social).unwrap();
    let addr = spawn_server(state.clone()).await;

    let mut alice = connect(addr, &t1).await;
    let mut carol = connect(addr, &t3).await;
    wait_for_subscribers(&state, room.id, 1).await;

    send(&mut alice, &say(room.id, "private")).await;
    assert!(next_event(&mut alice, Duration::from_secs(5)).await.is_some());
    assert!(next_event(&mut carol, Duration::from_millis(300)).await.is_none());

    // Unchecked join under the default policy.
    send(&mut carol, &GatewayCommand::JoinRoom(room.id)).await;
    wait_for_subscribers(&state, room.id, 2).await;

    send(&mut alice, &say(room.id, "again")).await;
    match next_event(&mut carol, Duration::from_secs(5)).await {
        Some(GatewayEvent::MessageReceived(message)) => assert_eq!(message.text, "again"),
        other => panic!("expected MessageReceived, got {:?}", other),
    }
}

#[tokio::test]
async fn failed_send_is_acknowledged_when_enabled() {
    let state = test_state(ChatPolicy {
        ack_send_failures: true,
        ..ChatPolicy::default()
    });
    let (u1, t1) = seed_user(&state, "u1");
    let (u2, _) = seed_user(&state, "u2");
    let room = state.db().find_or_create_room(u1, u2, Mode::Professional).unwrap();
    let addr = spawn_server(state.clone()).await;

    let mut alice = connect(addr, &t1).await;
    wait_for_subscribers(&state, room.id, 1).await;

    send(&mut alice, &say(room.id, "")).await;
    match next_event(&mut alice, Duration::from_secs(5)).await {
        Some(GatewayEvent::SendFailed { room_id, .. }) => assert_eq!(room_id, room.id),
        other => panic!("expected SendFailed, got {:?}", other),
    }
}

#[tokio::test]
async fn disconnect_drops_subscriptions() {
    let state = test_state(ChatPolicy::default());
    let (u1, t1) = seed_user(&state, "u1");
    let (u2, _) = seed_user(&state, "u2");
    let room = state.db().find_or_create_room(u1, u2, Mode::Social).unwrap();
    let addr = spawn_server(state.clone()).await;

    let mut alice = connect(addr, &t1).await;
    wait_for_subscribers(&state, room.id, 1).await;
    alice.close(None).await.unwrap();

    let dispatcher = &state.gateway.dispatcher;
    tokio::time::timeout(Duration::from_secs(5), async {
        while dispatcher.connection_count() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("connection was never unregistered");
    assert_eq!(dispatcher.room_subscriber_count(room.id), 0);
}
