use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parley_core::{AppConfig, AppState};
use parley_db::DbPool;
use parley_models::conversation::ParticipantPair;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const SECRET: &str = "gateway-test-secret";
const WAIT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(300);

struct Gateway {
    addr: SocketAddr,
    db: DbPool,
}

impl Gateway {
    async fn start(config: AppConfig) -> anyhow::Result<Self> {
        let db = parley_db::create_pool("sqlite::memory:", 1).await?;
        parley_db::run_migrations(&db).await?;

        let state = AppState::new(
            db.clone(),
            AppConfig {
                jwt_secret: SECRET.to_string(),
                ..config
            },
        );
        let app = parley_ws::gateway_router().with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Ok(Self { addr, db })
    }

    async fn default() -> anyhow::Result<Self> {
        Self::start(AppConfig::default()).await
    }

    async fn user(&self, id: i64, name: &str) -> anyhow::Result<String> {
        parley_db::users::create_user(
            &self.db,
            id,
            name,
            &format!("{}@example.com", name.to_lowercase()),
            "unused-hash",
        )
        .await?;
        Ok(parley_core::auth::create_token(id, SECRET, 3600)?)
    }

    async fn conversation(&self, id: i64, a: i64, b: i64) -> anyhow::Result<i64> {
        let pair = ParticipantPair::new(a, b).expect("distinct users");
        let row = parley_db::conversations::get_or_create_conversation(&self.db, id, pair).await?;
        Ok(row.id)
    }

    fn url(&self) -> String {
        format!("ws://{}/gateway", self.addr)
    }

    /// Connect and wait for the session's own `user-online`, which proves it
    /// is registered.
    async fn connect(&self, token: &str, user_id: i64) -> anyhow::Result<Socket> {
        let (mut socket, _) = connect_async(format!("{}?token={token}", self.url())).await?;
        let online = expect_event(&mut socket, "user-online").await;
        assert_eq!(online["user_id"], json!(user_id.to_string()));
        Ok(socket)
    }
}

async fn next_event(socket: &mut Socket) -> Option<Value> {
    loop {
        match socket.next().await? {
            Ok(Message::Text(text)) => return serde_json::from_str(text.as_str()).ok(),
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
}

async fn expect_event(socket: &mut Socket, name: &str) -> Value {
    let frame = tokio::time::timeout(WAIT, next_event(socket))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {name}"))
        .unwrap_or_else(|| panic!("socket closed while waiting for {name}"));
    assert_eq!(frame["event"], json!(name), "unexpected frame: {frame}");
    frame["data"].clone()
}

async fn expect_silence(socket: &mut Socket) {
    if let Ok(Some(frame)) = tokio::time::timeout(QUIET, next_event(socket)).await {
        panic!("expected no frames, got {frame}");
    }
}

async fn send(socket: &mut Socket, frame: Value) {
    socket
        .send(Message::Text(frame.to_string().into()))
        .await
        .expect("send frame");
}

fn send_message(conversation_id: i64, receiver_id: i64, content: &str) -> Value {
    json!({
        "event": "send-message",
        "data": {
            "conversation_id": conversation_id.to_string(),
            "receiver_id": receiver_id.to_string(),
            "content": content,
        }
    })
}

fn rejected_body(err: WsError) -> (u16, Value) {
    match err {
        WsError::Http(response) => {
            let status = response.status().as_u16();
            let body = response
                .body()
                .as_deref()
                .and_then(|bytes| serde_json::from_slice(bytes).ok())
                .unwrap_or(Value::Null);
            (status, body)
        }
        other => panic!("expected an HTTP rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn handshake_requires_a_valid_token() -> anyhow::Result<()> {
    let gateway = Gateway::default().await?;

    let err = connect_async(gateway.url()).await.unwrap_err();
    assert_eq!(
        rejected_body(err),
        (401, json!({"error": "Authentication token required"}))
    );

    let err = connect_async(format!("{}?token=garbage", gateway.url()))
        .await
        .unwrap_err();
    assert_eq!(rejected_body(err), (401, json!({"error": "Invalid token"})));
    Ok(())
}

#[tokio::test]
async fn bearer_header_is_accepted() -> anyhow::Result<()> {
    let gateway = Gateway::default().await?;
    let token = gateway.user(1, "Ada").await?;

    let mut request = gateway.url().into_client_request()?;
    request
        .headers_mut()
        .insert(AUTHORIZATION, format!("Bearer {token}").parse()?);
    let (mut socket, _) = connect_async(request).await?;
    let online = expect_event(&mut socket, "user-online").await;
    assert_eq!(online["user_id"], json!("1"));
    Ok(())
}

#[tokio::test]
async fn message_reaches_online_receiver_and_acks_sender() -> anyhow::Result<()> {
    let gateway = Gateway::default().await?;
    let t1 = gateway.user(1, "Ada").await?;
    let t2 = gateway.user(2, "Bob").await?;
    let conversation_id = gateway.conversation(10, 1, 2).await?;

    let mut u1 = gateway.connect(&t1, 1).await?;
    let mut u2 = gateway.connect(&t2, 2).await?;
    assert_eq!(expect_event(&mut u1, "user-online").await["user_id"], json!("2"));

    send(&mut u1, send_message(conversation_id, 2, "hi")).await;

    let received = expect_event(&mut u2, "receive-message").await;
    assert_eq!(received["content"], json!("hi"));
    assert_eq!(received["sender"]["id"], json!("1"));
    assert_eq!(received["sender"]["name"], json!("Ada"));
    assert_eq!(received["receiver"]["email"], json!("bob@example.com"));

    let acked = expect_event(&mut u1, "message-sent").await;
    assert_eq!(acked, received);
    Ok(())
}

#[tokio::test]
async fn offline_receiver_gets_message_from_history() -> anyhow::Result<()> {
    let gateway = Gateway::default().await?;
    let t1 = gateway.user(1, "Ada").await?;
    gateway.user(2, "Bob").await?;
    let conversation_id = gateway.conversation(10, 1, 2).await?;

    let mut u1 = gateway.connect(&t1, 1).await?;
    send(&mut u1, send_message(conversation_id, 2, "are you there?")).await;
    let acked = expect_event(&mut u1, "message-sent").await;
    assert_eq!(acked["content"], json!("are you there?"));

    let history = parley_db::messages::list_conversation_messages(&gateway.db, conversation_id).await?;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].message.content, "are you there?");
    Ok(())
}

#[tokio::test]
async fn messages_arrive_in_send_order() -> anyhow::Result<()> {
    let gateway = Gateway::default().await?;
    let t1 = gateway.user(1, "Ada").await?;
    let t2 = gateway.user(2, "Bob").await?;
    let conversation_id = gateway.conversation(10, 1, 2).await?;

    let mut u1 = gateway.connect(&t1, 1).await?;
    let mut u2 = gateway.connect(&t2, 2).await?;

    let texts = ["one", "two", "three", "four", "five"];
    for text in texts {
        send(&mut u1, send_message(conversation_id, 2, text)).await;
    }
    for text in texts {
        assert_eq!(expect_event(&mut u2, "receive-message").await["content"], json!(text));
    }
    Ok(())
}

#[tokio::test]
async fn second_connection_supersedes_the_first() -> anyhow::Result<()> {
    let gateway = Gateway::default().await?;
    let t1 = gateway.user(1, "Ada").await?;
    let t2 = gateway.user(2, "Bob").await?;
    let conversation_id = gateway.conversation(10, 1, 2).await?;

    let mut first = gateway.connect(&t1, 1).await?;
    let mut second = gateway.connect(&t1, 1).await?;
    // The replaced session is no longer registered, so it hears nothing.
    expect_silence(&mut first).await;

    // Only the registered session hears about new arrivals.
    let mut u2 = gateway.connect(&t2, 2).await?;
    expect_event(&mut second, "user-online").await;

    send(&mut u2, send_message(conversation_id, 1, "which tab?")).await;
    assert_eq!(
        expect_event(&mut second, "receive-message").await["content"],
        json!("which tab?")
    );
    expect_event(&mut u2, "message-sent").await;
    expect_silence(&mut first).await;

    // Closing the stale socket must not mark the user offline.
    first.close(None).await?;
    expect_silence(&mut u2).await;
    Ok(())
}

#[tokio::test]
async fn disconnect_broadcasts_one_offline() -> anyhow::Result<()> {
    let gateway = Gateway::default().await?;
    let t1 = gateway.user(1, "Ada").await?;
    let t2 = gateway.user(2, "Bob").await?;
    let t3 = gateway.user(3, "Cy").await?;

    let mut u1 = gateway.connect(&t1, 1).await?;
    let mut u2 = gateway.connect(&t2, 2).await?;
    let mut u3 = gateway.connect(&t3, 3).await?;
    expect_event(&mut u1, "user-online").await;
    expect_event(&mut u1, "user-online").await;
    expect_event(&mut u2, "user-online").await;

    u3.close(None).await?;

    for socket in [&mut u1, &mut u2] {
        assert_eq!(expect_event(socket, "user-offline").await["user_id"], json!("3"));
        expect_silence(socket).await;
    }
    Ok(())
}

#[tokio::test]
async fn typing_is_relayed_without_storing_anything() -> anyhow::Result<()> {
    let gateway = Gateway::default().await?;
    let t1 = gateway.user(1, "Ada").await?;
    let t2 = gateway.user(2, "Bob").await?;
    let conversation_id = gateway.conversation(10, 1, 2).await?;

    let mut u1 = gateway.connect(&t1, 1).await?;
    let mut u2 = gateway.connect(&t2, 2).await?;

    let data = json!({"receiver_id": "2", "conversation_id": conversation_id.to_string()});
    send(&mut u1, json!({"event": "typing", "data": data})).await;
    send(&mut u1, json!({"event": "stop-typing", "data": data})).await;

    let typing = expect_event(&mut u2, "user-typing").await;
    assert_eq!(
        typing,
        json!({"user_id": "1", "conversation_id": conversation_id.to_string()})
    );
    expect_event(&mut u2, "user-stopped-typing").await;

    // Typing at someone who is offline is dropped without a reply.
    send(
        &mut u2,
        json!({"event": "typing", "data": {"receiver_id": "99", "conversation_id": "1"}}),
    )
    .await;
    expect_silence(&mut u2).await;

    assert_eq!(
        parley_db::messages::count_conversation_messages(&gateway.db, conversation_id).await?,
        0
    );
    Ok(())
}

#[tokio::test]
async fn malformed_frames_are_reported_to_the_sender_only() -> anyhow::Result<()> {
    let gateway = Gateway::default().await?;
    let t1 = gateway.user(1, "Ada").await?;
    let t2 = gateway.user(2, "Bob").await?;
    let conversation_id = gateway.conversation(10, 1, 2).await?;

    let mut u1 = gateway.connect(&t1, 1).await?;
    let mut u2 = gateway.connect(&t2, 2).await?;
    assert_eq!(expect_event(&mut u1, "user-online").await["user_id"], json!("2"));

    send(&mut u1, json!({"event": "dance", "data": {}})).await;
    assert_eq!(expect_event(&mut u1, "error").await["code"], json!("invalid_request"));

    send(
        &mut u1,
        json!({"event": "send-message", "data": {"conversation_id": conversation_id.to_string(), "receiver_id": "2"}}),
    )
    .await;
    assert_eq!(
        expect_event(&mut u1, "message-error").await["code"],
        json!("invalid_request")
    );

    // The session survives and keeps working.
    send(&mut u1, send_message(conversation_id, 2, "still here")).await;
    expect_event(&mut u1, "message-sent").await;
    assert_eq!(
        expect_event(&mut u2, "receive-message").await["content"],
        json!("still here")
    );
    Ok(())
}

#[tokio::test]
async fn eviction_closes_the_superseded_socket() -> anyhow::Result<()> {
    let gateway = Gateway::start(AppConfig {
        evict_superseded_sessions: true,
        ..AppConfig::default()
    })
    .await?;
    let t1 = gateway.user(1, "Ada").await?;

    let mut first = gateway.connect(&t1, 1).await?;
    let _second = gateway.connect(&t1, 1).await?;

    let close = tokio::time::timeout(WAIT, async {
        loop {
            match first.next().await {
                Some(Ok(Message::Close(frame))) => return frame,
                Some(Ok(_)) => continue,
                _ => return None,
            }
        }
    })
    .await?;
    assert_eq!(close.map(|frame| frame.code), Some(CloseCode::from(4000)));
    Ok(())
}

#[tokio::test]
async fn over_limit_sends_are_refused() -> anyhow::Result<()> {
    let gateway = Gateway::start(AppConfig {
        max_events_per_minute: 2,
        ..AppConfig::default()
    })
    .await?;
    let t1 = gateway.user(1, "Ada").await?;
    gateway.user(2, "Bob").await?;
    let conversation_id = gateway.conversation(10, 1, 2).await?;

    let mut u1 = gateway.connect(&t1, 1).await?;
    for text in ["a", "b"] {
        send(&mut u1, send_message(conversation_id, 2, text)).await;
        expect_event(&mut u1, "message-sent").await;
    }
    send(&mut u1, send_message(conversation_id, 2, "c")).await;
    assert_eq!(
        expect_event(&mut u1, "message-error").await["code"],
        json!("rate_limited")
    );
    Ok(())
}

#[tokio::test]
async fn undecodable_frames_count_against_the_limit() -> anyhow::Result<()> {
    let gateway = Gateway::start(AppConfig {
        max_events_per_minute: 2,
        ..AppConfig::default()
    })
    .await?;
    let t1 = gateway.user(1, "Ada").await?;
    let mut u1 = gateway.connect(&t1, 1).await?;

    for _ in 0..2 {
        send(&mut u1, json!({"event": "dance", "data": {}})).await;
        assert_eq!(expect_event(&mut u1, "error").await["code"], json!("invalid_request"));
    }
    send(&mut u1, json!({"event": "dance", "data": {}})).await;
    expect_silence(&mut u1).await;

    send(&mut u1, json!({"event": "send-message", "data": 7})).await;
    assert_eq!(
        expect_event(&mut u1, "message-error").await["code"],
        json!("rate_limited")
    );
    Ok(())
}
