use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parley_core::registry::{Outbound, SessionHandle};
use parley_core::relay::RelayError;
use parley_core::AppState;
use parley_models::gateway::{
    ClientEvent, ErrorPayload, ServerEvent, TypingPayload, ERROR_INVALID_REQUEST,
    EVENT_SEND_MESSAGE,
};
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{Duration, Instant};
use uuid::Uuid;

use crate::session::SessionGuard;

/// Closed after this many heartbeat intervals without an inbound frame.
const IDLE_INTERVALS: u32 = 3;
const CLOSE_NORMAL: u16 = 1000;
const CLOSE_UNSUPPORTED_DATA: u16 = 1003;
const CLOSE_IDLE_TIMEOUT: u16 = 4009;
/// How long the writer gets to flush a final close frame.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

async fn send_ws_text_logged(
    sender: &mut (impl SinkExt<Message> + Unpin),
    payload: String,
    user_id: i64,
    session_id: Uuid,
    event_type: &str,
) -> Result<(), ()> {
    tracing::trace!(
        target: "wire",
        direction = "out",
        user_id,
        session_id = %session_id,
        event_type,
        bytes = payload.len(),
        "server_out"
    );
    sender
        .send(Message::Text(payload.into()))
        .await
        .map_err(|_| ())
}

async fn send_ws_close_logged(
    sender: &mut (impl SinkExt<Message> + Unpin),
    code: u16,
    reason: &str,
    user_id: i64,
    session_id: Uuid,
) -> Result<(), ()> {
    tracing::debug!(user_id, session_id = %session_id, code, reason, "gateway: sending close");
    sender
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.to_string().into(),
        })))
        .await
        .map_err(|_| ())
}

pub(crate) async fn handle_connection(socket: WebSocket, state: AppState, user_id: i64) {
    let (handle, outbound) = SessionHandle::new(user_id);
    let session_id = handle.session_id();
    let heartbeat = state.config.heartbeat_interval;
    let (sender, receiver) = socket.split();

    let mut writer = tokio::spawn(write_loop(sender, outbound, heartbeat, user_id, session_id));

    let guard = SessionGuard::open(
        state.presence.clone(),
        handle,
        state.config.evict_superseded_sessions,
    );
    tracing::info!(user_id, session_id = %session_id, "gateway: session connected");

    let (reason, close) = run_session(receiver, guard.handle(), &state, heartbeat).await;
    tracing::info!(user_id, session_id = %session_id, reason, "gateway: session disconnected");

    // Unregister before waiting on the writer so presence is not held up by
    // a slow socket.
    let handle = guard.handle().clone();
    drop(guard);
    let (code, close_reason) = close.unwrap_or((CLOSE_NORMAL, ""));
    handle.close(code, close_reason);
    drop(handle);

    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer)
        .await
        .is_err()
    {
        writer.abort();
    }
}

/// Drains the session queue to the socket and keeps the connection alive
/// with pings. Exits on a close request, a socket error or once every
/// handle to the session is gone.
async fn write_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut outbound: UnboundedReceiver<Outbound>,
    heartbeat: Duration,
    user_id: i64,
    session_id: Uuid,
) {
    let mut ping = tokio::time::interval_at(Instant::now() + heartbeat, heartbeat);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            item = outbound.recv() => match item {
                Some(Outbound::Event(event)) => {
                    let payload = match serde_json::to_string(&event) {
                        Ok(payload) => payload,
                        Err(err) => {
                            tracing::warn!(user_id, event = event.name(), "gateway: failed to encode event: {err}");
                            continue;
                        }
                    };
                    if send_ws_text_logged(&mut sender, payload, user_id, session_id, event.name())
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Some(Outbound::Close { code, reason }) => {
                    let _ = send_ws_close_logged(&mut sender, code, &reason, user_id, session_id).await;
                    break;
                }
                None => break,
            },
            _ = ping.tick() => {
                if sender.send(Message::Ping(Default::default())).await.is_err() {
                    break;
                }
            }
        }
    }
    // Dropping the receiver marks every handle closed, which stops the reader.
    drop(outbound);
    let _ = sender.close().await;
}

/// Reads frames and handles them one at a time, in arrival order. Returns a
/// disconnect reason and, when the server is the one ending the session, the
/// close code to send.
async fn run_session(
    mut receiver: SplitStream<WebSocket>,
    handle: &SessionHandle,
    state: &AppState,
    heartbeat: Duration,
) -> (String, Option<(u16, &'static str)>) {
    let idle_timeout = heartbeat * IDLE_INTERVALS;
    let idle = tokio::time::sleep(idle_timeout);
    tokio::pin!(idle);

    loop {
        tokio::select! {
            msg = receiver.next() => {
                idle.as_mut().reset(Instant::now() + idle_timeout);
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        tracing::trace!(
                            target: "wire",
                            direction = "in",
                            user_id = handle.user_id(),
                            session_id = %handle.session_id(),
                            bytes = text.as_str().len(),
                            "server_in"
                        );
                        handle_client_frame(text.as_str(), handle, state).await;
                    }
                    Some(Ok(Message::Binary(_))) => {
                        return (
                            "binary frame".to_string(),
                            Some((CLOSE_UNSUPPORTED_DATA, "Binary frames are not supported")),
                        );
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let reason = match frame {
                            Some(frame) => format!(
                                "client close frame (code={}, reason={})",
                                frame.code, frame.reason
                            ),
                            None => "client close frame (no code/reason)".to_string(),
                        };
                        return (reason, None);
                    }
                    // Pings are answered by the transport; pongs only refresh the idle timer.
                    Some(Ok(_)) => {}
                    Some(Err(err)) => return (format!("websocket receive error: {err}"), None),
                    None => return ("websocket stream ended".to_string(), None),
                }
            }
            _ = &mut idle => {
                return (
                    "heartbeat timeout".to_string(),
                    Some((CLOSE_IDLE_TIMEOUT, "Heartbeat timeout")),
                );
            }
            _ = handle.closed() => {
                return ("writer closed".to_string(), None);
            }
        }
    }
}

async fn handle_client_frame(text: &str, handle: &SessionHandle, state: &AppState) {
    let user_id = handle.user_id();
    // Every inbound frame is charged, decodable or not.
    if !state.event_limiter.check(user_id) {
        if names_send_message(text) {
            handle.send(ServerEvent::MessageError(RelayError::RateLimited.payload()));
        } else {
            tracing::debug!(user_id, "gateway: rate limited (silent drop)");
        }
        return;
    }

    let event = match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => event,
        Err(err) => {
            tracing::debug!(user_id, "gateway: malformed frame: {err}");
            let payload = ErrorPayload::new(ERROR_INVALID_REQUEST, format!("Malformed event: {err}"));
            if names_send_message(text) {
                handle.send(ServerEvent::MessageError(payload));
            } else {
                handle.send(ServerEvent::Error(payload));
            }
            return;
        }
    };

    match event {
        ClientEvent::SendMessage(payload) => {
            if let Ok(outcome) = state.relay.relay_send(handle, payload).await {
                tracing::debug!(
                    user_id,
                    message_id = outcome.message.id,
                    delivered = outcome.delivered,
                    "gateway: message relayed"
                );
            }
        }
        ClientEvent::Typing(payload) => typing(state, handle, &payload, true),
        ClientEvent::StopTyping(payload) => typing(state, handle, &payload, false),
    }
}

fn typing(
    state: &AppState,
    handle: &SessionHandle,
    payload: &TypingPayload,
    started: bool,
) {
    if let Err(err) = state.relay.relay_typing(handle.user_id(), payload, started) {
        handle.send(ServerEvent::Error(err.payload()));
    }
}

/// Best-effort check of a raw frame's event name, so a refused or broken
/// `send-message` is answered with `message-error`.
fn names_send_message(text: &str) -> bool {
    serde_json::from_str::<Value>(text)
        .ok()
        .and_then(|value| {
            value
                .get("event")
                .and_then(Value::as_str)
                .map(|name| name == EVENT_SEND_MESSAGE)
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::names_send_message;

    #[test]
    fn detects_broken_send_message_frames() {
        assert!(names_send_message(r#"{"event":"send-message","data":7}"#));
        assert!(!names_send_message(r#"{"event":"typing","data":7}"#));
        assert!(!names_send_message("not json"));
    }
}
