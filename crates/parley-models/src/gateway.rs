//! Gateway wire protocol.
//!
//! Every frame is a JSON text message of the form
//! `{"event": "<name>", "data": {...}}`.

use serde::{Deserialize, Serialize};

use crate::message::Message;
use crate::presence::{PresenceNotice, TypingNotice};

// Client -> Server events
pub const EVENT_SEND_MESSAGE: &str = "send-message";
pub const EVENT_TYPING: &str = "typing";
pub const EVENT_STOP_TYPING: &str = "stop-typing";

// Server -> Client events
pub const EVENT_RECEIVE_MESSAGE: &str = "receive-message";
pub const EVENT_MESSAGE_SENT: &str = "message-sent";
pub const EVENT_MESSAGE_ERROR: &str = "message-error";
pub const EVENT_USER_ONLINE: &str = "user-online";
pub const EVENT_USER_OFFLINE: &str = "user-offline";
pub const EVENT_USER_TYPING: &str = "user-typing";
pub const EVENT_USER_STOPPED_TYPING: &str = "user-stopped-typing";
pub const EVENT_ERROR: &str = "error";

// Error codes carried in `message-error` / `error` payloads
pub const ERROR_INVALID_REQUEST: &str = "invalid_request";
pub const ERROR_PERSISTENCE: &str = "persistence_error";
pub const ERROR_RATE_LIMITED: &str = "rate_limited";

/// Close code sent to a session that was replaced by a newer connection of
/// the same user (only when eviction is enabled).
pub const CLOSE_SUPERSEDED: u16 = 4000;

/// Events a client may send over an established session.
///
/// Payload fields are optional at the serde level; presence and emptiness are
/// checked by the relay so that a missing field is reported back to the
/// client instead of failing the whole frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    SendMessage(SendMessagePayload),
    Typing(TypingPayload),
    StopTyping(TypingPayload),
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SendMessage(_) => EVENT_SEND_MESSAGE,
            Self::Typing(_) => EVENT_TYPING,
            Self::StopTyping(_) => EVENT_STOP_TYPING,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessagePayload {
    #[serde(default, with = "crate::id::option")]
    pub conversation_id: Option<i64>,
    #[serde(default, with = "crate::id::option")]
    pub receiver_id: Option<i64>,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingPayload {
    #[serde(default, with = "crate::id::option")]
    pub receiver_id: Option<i64>,
    #[serde(default, with = "crate::id::option")]
    pub conversation_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

impl ErrorPayload {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Events the server pushes to a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    ReceiveMessage(Message),
    MessageSent(Message),
    MessageError(ErrorPayload),
    UserOnline(PresenceNotice),
    UserOffline(PresenceNotice),
    UserTyping(TypingNotice),
    UserStoppedTyping(TypingNotice),
    Error(ErrorPayload),
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ReceiveMessage(_) => EVENT_RECEIVE_MESSAGE,
            Self::MessageSent(_) => EVENT_MESSAGE_SENT,
            Self::MessageError(_) => EVENT_MESSAGE_ERROR,
            Self::UserOnline(_) => EVENT_USER_ONLINE,
            Self::UserOffline(_) => EVENT_USER_OFFLINE,
            Self::UserTyping(_) => EVENT_USER_TYPING,
            Self::UserStoppedTyping(_) => EVENT_USER_STOPPED_TYPING,
            Self::Error(_) => EVENT_ERROR,
        }
    }
}
