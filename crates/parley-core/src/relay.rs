//! Live message and typing relay between gateway sessions.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parley_models::gateway::{
    ErrorPayload, SendMessagePayload, ServerEvent, TypingPayload, ERROR_INVALID_REQUEST,
    ERROR_PERSISTENCE, ERROR_RATE_LIMITED,
};
use parley_models::message::Message;
use parley_models::presence::TypingNotice;
use parley_models::user::UserSummary;
use parley_util::validation::{validate_message_content, ValidationError};
use thiserror::Error;

use crate::registry::{ConnectionRegistry, SessionHandle};
use crate::store::{MessageStore, NewMessage, StoreError};

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("{0}")]
    InvalidRequest(String),
    #[error("Failed to send message")]
    Persistence(#[source] StoreError),
    #[error("Too many events, slow down")]
    RateLimited,
}

impl RelayError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => ERROR_INVALID_REQUEST,
            Self::Persistence(_) => ERROR_PERSISTENCE,
            Self::RateLimited => ERROR_RATE_LIMITED,
        }
    }

    /// Client-facing `{code, message}`. Store details stay in the logs.
    pub fn payload(&self) -> ErrorPayload {
        ErrorPayload::new(self.code(), self.to_string())
    }
}

impl From<ValidationError> for RelayError {
    fn from(err: ValidationError) -> Self {
        Self::InvalidRequest(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub message: Message,
    /// Whether the receiver had a live session to push `receive-message` to.
    pub delivered: bool,
}

pub struct MessageRelay {
    store: Arc<dyn MessageStore>,
    registry: Arc<ConnectionRegistry>,
    store_timeout: Duration,
}

impl MessageRelay {
    pub fn new(
        store: Arc<dyn MessageStore>,
        registry: Arc<ConnectionRegistry>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            store_timeout,
        }
    }

    /// Handle a gateway `send-message` from `origin`.
    ///
    /// On success the origin gets `message-sent`; on failure it gets
    /// `message-error`. Either way nothing else hears about a failure.
    pub async fn relay_send(
        &self,
        origin: &SessionHandle,
        payload: SendMessagePayload,
    ) -> Result<SendOutcome, RelayError> {
        match self.persist_and_deliver(origin.user_id(), payload).await {
            Ok(outcome) => {
                // The origin may have disconnected mid-flight; the ack is then dropped.
                origin.send(ServerEvent::MessageSent(outcome.message.clone()));
                Ok(outcome)
            }
            Err(err) => {
                origin.send(ServerEvent::MessageError(err.payload()));
                Err(err)
            }
        }
    }

    /// Validate, store and push a message to its receiver. Shared by the
    /// gateway and the HTTP send route; acknowledging the sender is up to
    /// the caller.
    pub async fn persist_and_deliver(
        &self,
        sender_id: i64,
        payload: SendMessagePayload,
    ) -> Result<SendOutcome, RelayError> {
        let (Some(conversation_id), Some(receiver_id)) =
            (payload.conversation_id, payload.receiver_id)
        else {
            return Err(RelayError::InvalidRequest(
                "conversation_id, receiver_id and content are required".into(),
            ));
        };
        let content = payload.content.unwrap_or_default();
        validate_message_content(&content)?;

        let participants = self
            .bounded(self.store.conversation_participants(conversation_id))
            .await
            .map_err(|err| {
                tracing::error!(conversation_id, error = %err, "relay: conversation lookup failed");
                RelayError::Persistence(err)
            })?
            .ok_or_else(|| RelayError::InvalidRequest("conversation not found".into()))?;
        if !participants.is_pair(sender_id, receiver_id) {
            return Err(RelayError::InvalidRequest(
                "sender and receiver are not the participants of this conversation".into(),
            ));
        }

        let new_message = NewMessage {
            id: parley_util::snowflake::generate(1),
            conversation_id,
            sender_id,
            receiver_id,
            content,
            created_at: Utc::now(),
        };
        if let Err(err) = self.bounded(self.store.create_message(&new_message)).await {
            tracing::error!(
                sender_id,
                conversation_id,
                error = %err,
                "relay: failed to persist message"
            );
            return Err(RelayError::Persistence(err));
        }

        if let Err(err) = self
            .bounded(self.store.update_last_message(
                conversation_id,
                new_message.id,
                new_message.created_at,
            ))
            .await
        {
            tracing::warn!(
                conversation_id,
                message_id = new_message.id,
                error = %err,
                "relay: failed to update last message pointer"
            );
        }

        let message = self.populate(new_message).await;
        let delivered = match self.registry.lookup(receiver_id) {
            Some(session) => session.send(ServerEvent::ReceiveMessage(message.clone())),
            None => false,
        };
        if !delivered {
            tracing::debug!(
                receiver_id,
                message_id = message.id,
                "relay: receiver offline, stored only"
            );
        }

        Ok(SendOutcome { message, delivered })
    }

    /// Forward a typing start/stop signal. Returns whether the receiver had
    /// a live session; an absent receiver is not an error.
    pub fn relay_typing(
        &self,
        sender_id: i64,
        payload: &TypingPayload,
        started: bool,
    ) -> Result<bool, RelayError> {
        let (Some(receiver_id), Some(conversation_id)) =
            (payload.receiver_id, payload.conversation_id)
        else {
            return Err(RelayError::InvalidRequest(
                "receiver_id and conversation_id are required".into(),
            ));
        };

        let Some(session) = self.registry.lookup(receiver_id) else {
            tracing::debug!(sender_id, receiver_id, "relay: typing receiver offline");
            return Ok(false);
        };
        let notice = TypingNotice {
            user_id: sender_id,
            conversation_id,
        };
        let event = if started {
            ServerEvent::UserTyping(notice)
        } else {
            ServerEvent::UserStoppedTyping(notice)
        };
        Ok(session.send(event))
    }

    /// Read back the stored message with display fields. If that read
    /// fails the message is still sent, carrying bare ids.
    async fn populate(&self, stored: NewMessage) -> Message {
        match self.bounded(self.store.populated_message(stored.id)).await {
            Ok(Some(message)) => message,
            result => {
                if let Err(err) = result {
                    tracing::warn!(message_id = stored.id, error = %err, "relay: populate failed");
                }
                Message {
                    id: stored.id,
                    conversation_id: stored.conversation_id,
                    sender: UserSummary::bare(stored.sender_id),
                    receiver: UserSummary::bare(stored.receiver_id),
                    content: stored.content,
                    timestamp: stored.created_at,
                }
            }
        }
    }

    async fn bounded<T>(
        &self,
        fut: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        tokio::time::timeout(self.store_timeout, fut)
            .await
            .unwrap_or(Err(StoreError::TimedOut))
    }
}
