//! The durable side of the message relay.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parley_db::DbPool;
use parley_models::conversation::ParticipantPair;
use parley_models::message::Message;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] parley_db::DbError),
    #[error("store call timed out")]
    TimedOut,
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub id: i64,
    pub conversation_id: i64,
    pub sender_id: i64,
    pub receiver_id: i64,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Participants of `conversation_id`, or `None` if it does not exist.
    async fn conversation_participants(
        &self,
        conversation_id: i64,
    ) -> Result<Option<ParticipantPair>, StoreError>;

    async fn create_message(&self, message: &NewMessage) -> Result<(), StoreError>;

    async fn update_last_message(
        &self,
        conversation_id: i64,
        message_id: i64,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// The stored message with sender and receiver display fields filled in.
    async fn populated_message(&self, message_id: i64) -> Result<Option<Message>, StoreError>;
}

/// [`MessageStore`] backed by the SQL pool.
#[derive(Clone)]
pub struct SqlMessageStore {
    pool: DbPool,
}

impl SqlMessageStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageStore for SqlMessageStore {
    async fn conversation_participants(
        &self,
        conversation_id: i64,
    ) -> Result<Option<ParticipantPair>, StoreError> {
        let row = parley_db::conversations::get_conversation(&self.pool, conversation_id).await?;
        Ok(row.map(|c| c.participants))
    }

    async fn create_message(&self, message: &NewMessage) -> Result<(), StoreError> {
        parley_db::messages::create_message(
            &self.pool,
            message.id,
            message.conversation_id,
            message.sender_id,
            message.receiver_id,
            &message.content,
            message.created_at,
        )
        .await?;
        Ok(())
    }

    async fn update_last_message(
        &self,
        conversation_id: i64,
        message_id: i64,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        parley_db::conversations::update_last_message(&self.pool, conversation_id, message_id, at)
            .await?;
        Ok(())
    }

    async fn populated_message(&self, message_id: i64) -> Result<Option<Message>, StoreError> {
        let row = parley_db::messages::get_populated_message(&self.pool, message_id).await?;
        Ok(row.map(|r| r.into_model()))
    }
}
