use crate::{datetime_from_db_text, datetime_to_db_text, DbError, DbPool};
use chrono::{DateTime, Utc};
use parley_models::message::Message;
use parley_models::user::UserSummary;
use sqlx::Row;

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: i64,
    pub conversation_id: i64,
    pub sender_id: i64,
    pub receiver_id: i64,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::any::AnyRow> for MessageRow {
    fn from_row(row: &'r sqlx::any::AnyRow) -> Result<Self, sqlx::Error> {
        let created_at_raw: String = row.try_get("created_at")?;
        Ok(Self {
            id: row.try_get("id")?,
            conversation_id: row.try_get("conversation_id")?,
            sender_id: row.try_get("sender_id")?,
            receiver_id: row.try_get("receiver_id")?,
            content: row.try_get("content")?,
            created_at: datetime_from_db_text(&created_at_raw)?,
        })
    }
}

/// A message joined with the display fields of its sender and receiver.
#[derive(Debug, Clone)]
pub struct PopulatedMessageRow {
    pub message: MessageRow,
    pub sender_name: Option<String>,
    pub sender_email: Option<String>,
    pub receiver_name: Option<String>,
    pub receiver_email: Option<String>,
}

impl<'r> sqlx::FromRow<'r, sqlx::any::AnyRow> for PopulatedMessageRow {
    fn from_row(row: &'r sqlx::any::AnyRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            message: MessageRow::from_row(row)?,
            sender_name: row.try_get("sender_name")?,
            sender_email: row.try_get("sender_email")?,
            receiver_name: row.try_get("receiver_name")?,
            receiver_email: row.try_get("receiver_email")?,
        })
    }
}

impl PopulatedMessageRow {
    pub fn into_model(self) -> Message {
        Message {
            id: self.message.id,
            conversation_id: self.message.conversation_id,
            sender: UserSummary {
                id: self.message.sender_id,
                name: self.sender_name,
                email: self.sender_email,
            },
            receiver: UserSummary {
                id: self.message.receiver_id,
                name: self.receiver_name,
                email: self.receiver_email,
            },
            content: self.message.content,
            timestamp: self.message.created_at,
        }
    }
}

const POPULATED_SELECT: &str =
    "SELECT m.id, m.conversation_id, m.sender_id, m.receiver_id, m.content, m.created_at,
            s.name AS sender_name, s.email AS sender_email,
            r.name AS receiver_name, r.email AS receiver_email
     FROM messages m
     LEFT JOIN users s ON s.id = m.sender_id
     LEFT JOIN users r ON r.id = m.receiver_id";

pub async fn create_message(
    pool: &DbPool,
    id: i64,
    conversation_id: i64,
    sender_id: i64,
    receiver_id: i64,
    content: &str,
    created_at: DateTime<Utc>,
) -> Result<MessageRow, DbError> {
    let row = sqlx::query_as::<_, MessageRow>(
        "INSERT INTO messages (id, conversation_id, sender_id, receiver_id, content, created_at)
         VALUES ($1, $2, $3, $4, $5, $6)
         RETURNING id, conversation_id, sender_id, receiver_id, content, created_at",
    )
    .bind(id)
    .bind(conversation_id)
    .bind(sender_id)
    .bind(receiver_id)
    .bind(content)
    .bind(datetime_to_db_text(created_at))
    .fetch_one(pool)
    .await?;
    Ok(row)
}

pub async fn get_populated_message(
    pool: &DbPool,
    id: i64,
) -> Result<Option<PopulatedMessageRow>, DbError> {
    let row = sqlx::query_as::<_, PopulatedMessageRow>(&format!(
        "{POPULATED_SELECT} WHERE m.id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Full history of a conversation, oldest first.
pub async fn list_conversation_messages(
    pool: &DbPool,
    conversation_id: i64,
) -> Result<Vec<PopulatedMessageRow>, DbError> {
    let rows = sqlx::query_as::<_, PopulatedMessageRow>(&format!(
        "{POPULATED_SELECT} WHERE m.conversation_id = $1 ORDER BY m.created_at ASC, m.id ASC"
    ))
    .bind(conversation_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn count_conversation_messages(
    pool: &DbPool,
    conversation_id: i64,
) -> Result<i64, DbError> {
    let (count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM messages WHERE conversation_id = $1")
            .bind(conversation_id)
            .fetch_one(pool)
            .await?;
    Ok(count)
}
