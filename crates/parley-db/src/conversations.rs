use crate::{datetime_from_db_text, datetime_to_db_text, is_unique_violation, DbError, DbPool};
use chrono::{DateTime, Utc};
use parley_models::conversation::ParticipantPair;
use sqlx::Row;

const CONVERSATION_COLUMNS: &str =
    "id, user_low, user_high, last_message_id, last_message_at, created_at";

#[derive(Debug, Clone)]
pub struct ConversationRow {
    pub id: i64,
    pub participants: ParticipantPair,
    pub last_message_id: Option<i64>,
    pub last_message_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::any::AnyRow> for ConversationRow {
    fn from_row(row: &'r sqlx::any::AnyRow) -> Result<Self, sqlx::Error> {
        let user_low: i64 = row.try_get("user_low")?;
        let user_high: i64 = row.try_get("user_high")?;
        let participants = ParticipantPair::new(user_low, user_high).ok_or_else(|| {
            sqlx::Error::Protocol(format!("conversation pairs user {user_low} with itself"))
        })?;
        let last_message_at_raw: String = row.try_get("last_message_at")?;
        let created_at_raw: String = row.try_get("created_at")?;
        Ok(Self {
            id: row.try_get("id")?,
            participants,
            last_message_id: row.try_get("last_message_id")?,
            last_message_at: datetime_from_db_text(&last_message_at_raw)?,
            created_at: datetime_from_db_text(&created_at_raw)?,
        })
    }
}

pub async fn get_conversation(pool: &DbPool, id: i64) -> Result<Option<ConversationRow>, DbError> {
    let row = sqlx::query_as::<_, ConversationRow>(&format!(
        "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn find_conversation_between(
    pool: &DbPool,
    pair: ParticipantPair,
) -> Result<Option<ConversationRow>, DbError> {
    let row = sqlx::query_as::<_, ConversationRow>(&format!(
        "SELECT {CONVERSATION_COLUMNS} FROM conversations
         WHERE user_low = $1 AND user_high = $2"
    ))
    .bind(pair.low())
    .bind(pair.high())
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Return the conversation for `pair`, creating it with `id` if none exists.
///
/// Two concurrent first contacts race on the unique pair constraint; the
/// loser re-reads and returns the winner's row.
pub async fn get_or_create_conversation(
    pool: &DbPool,
    id: i64,
    pair: ParticipantPair,
) -> Result<ConversationRow, DbError> {
    if let Some(existing) = find_conversation_between(pool, pair).await? {
        return Ok(existing);
    }

    let now = datetime_to_db_text(Utc::now());
    let inserted = sqlx::query_as::<_, ConversationRow>(&format!(
        "INSERT INTO conversations (id, user_low, user_high, last_message_id, last_message_at, created_at)
         VALUES ($1, $2, $3, NULL, $4, $5)
         RETURNING {CONVERSATION_COLUMNS}"
    ))
    .bind(id)
    .bind(pair.low())
    .bind(pair.high())
    .bind(&now)
    .bind(&now)
    .fetch_one(pool)
    .await;

    match inserted {
        Ok(row) => Ok(row),
        Err(err) if is_unique_violation(&err) => find_conversation_between(pool, pair)
            .await?
            .ok_or(DbError::Sqlx(err)),
        Err(err) => Err(DbError::Sqlx(err)),
    }
}

/// Conversations `user_id` takes part in, most recently active first.
pub async fn list_user_conversations(
    pool: &DbPool,
    user_id: i64,
) -> Result<Vec<ConversationRow>, DbError> {
    let rows = sqlx::query_as::<_, ConversationRow>(&format!(
        "SELECT {CONVERSATION_COLUMNS} FROM conversations
         WHERE user_low = $1 OR user_high = $1
         ORDER BY last_message_at DESC, id DESC"
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Point the conversation at its newest message. Returns `DbError::NotFound`
/// if the conversation row is gone.
pub async fn update_last_message(
    pool: &DbPool,
    conversation_id: i64,
    message_id: i64,
    message_at: DateTime<Utc>,
) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE conversations SET last_message_id = $1, last_message_at = $2 WHERE id = $3",
    )
    .bind(message_id)
    .bind(datetime_to_db_text(message_at))
    .bind(conversation_id)
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }
    Ok(())
}
