use std::collections::HashMap;

use parley_db::conversations::ConversationRow;
use parley_db::users::UserRow;
use parley_db::DbPool;
use parley_models::conversation::{Conversation, ParticipantPair};
use parley_models::message::Message;
use parley_models::user::UserSummary;

use crate::error::CoreError;

/// Get or create the conversation between `user_id` and `other_id`.
pub async fn open_conversation(
    pool: &DbPool,
    user_id: i64,
    other_id: i64,
) -> Result<Conversation, CoreError> {
    let pair = ParticipantPair::new(user_id, other_id)
        .ok_or_else(|| CoreError::BadRequest("Cannot open a conversation with yourself".into()))?;
    parley_db::users::get_user_by_id(pool, other_id)
        .await?
        .ok_or(CoreError::NotFound)?;

    let row = parley_db::conversations::get_or_create_conversation(
        pool,
        parley_util::snowflake::generate(1),
        pair,
    )
    .await?;
    let mut users = HashMap::new();
    populate(pool, row, &mut users).await
}

/// Conversations `user_id` takes part in, most recently active first.
pub async fn list_conversations(
    pool: &DbPool,
    user_id: i64,
) -> Result<Vec<Conversation>, CoreError> {
    let rows = parley_db::conversations::list_user_conversations(pool, user_id).await?;
    let mut users = HashMap::new();
    let mut conversations = Vec::with_capacity(rows.len());
    for row in rows {
        conversations.push(populate(pool, row, &mut users).await?);
    }
    Ok(conversations)
}

/// Full history of a conversation. Non-participants get `NotFound` so the
/// existence of other people's conversations is not revealed.
pub async fn conversation_history(
    pool: &DbPool,
    user_id: i64,
    conversation_id: i64,
) -> Result<Vec<Message>, CoreError> {
    let conversation = parley_db::conversations::get_conversation(pool, conversation_id)
        .await?
        .ok_or(CoreError::NotFound)?;
    if !conversation.participants.contains(user_id) {
        return Err(CoreError::NotFound);
    }
    let rows = parley_db::messages::list_conversation_messages(pool, conversation_id).await?;
    Ok(rows.into_iter().map(|r| r.into_model()).collect())
}

async fn populate(
    pool: &DbPool,
    row: ConversationRow,
    users: &mut HashMap<i64, Option<UserRow>>,
) -> Result<Conversation, CoreError> {
    let mut participants = Vec::with_capacity(2);
    for id in [row.participants.low(), row.participants.high()] {
        if !users.contains_key(&id) {
            let user = parley_db::users::get_user_by_id(pool, id).await?;
            users.insert(id, user);
        }
        let summary = match users.get(&id) {
            Some(Some(user)) => user.summary(),
            _ => UserSummary::bare(id),
        };
        participants.push(summary);
    }

    let last_message = match row.last_message_id {
        Some(message_id) => parley_db::messages::get_populated_message(pool, message_id)
            .await?
            .map(|m| m.into_model()),
        None => None,
    };

    Ok(Conversation {
        id: row.id,
        participants,
        last_message,
        last_message_at: row.last_message_at,
        created_at: row.created_at,
    })
}
