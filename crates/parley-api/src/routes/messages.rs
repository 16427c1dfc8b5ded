use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use parley_core::relay::RelayError;
use parley_core::AppState;
use parley_models::conversation::Conversation;
use parley_models::gateway::SendMessagePayload;
use parley_models::message::Message;
use parley_models::user::User;
use serde_json::json;

use crate::error::ApiError;
use crate::middleware::AuthUser;

/// Everyone the caller could start a conversation with.
pub async fn list_users(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<User>>, ApiError> {
    let users = parley_db::users::list_users_except(&state.db, auth.user_id).await?;
    Ok(Json(users.iter().map(|u| u.to_model()).collect()))
}

pub async fn list_conversations(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<Conversation>>, ApiError> {
    let conversations =
        parley_core::conversation::list_conversations(&state.db, auth.user_id).await?;
    Ok(Json(conversations))
}

pub async fn open_conversation(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(other_id): Path<i64>,
) -> Result<Json<Conversation>, ApiError> {
    let conversation =
        parley_core::conversation::open_conversation(&state.db, auth.user_id, other_id).await?;
    Ok(Json(conversation))
}

pub async fn conversation_history(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(conversation_id): Path<i64>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let messages =
        parley_core::conversation::conversation_history(&state.db, auth.user_id, conversation_id)
            .await?;
    Ok(Json(messages))
}

/// HTTP fallback for clients without a gateway session. The response body
/// is the sender's acknowledgment, so no `message-sent` is pushed. Sends
/// draw from the same per-user budget as gateway events.
pub async fn send_message(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<SendMessagePayload>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.event_limiter.check(auth.user_id) {
        return Err(RelayError::RateLimited.into());
    }
    let outcome = state.relay.persist_and_deliver(auth.user_id, body).await?;
    tracing::debug!(
        user_id = auth.user_id,
        message_id = outcome.message.id,
        delivered = outcome.delivered,
        "api: message sent over http"
    );
    Ok((StatusCode::CREATED, Json(json!({ "message": outcome.message }))))
}
