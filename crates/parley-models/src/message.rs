use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::user::UserSummary;

/// A persisted chat message with sender and receiver display fields filled in.
///
/// This is the record delivered as `receive-message` / `message-sent` and
/// returned from the history endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(with = "crate::id")]
    pub id: i64,
    #[serde(with = "crate::id")]
    pub conversation_id: i64,
    pub sender: UserSummary,
    pub receiver: UserSummary,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}
