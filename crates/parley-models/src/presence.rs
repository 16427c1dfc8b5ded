use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceNotice {
    #[serde(with = "crate::id")]
    pub user_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingNotice {
    #[serde(with = "crate::id")]
    pub user_id: i64,
    #[serde(with = "crate::id")]
    pub conversation_id: i64,
}
