use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::Message;
use crate::user::UserSummary;

/// Unordered pair of two distinct users.
///
/// Stored normalized as `(low, high)` so that `{a, b}` and `{b, a}` compare
/// equal and a self-pair cannot be constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParticipantPair {
    low: i64,
    high: i64,
}

impl ParticipantPair {
    pub fn new(a: i64, b: i64) -> Option<Self> {
        if a == b {
            return None;
        }
        Some(Self {
            low: a.min(b),
            high: a.max(b),
        })
    }

    pub fn low(&self) -> i64 {
        self.low
    }

    pub fn high(&self) -> i64 {
        self.high
    }

    pub fn contains(&self, user_id: i64) -> bool {
        self.low == user_id || self.high == user_id
    }

    /// The participant that is not `user_id`, if `user_id` is in the pair.
    pub fn other(&self, user_id: i64) -> Option<i64> {
        if user_id == self.low {
            Some(self.high)
        } else if user_id == self.high {
            Some(self.low)
        } else {
            None
        }
    }

    /// True when `{a, b}` is exactly this pair.
    pub fn is_pair(&self, a: i64, b: i64) -> bool {
        Self::new(a, b).is_some_and(|other| other == *self)
    }
}

/// Conversation summary as returned to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    #[serde(with = "crate::id")]
    pub id: i64,
    pub participants: Vec<UserSummary>,
    pub last_message: Option<Message>,
    pub last_message_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::ParticipantPair;

    #[test]
    fn pair_is_unordered() {
        assert_eq!(ParticipantPair::new(1, 2), ParticipantPair::new(2, 1));
    }

    #[test]
    fn self_pair_is_rejected() {
        assert!(ParticipantPair::new(5, 5).is_none());
    }

    #[test]
    fn other_and_membership() {
        let pair = ParticipantPair::new(9, 3).unwrap();
        assert_eq!(pair.low(), 3);
        assert_eq!(pair.high(), 9);
        assert_eq!(pair.other(3), Some(9));
        assert_eq!(pair.other(9), Some(3));
        assert_eq!(pair.other(4), None);
        assert!(pair.is_pair(9, 3));
        assert!(!pair.is_pair(9, 4));
        assert!(!pair.is_pair(9, 9));
    }
}
