use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A platform user. Provisioned by the external user service; the messaging
/// core only references users by id and mirrors the columns it needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

/// Compact user representation embedded in message payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub username: String,
    pub email: String,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
        }
    }
}

/// A direct message between two users. Immutable once stored except for
/// `is_read`, which only ever flips `false -> true` when the receiver fetches
/// the history containing it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub sender: UserSummary,
    pub receiver: UserSummary,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub is_read: bool,
}

/// Canonical room key for the pairwise conversation between two users.
///
/// Participants are sorted by their hyphenated UUID string, so both sides of a
/// conversation derive the same key regardless of who connected first:
/// `room_key(a, b) == room_key(b, a)`.
pub fn room_key(a: Uuid, b: Uuid) -> String {
    let mut ids = [a.to_string(), b.to_string()];
    ids.sort();
    format!("chat_{}_{}", ids[0], ids[1])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_key_is_symmetric() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(room_key(a, b), room_key(b, a));
    }

    #[test]
    fn room_key_is_prefixed_and_sorted() {
        let a: Uuid = "00000000-0000-0000-0000-000000000001".parse().unwrap();
        let b: Uuid = "00000000-0000-0000-0000-000000000002".parse().unwrap();
        let key = room_key(b, a);
        assert_eq!(
            key,
            "chat_00000000-0000-0000-0000-000000000001_00000000-0000-0000-0000-000000000002"
        );
    }

    #[test]
    fn distinct_pairs_get_distinct_keys() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        assert_ne!(room_key(a, b), room_key(a, c));
    }
}
