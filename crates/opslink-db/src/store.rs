use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use opslink_types::api::ActiveChat;
use opslink_types::models::{ChatMessage, User, UserSummary};

use crate::models::UserRow;
use crate::{Database, now_timestamp};

/// Asynchronous port over the SQLite store.
///
/// Session and REST code talk to this instead of the raw `Database`, so every
/// query runs off the async runtime via `spawn_blocking` and the callers never
/// carry blocking shims. Cheap to clone; all clones share one connection.
#[derive(Clone)]
pub struct ChatStore {
    db: Arc<Database>,
}

impl ChatStore {
    pub fn new(db: Database) -> Self {
        Self { db: Arc::new(db) }
    }

    async fn run<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .context("store task join error")?
    }

    // -- Users --

    /// Sync point for the externally-owned user table.
    pub async fn upsert_user(&self, id: Uuid, username: String, email: String) -> Result<()> {
        self.run(move |db| db.upsert_user(&id.to_string(), &username, &email))
            .await
    }

    pub async fn user_by_id(&self, id: Uuid) -> Result<Option<User>> {
        self.run(move |db| db.get_user_by_id(&id.to_string()))
            .await
            .map(|row| row.map(|r| user_from_row(&r)))
    }

    pub async fn search_users(&self, query: String, excluding: Uuid) -> Result<Vec<UserSummary>> {
        self.run(move |db| db.search_users(&query, &excluding.to_string(), 10))
            .await
            .map(|rows| rows.iter().map(summary_from_row).collect())
    }

    // -- Messages --

    /// Persist a new message with `is_read = false` and a store-assigned
    /// timestamp, returning the full payload ready for fan-out.
    pub async fn send_message(
        &self,
        sender: Uuid,
        receiver: Uuid,
        text: String,
    ) -> Result<ChatMessage> {
        self.run(move |db| {
            let sender_row = db
                .get_user_by_id(&sender.to_string())?
                .ok_or_else(|| anyhow!("unknown sender: {}", sender))?;
            let receiver_row = db
                .get_user_by_id(&receiver.to_string())?
                .ok_or_else(|| anyhow!("unknown receiver: {}", receiver))?;

            let id = Uuid::new_v4();
            let created_at = now_timestamp();
            db.insert_message(
                &id.to_string(),
                &sender_row.id,
                &receiver_row.id,
                &text,
                &created_at,
            )?;

            Ok(ChatMessage {
                id,
                sender: summary_from_row(&sender_row),
                receiver: summary_from_row(&receiver_row),
                text,
                timestamp: parse_timestamp(&created_at, &id.to_string()),
                is_read: false,
            })
        })
        .await
    }

    /// Conversation between `user` and `counterpart` in both directions,
    /// ascending by timestamp. A read is defined as "the receiver fetched
    /// history with this counterpart": the call bulk-marks the counterpart's
    /// unread messages to `user` as read before returning them.
    pub async fn history(&self, user: Uuid, counterpart: Uuid) -> Result<Vec<ChatMessage>> {
        self.run(move |db| {
            let rows = db.history_marking_read(&user.to_string(), &counterpart.to_string())?;

            let participant_ids = vec![user.to_string(), counterpart.to_string()];
            let users = db.get_users_by_ids(&participant_ids)?;

            let mut messages = Vec::with_capacity(rows.len());
            for row in rows {
                let sender = users.iter().find(|u| u.id == row.sender_id);
                let receiver = users.iter().find(|u| u.id == row.receiver_id);
                let (Some(sender), Some(receiver)) = (sender, receiver) else {
                    warn!(
                        "Message '{}' references a missing participant, skipping",
                        row.id
                    );
                    continue;
                };
                messages.push(ChatMessage {
                    id: parse_uuid(&row.id, "message id"),
                    sender: summary_from_row(sender),
                    receiver: summary_from_row(receiver),
                    timestamp: parse_timestamp(&row.created_at, &row.id),
                    text: row.body,
                    is_read: row.is_read,
                });
            }
            Ok(messages)
        })
        .await
    }

    pub async fn unread_count(&self, user: Uuid, counterpart: Uuid) -> Result<i64> {
        self.run(move |db| db.unread_count(&user.to_string(), &counterpart.to_string()))
            .await
    }

    /// Every counterpart `user` has exchanged at least one message with,
    /// newest conversation first.
    pub async fn active_chats(&self, user: Uuid) -> Result<Vec<ActiveChat>> {
        self.run(move |db| {
            let summaries = db.active_chats(&user.to_string())?;

            let counterpart_ids: Vec<String> =
                summaries.iter().map(|s| s.counterpart_id.clone()).collect();
            let users = db.get_users_by_ids(&counterpart_ids)?;

            let mut chats = Vec::with_capacity(summaries.len());
            for summary in summaries {
                let Some(counterpart) = users.iter().find(|u| u.id == summary.counterpart_id)
                else {
                    warn!(
                        "Active chat references missing user '{}', skipping",
                        summary.counterpart_id
                    );
                    continue;
                };
                chats.push(ActiveChat {
                    user: summary_from_row(counterpart),
                    last_message: summary.last_body,
                    unread_count: summary.unread,
                    timestamp: parse_timestamp(&summary.last_at, &summary.counterpart_id),
                });
            }
            Ok(chats)
        })
        .await
    }
}

fn summary_from_row(row: &UserRow) -> UserSummary {
    UserSummary {
        id: parse_uuid(&row.id, "user id"),
        username: row.username.clone(),
        email: row.email.clone(),
    }
}

fn user_from_row(row: &UserRow) -> User {
    User {
        id: parse_uuid(&row.id, "user id"),
        username: row.username.clone(),
        email: row.email.clone(),
        created_at: parse_timestamp(&row.created_at, &row.id),
    }
}

fn parse_uuid(raw: &str, what: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} '{}': {}", what, raw, e);
        Uuid::default()
    })
}

fn parse_timestamp(raw: &str, id: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // SQLite-assigned timestamps are "YYYY-MM-DD HH:MM:SS" without
            // timezone. Parse as naive UTC and convert.
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt created_at '{}' on row '{}': {}", raw, id, e);
            DateTime::default()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ChatStore {
        ChatStore::new(Database::open_in_memory().unwrap())
    }

    async fn seed_user(store: &ChatStore, username: &str) -> Uuid {
        let id = Uuid::new_v4();
        store
            .upsert_user(id, username.to_string(), format!("{username}@ops.local"))
            .await
            .unwrap();
        id
    }

    #[tokio::test]
    async fn send_then_history_round_trips() {
        let store = store();
        let alice = seed_user(&store, "alice").await;
        let bob = seed_user(&store, "bob").await;

        let sent = store
            .send_message(alice, bob, "hi".to_string())
            .await
            .unwrap();
        assert!(!sent.is_read);
        assert_eq!(sent.sender.id, alice);
        assert_eq!(sent.receiver.id, bob);

        // Sender's view: message exists, still unread by the counterpart.
        let from_alice = store.history(alice, bob).await.unwrap();
        assert_eq!(from_alice.len(), 1);
        assert_eq!(from_alice[0].text, "hi");
        assert!(!from_alice[0].is_read);
    }

    #[tokio::test]
    async fn history_is_ordered_and_symmetric() {
        let store = store();
        let alice = seed_user(&store, "alice").await;
        let bob = seed_user(&store, "bob").await;

        store
            .send_message(alice, bob, "one".to_string())
            .await
            .unwrap();
        store
            .send_message(bob, alice, "two".to_string())
            .await
            .unwrap();
        store
            .send_message(alice, bob, "three".to_string())
            .await
            .unwrap();

        let ab = store.history(alice, bob).await.unwrap();
        let ba = store.history(bob, alice).await.unwrap();

        let texts: Vec<&str> = ab.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["one", "two", "three"]);
        assert!(ab.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

        let ids_ab: Vec<Uuid> = ab.iter().map(|m| m.id).collect();
        let ids_ba: Vec<Uuid> = ba.iter().map(|m| m.id).collect();
        assert_eq!(ids_ab, ids_ba);
    }

    #[tokio::test]
    async fn history_marks_counterpart_messages_read() {
        let store = store();
        let alice = seed_user(&store, "alice").await;
        let bob = seed_user(&store, "bob").await;

        store
            .send_message(alice, bob, "hi".to_string())
            .await
            .unwrap();
        assert_eq!(store.unread_count(bob, alice).await.unwrap(), 1);

        // Bob reads the conversation: the returned rows already reflect the mark.
        let seen = store.history(bob, alice).await.unwrap();
        assert!(seen[0].is_read);
        assert_eq!(store.unread_count(bob, alice).await.unwrap(), 0);

        // Alice fetching her side must not unread anything.
        let again = store.history(alice, bob).await.unwrap();
        assert!(again[0].is_read);
        assert_eq!(store.unread_count(bob, alice).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn reading_one_direction_leaves_the_other_unread() {
        let store = store();
        let alice = seed_user(&store, "alice").await;
        let bob = seed_user(&store, "bob").await;

        store
            .send_message(alice, bob, "to bob".to_string())
            .await
            .unwrap();
        store
            .send_message(bob, alice, "to alice".to_string())
            .await
            .unwrap();

        store.history(bob, alice).await.unwrap();

        assert_eq!(store.unread_count(bob, alice).await.unwrap(), 0);
        // Alice has not read her incoming message yet. Bob's fetch must not
        // mark messages addressed to Alice.
        assert_eq!(store.unread_count(alice, bob).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn active_chats_lists_each_counterpart_once_sorted() {
        let store = store();
        let alice = seed_user(&store, "alice").await;
        let bob = seed_user(&store, "bob").await;
        let carol = seed_user(&store, "carol").await;

        store
            .send_message(bob, alice, "from bob".to_string())
            .await
            .unwrap();
        store
            .send_message(bob, alice, "again".to_string())
            .await
            .unwrap();
        store
            .send_message(alice, carol, "to carol".to_string())
            .await
            .unwrap();

        let chats = store.active_chats(alice).await.unwrap();
        assert_eq!(chats.len(), 2);

        // Newest conversation first: carol's message was stored last.
        assert_eq!(chats[0].user.id, carol);
        assert_eq!(chats[0].last_message, "to carol");
        assert_eq!(chats[0].unread_count, 0);

        assert_eq!(chats[1].user.id, bob);
        assert_eq!(chats[1].last_message, "again");
        assert_eq!(
            chats[1].unread_count,
            store.unread_count(alice, bob).await.unwrap()
        );
        assert!(chats[0].timestamp >= chats[1].timestamp);
    }

    #[tokio::test]
    async fn search_users_gates_short_queries_and_excludes_self() {
        let store = store();
        let annette = seed_user(&store, "annette").await;
        seed_user(&store, "anna").await;
        seed_user(&store, "bob").await;

        assert!(
            store
                .search_users("a".to_string(), annette)
                .await
                .unwrap()
                .is_empty()
        );

        let hits = store.search_users("ann".to_string(), annette).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].username, "anna");

        // Case-insensitive, matches email too.
        let by_email = store
            .search_users("BOB@OPS".to_string(), annette)
            .await
            .unwrap();
        assert_eq!(by_email.len(), 1);
        assert_eq!(by_email[0].username, "bob");
    }

    #[tokio::test]
    async fn search_users_caps_results_at_ten() {
        let store = store();
        let caller = seed_user(&store, "zcaller").await;
        for i in 0..12 {
            seed_user(&store, &format!("ann{i:02}")).await;
        }

        let hits = store.search_users("ann".to_string(), caller).await.unwrap();
        assert_eq!(hits.len(), 10);
    }

    #[tokio::test]
    async fn send_to_unknown_receiver_fails() {
        let store = store();
        let alice = seed_user(&store, "alice").await;

        let err = store
            .send_message(alice, Uuid::new_v4(), "hello?".to_string())
            .await;
        assert!(err.is_err());

        // Nothing was persisted.
        assert!(store.active_chats(alice).await.unwrap().is_empty());
    }
}
