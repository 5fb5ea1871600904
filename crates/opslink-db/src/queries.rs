use crate::models::{ChatSummaryRow, MessageRow, UserRow};
use crate::{Database, now_timestamp};
use anyhow::Result;
use rusqlite::Connection;

impl Database {
    // -- Users --

    /// Insert or refresh a user row. Users are owned by the platform's user
    /// service; this is the sync point it (and the tests) write through.
    pub fn upsert_user(&self, id: &str, username: &str, email: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, email, created_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET username = excluded.username, email = excluded.email",
                rusqlite::params![id, username, email, now_timestamp()],
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_id(conn, id))
    }

    /// Case-insensitive substring match on username/email, excluding the
    /// caller. Queries shorter than 2 characters return nothing.
    pub fn search_users(&self, query: &str, excluding: &str, limit: u32) -> Result<Vec<UserRow>> {
        let query = query.trim();
        if query.chars().count() < 2 {
            return Ok(vec![]);
        }
        self.with_conn(|conn| query_search_users(conn, query, excluding, limit))
    }

    // -- Messages --

    pub fn insert_message(
        &self,
        id: &str,
        sender_id: &str,
        receiver_id: &str,
        body: &str,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO messages (id, sender_id, receiver_id, body, is_read, created_at)
                 VALUES (?1, ?2, ?3, ?4, 0, ?5)",
                rusqlite::params![id, sender_id, receiver_id, body, created_at],
            )?;
            Ok(())
        })
    }

    /// Full conversation between `user` and `counterpart`, ascending by
    /// timestamp. Fetching history IS the read: unread messages from the
    /// counterpart are bulk-marked read in the same transaction, so the
    /// returned rows already reflect the mark. The flag only ever moves
    /// `0 -> 1` here; nothing resets it.
    pub fn history_marking_read(&self, user: &str, counterpart: &str) -> Result<Vec<MessageRow>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            tx.execute(
                "UPDATE messages SET is_read = 1
                 WHERE receiver_id = ?1 AND sender_id = ?2 AND is_read = 0",
                rusqlite::params![user, counterpart],
            )?;

            let rows = query_conversation(&tx, user, counterpart)?;
            tx.commit()?;
            Ok(rows)
        })
    }

    pub fn unread_count(&self, user: &str, counterpart: &str) -> Result<i64> {
        self.with_conn(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM messages
                 WHERE receiver_id = ?1 AND sender_id = ?2 AND is_read = 0",
                rusqlite::params![user, counterpart],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    /// One row per counterpart `user` has exchanged at least one message
    /// with: latest message body/timestamp plus the unread tally, newest
    /// conversation first. Single window-function query, no per-counterpart
    /// round trips.
    pub fn active_chats(&self, user: &str) -> Result<Vec<ChatSummaryRow>> {
        self.with_conn(|conn| query_active_chats(conn, user))
    }

    /// Batch-fetch users for a set of ids (counterpart names for summaries).
    pub fn get_users_by_ids(&self, ids: &[String]) -> Result<Vec<UserRow>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT id, username, email, created_at FROM users WHERE id IN ({})",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::types::ToSql> = ids
                .iter()
                .map(|id| id as &dyn rusqlite::types::ToSql)
                .collect();

            let rows = stmt
                .query_map(params.as_slice(), user_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }
}

fn user_from_row(row: &rusqlite::Row<'_>) -> std::result::Result<UserRow, rusqlite::Error> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn query_user_by_id(conn: &Connection, id: &str) -> Result<Option<UserRow>> {
    let mut stmt =
        conn.prepare("SELECT id, username, email, created_at FROM users WHERE id = ?1")?;

    let row = stmt.query_row([id], user_from_row).optional()?;

    Ok(row)
}

fn query_search_users(
    conn: &Connection,
    query: &str,
    excluding: &str,
    limit: u32,
) -> Result<Vec<UserRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, username, email, created_at FROM users
         WHERE id != ?1
           AND (LOWER(username) LIKE '%' || LOWER(?2) || '%'
             OR LOWER(email) LIKE '%' || LOWER(?2) || '%')
         ORDER BY username
         LIMIT ?3",
    )?;

    let rows = stmt
        .query_map(rusqlite::params![excluding, query, limit], user_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn query_conversation(conn: &Connection, user: &str, counterpart: &str) -> Result<Vec<MessageRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, sender_id, receiver_id, body, is_read, created_at
         FROM messages
         WHERE (sender_id = ?1 AND receiver_id = ?2)
            OR (sender_id = ?2 AND receiver_id = ?1)
         ORDER BY created_at ASC, id ASC",
    )?;

    let rows = stmt
        .query_map(rusqlite::params![user, counterpart], |row| {
            Ok(MessageRow {
                id: row.get(0)?,
                sender_id: row.get(1)?,
                receiver_id: row.get(2)?,
                body: row.get(3)?,
                is_read: row.get(4)?,
                created_at: row.get(5)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn query_active_chats(conn: &Connection, user: &str) -> Result<Vec<ChatSummaryRow>> {
    let mut stmt = conn.prepare(
        "SELECT counterpart_id, body, created_at, unread
         FROM (
             SELECT
                 CASE WHEN m.sender_id = ?1 THEN m.receiver_id ELSE m.sender_id END AS counterpart_id,
                 m.body AS body,
                 m.created_at AS created_at,
                 ROW_NUMBER() OVER (
                     PARTITION BY CASE WHEN m.sender_id = ?1 THEN m.receiver_id ELSE m.sender_id END
                     ORDER BY m.created_at DESC, m.id DESC
                 ) AS rn,
                 SUM(CASE WHEN m.receiver_id = ?1 AND m.is_read = 0 THEN 1 ELSE 0 END) OVER (
                     PARTITION BY CASE WHEN m.sender_id = ?1 THEN m.receiver_id ELSE m.sender_id END
                 ) AS unread
             FROM messages m
             WHERE m.sender_id = ?1 OR m.receiver_id = ?1
         )
         WHERE rn = 1
         ORDER BY created_at DESC",
    )?;

    let rows = stmt
        .query_map([user], |row| {
            Ok(ChatSummaryRow {
                counterpart_id: row.get(0)?,
                last_body: row.get(1)?,
                last_at: row.get(2)?,
                unread: row.get(3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
