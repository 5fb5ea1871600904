/// Database row types — these map directly to SQLite rows.
/// Distinct from the opslink-types API models to keep the DB layer independent.

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub email: String,
    pub created_at: String,
}

pub struct MessageRow {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub body: String,
    pub is_read: bool,
    pub created_at: String,
}

/// One aggregated conversation row for the active-chats listing.
pub struct ChatSummaryRow {
    pub counterpart_id: String,
    pub last_body: String,
    pub last_at: String,
    pub unread: i64,
}
