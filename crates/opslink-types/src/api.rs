use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::UserSummary;

// -- JWT Claims --

/// JWT claims shared across opslink-api (REST middleware) and opslink-gateway
/// (WebSocket handshake). Canonical definition lives here in opslink-types to
/// eliminate duplication. Tokens are issued by the platform's auth service;
/// the messaging core only validates them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: usize,
}

// -- Active chats --

/// One entry of `GET /chats/active_chats`: a counterpart the caller has
/// exchanged at least one message with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveChat {
    pub user: UserSummary,
    pub last_message: String,
    pub unread_count: i64,
    pub timestamp: DateTime<Utc>,
}
