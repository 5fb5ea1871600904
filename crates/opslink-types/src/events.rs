use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::ChatMessage;

/// Reserved WebSocket close code for a failed handshake: missing/invalid
/// credential or a malformed counterpart path segment.
pub const CLOSE_UNAUTHENTICATED: u16 = 4001;

/// Frames sent FROM client TO server over the chat socket.
///
/// Exhaustive by construction: every frame kind has exactly one variant and
/// one handler. Tags the wire has no variant for land in `Unknown` and are
/// ignored without erroring the connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    /// Send a message to the counterpart of this conversation.
    #[serde(rename = "chat_message")]
    ChatMessage { receiver_id: Uuid, text: String },

    #[serde(other)]
    Unknown,
}

/// Frames sent FROM server TO client over the chat socket.
///
/// A delivered message is forwarded as the bare serialized message object;
/// failures are reported to the offending sender as an `{error, detail}`
/// object. Untagged so the message payload stays byte-identical to the REST
/// representation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerFrame {
    Message(ChatMessage),
    Error(ErrorFrame),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorFrame {
    pub error: String,
    pub detail: String,
}

impl ServerFrame {
    pub fn error(code: &str, detail: impl Into<String>) -> Self {
        Self::Error(ErrorFrame {
            error: code.to_string(),
            detail: detail.into(),
        })
    }
}

/// Fire-and-forget event handed to the external notification/email pipeline
/// when a message is persisted. The send path never awaits the consumer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageCreated {
    pub message_id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
}
