use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::Utf8Bytes;
use tokio::sync::{RwLock, mpsc};
use tracing::warn;
use uuid::Uuid;

/// Capacity of one session's outbound queue. `publish` never waits on a
/// subscriber: once the queue is full, further frames for that session are
/// dropped until it drains (the client recovers missed messages via history).
pub const OUTBOUND_QUEUE: usize = 64;

/// Create the outbound channel a session hands to `join`.
pub fn outbound_channel() -> (mpsc::Sender<Utf8Bytes>, mpsc::Receiver<Utf8Bytes>) {
    mpsc::channel(OUTBOUND_QUEUE)
}

/// In-memory mapping from canonical room keys to the sessions currently
/// subscribed to them.
///
/// Purely transient: nothing survives a restart; state is rebuilt as
/// connections re-handshake. Cheap-clone handle over shared state, injected
/// from the composition root rather than living in a global. Publishing only
/// takes the read lock, so fan-out on unrelated rooms proceeds concurrently;
/// join/leave hold the write lock just long enough to touch one entry.
#[derive(Clone, Default)]
pub struct RoomRegistry {
    rooms: Arc<RwLock<HashMap<String, HashMap<Uuid, mpsc::Sender<Utf8Bytes>>>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a session's outbound channel under `room_key`.
    pub async fn join(&self, room_key: &str, conn_id: Uuid, tx: mpsc::Sender<Utf8Bytes>) {
        let mut rooms = self.rooms.write().await;
        rooms.entry(room_key.to_string()).or_default().insert(conn_id, tx);
    }

    /// Remove a session from `room_key`. Idempotent; empty rooms are dropped.
    pub async fn leave(&self, room_key: &str, conn_id: Uuid) {
        let mut rooms = self.rooms.write().await;
        if let Some(sessions) = rooms.get_mut(room_key) {
            sessions.remove(&conn_id);
            if sessions.is_empty() {
                rooms.remove(room_key);
            }
        }
    }

    /// Deliver `payload` to every session subscribed to `room_key` at the
    /// time of the call. Returns the number of sessions that accepted the
    /// frame. A full or closed queue drops the frame for that session only;
    /// one slow client never stalls fan-out to the rest.
    pub async fn publish(&self, room_key: &str, payload: Utf8Bytes) -> usize {
        let rooms = self.rooms.read().await;
        let Some(sessions) = rooms.get(room_key) else {
            return 0;
        };

        let mut delivered = 0;
        for (conn_id, tx) in sessions.iter() {
            match tx.try_send(payload.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        "Outbound queue full for session {} in {}, dropping frame",
                        conn_id, room_key
                    );
                }
                // Session is tearing down; its leave() will clean up.
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        delivered
    }

    /// Number of sessions currently subscribed to `room_key`.
    pub async fn room_size(&self, room_key: &str) -> usize {
        self.rooms
            .read()
            .await
            .get(room_key)
            .map(|sessions| sessions.len())
            .unwrap_or(0)
    }
}
