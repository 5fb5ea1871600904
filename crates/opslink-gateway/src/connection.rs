use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use opslink_db::ChatStore;
use opslink_types::events::{CLOSE_UNAUTHENTICATED, ClientFrame, ServerFrame};
use opslink_types::models::room_key;

use crate::error::GatewayError;
use crate::notify::Notifier;
use crate::registry::{RoomRegistry, outbound_channel};
use crate::verifier::IdentityVerifier;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Everything a session needs from the composition root.
#[derive(Clone)]
pub struct SessionDeps {
    pub store: ChatStore,
    pub registry: RoomRegistry,
    pub notifier: Notifier,
    pub verifier: IdentityVerifier,
}

/// Identity of one live connection, fixed at handshake time.
struct Session {
    conn_id: Uuid,
    user_id: Uuid,
    username: String,
    counterpart_id: Uuid,
    room_key: String,
}

/// Outcome of a successful handshake.
#[derive(Debug)]
pub struct Handshake {
    pub user_id: Uuid,
    pub username: String,
    pub counterpart_id: Uuid,
    pub room_key: String,
}

/// Validate the credential and counterpart path segment presented at connect
/// time. Runs before any room registration, so a failure here means no
/// session ever existed.
pub fn resolve_handshake(
    verifier: &IdentityVerifier,
    credential: Option<&str>,
    counterpart: &str,
) -> Result<Handshake, GatewayError> {
    let token = credential.ok_or(GatewayError::Unauthenticated("missing credential"))?;
    let claims = verifier.verify(token)?;

    let counterpart_id: Uuid = counterpart
        .parse()
        .map_err(|_| GatewayError::Unauthenticated("malformed counterpart id"))?;

    Ok(Handshake {
        room_key: room_key(claims.sub, counterpart_id),
        user_id: claims.sub,
        username: claims.username,
        counterpart_id,
    })
}

/// Drive one WebSocket connection through its whole life:
/// handshake -> subscribed -> receive loop -> unsubscribe.
///
/// A failed handshake closes with the reserved 4001 code and registers
/// nothing. A dropped connection is terminal: reconnecting means a brand-new
/// handshake, and anything missed in between is only recoverable via the
/// history endpoint.
pub async fn handle_connection(
    mut socket: WebSocket,
    deps: SessionDeps,
    credential: Option<String>,
    counterpart: String,
) {
    let handshake = match resolve_handshake(&deps.verifier, credential.as_deref(), &counterpart) {
        Ok(handshake) => handshake,
        Err(e) => {
            warn!("WebSocket handshake rejected: {}", e);
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: CLOSE_UNAUTHENTICATED,
                    reason: Utf8Bytes::from_static("unauthenticated"),
                })))
                .await;
            return;
        }
    };

    let session = Arc::new(Session {
        conn_id: Uuid::new_v4(),
        user_id: handshake.user_id,
        username: handshake.username,
        counterpart_id: handshake.counterpart_id,
        room_key: handshake.room_key,
    });

    // Acceptance implies subscription: the session is in the room before the
    // first frame is read.
    let (tx, rx) = outbound_channel();
    deps.registry
        .join(&session.room_key, session.conn_id, tx.clone())
        .await;

    info!(
        "{} ({}) subscribed to {}",
        session.username, session.user_id, session.room_key
    );

    run_session_loop(socket, deps.clone(), session.clone(), tx, rx).await;

    deps.registry.leave(&session.room_key, session.conn_id).await;
    info!(
        "{} ({}) disconnected from {}",
        session.username, session.user_id, session.room_key
    );
}

async fn run_session_loop(
    socket: WebSocket,
    deps: SessionDeps,
    session: Arc<Session>,
    tx: mpsc::Sender<Utf8Bytes>,
    mut rx: mpsc::Receiver<Utf8Bytes>,
) {
    let (mut sender, mut receiver) = socket.split();

    // Shared flag for heartbeat
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward room traffic -> client, with heartbeat.
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                frame = rx.recv() => {
                    let Some(frame) = frame else { break };
                    if sender.send(Message::Text(frame)).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read frames from client.
    let recv_session = session.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    handle_text_frame(&deps, &recv_session, &tx, text.as_str()).await;
                }
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish; closing the transport cancels the
    // receive loop (in-flight store writes run to completion inside the
    // store's blocking pool).
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
}

/// Parse and dispatch one inbound text frame. Every failure is converted to
/// an error frame for this sender only; nothing here closes the connection.
async fn handle_text_frame(
    deps: &SessionDeps,
    session: &Session,
    self_tx: &mpsc::Sender<Utf8Bytes>,
    raw: &str,
) {
    let frame = match serde_json::from_str::<ClientFrame>(raw) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(
                "{} ({}) bad frame: {} -- raw: {}",
                session.username,
                session.user_id,
                e,
                &raw[..raw.len().min(200)]
            );
            send_error(self_tx, &GatewayError::InvalidFrame(e.to_string()));
            return;
        }
    };

    match frame {
        ClientFrame::ChatMessage { receiver_id, text } => {
            if let Err(e) = handle_chat_message(deps, session, receiver_id, text).await {
                warn!(
                    "{} ({}) chat_message failed: {}",
                    session.username, session.user_id, e
                );
                send_error(self_tx, &e);
            }
        }
        ClientFrame::Unknown => {
            debug!(
                "{} ({}) sent an unhandled frame type, ignoring",
                session.username, session.user_id
            );
        }
    }
}

/// Persist and fan out one message.
///
/// Persist and publish are two separate steps: a failure after the insert
/// leaves the message durably stored but undelivered live, recoverable only
/// through a later history fetch (at-least-persisted, best-effort-delivered).
async fn handle_chat_message(
    deps: &SessionDeps,
    session: &Session,
    receiver_id: Uuid,
    text: String,
) -> Result<(), GatewayError> {
    // One socket, one conversation: the receiver must be the counterpart the
    // handshake authorized. Messaging a third party takes the socket the
    // client would need anyway to hear replies.
    if receiver_id != session.counterpart_id {
        return Err(GatewayError::InvalidFrame(format!(
            "receiver {} is not the counterpart of this conversation",
            receiver_id
        )));
    }

    let text = text.trim().to_string();
    if text.is_empty() {
        return Err(GatewayError::InvalidFrame(
            "text must not be empty".to_string(),
        ));
    }

    let receiver = deps
        .store
        .user_by_id(receiver_id)
        .await
        .map_err(GatewayError::Persistence)?
        .ok_or_else(|| GatewayError::InvalidFrame(format!("unknown receiver: {receiver_id}")))?;

    let message = deps
        .store
        .send_message(session.user_id, receiver.id, text)
        .await
        .map_err(GatewayError::Persistence)?;

    deps.notifier.message_created(&message);

    // Canonical key recomputed from the actual pair; with the counterpart
    // check above it always equals the session's bound key.
    let key = room_key(session.user_id, receiver.id);
    let payload = serde_json::to_string(&ServerFrame::Message(message))
        .map_err(|e| GatewayError::Persistence(e.into()))?;

    let delivered = deps.registry.publish(&key, payload.into()).await;
    debug!("Fanned out message to {} session(s) in {}", delivered, key);

    Ok(())
}

fn send_error(self_tx: &mpsc::Sender<Utf8Bytes>, error: &GatewayError) {
    let frame = ServerFrame::error(error.code(), error.to_string());
    match serde_json::to_string(&frame) {
        Ok(json) => {
            if self_tx.try_send(json.into()).is_err() {
                warn!("Could not enqueue error frame, session queue full or closed");
            }
        }
        Err(e) => warn!("Failed to serialize error frame: {}", e),
    }
}
