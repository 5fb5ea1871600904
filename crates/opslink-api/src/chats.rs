use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use tracing::error;
use uuid::Uuid;

use opslink_types::api::{ActiveChat, Claims};
use opslink_types::models::{ChatMessage, UserSummary};

use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

/// `GET /chats/{counterpart_id}/history`
///
/// Full conversation with the counterpart, ascending by timestamp. Fetching
/// is the read: the counterpart's unread messages to the caller are marked
/// read as a side effect.
pub async fn get_history(
    State(state): State<AppState>,
    Path(counterpart_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<ChatMessage>>, StatusCode> {
    let messages = state
        .store
        .history(claims.sub, counterpart_id)
        .await
        .map_err(|e| {
            error!("History query failed for {}: {:#}", claims.sub, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(Json(messages))
}

/// `GET /chats/active_chats`
///
/// Every counterpart the caller has exchanged at least one message with,
/// newest conversation first.
pub async fn get_active_chats(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<ActiveChat>>, StatusCode> {
    let chats = state.store.active_chats(claims.sub).await.map_err(|e| {
        error!("Active chats query failed for {}: {:#}", claims.sub, e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(chats))
}

/// `GET /chats/search_users?q=<text>`
///
/// Up to 10 users matching on username/email, excluding the caller. Queries
/// under 2 characters return an empty list.
pub async fn search_users(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<UserSummary>>, StatusCode> {
    let users = state
        .store
        .search_users(query.q, claims.sub)
        .await
        .map_err(|e| {
            error!("User search failed for {}: {:#}", claims.sub, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(Json(users))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AppStateInner;
    use opslink_db::{ChatStore, Database};
    use opslink_gateway::IdentityVerifier;
    use std::sync::Arc;

    fn state() -> AppState {
        Arc::new(AppStateInner {
            store: ChatStore::new(Database::open_in_memory().unwrap()),
            verifier: IdentityVerifier::new("test-secret"),
        })
    }

    fn claims_for(user_id: Uuid, username: &str) -> Claims {
        Claims {
            sub: user_id,
            username: username.to_string(),
            exp: usize::MAX,
        }
    }

    async fn seed_user(state: &AppState, username: &str) -> Uuid {
        let id = Uuid::new_v4();
        state
            .store
            .upsert_user(id, username.to_string(), format!("{username}@ops.local"))
            .await
            .unwrap();
        id
    }

    #[tokio::test]
    async fn history_returns_conversation_and_marks_it_read() {
        let state = state();
        let alice = seed_user(&state, "alice").await;
        let bob = seed_user(&state, "bob").await;

        state
            .store
            .send_message(alice, bob, "hi bob".to_string())
            .await
            .unwrap();

        let Json(messages) = get_history(
            State(state.clone()),
            Path(alice),
            Extension(claims_for(bob, "bob")),
        )
        .await
        .unwrap();

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text, "hi bob");
        assert!(messages[0].is_read);
        assert_eq!(state.store.unread_count(bob, alice).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn active_chats_reports_unread_counts() {
        let state = state();
        let alice = seed_user(&state, "alice").await;
        let bob = seed_user(&state, "bob").await;

        state
            .store
            .send_message(bob, alice, "one".to_string())
            .await
            .unwrap();
        state
            .store
            .send_message(bob, alice, "two".to_string())
            .await
            .unwrap();

        let Json(chats) =
            get_active_chats(State(state.clone()), Extension(claims_for(alice, "alice")))
                .await
                .unwrap();

        assert_eq!(chats.len(), 1);
        assert_eq!(chats[0].user.id, bob);
        assert_eq!(chats[0].last_message, "two");
        assert_eq!(chats[0].unread_count, 2);
    }

    #[tokio::test]
    async fn search_users_applies_length_gate_and_exclusion() {
        let state = state();
        let annette = seed_user(&state, "annette").await;
        seed_user(&state, "anna").await;

        let Json(short) = search_users(
            State(state.clone()),
            Query(SearchQuery { q: "a".to_string() }),
            Extension(claims_for(annette, "annette")),
        )
        .await
        .unwrap();
        assert!(short.is_empty());

        let Json(hits) = search_users(
            State(state.clone()),
            Query(SearchQuery {
                q: "ann".to_string(),
            }),
            Extension(claims_for(annette, "annette")),
        )
        .await
        .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].username, "anna");
    }
}
