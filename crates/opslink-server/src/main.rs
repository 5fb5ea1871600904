use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, State, WebSocketUpgrade},
    http::HeaderMap,
    middleware,
    response::IntoResponse,
    routing::get,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use opslink_api::middleware::{extract_credential, require_auth};
use opslink_api::{AppState, AppStateInner, chats};
use opslink_db::{ChatStore, Database};
use opslink_gateway::connection;
use opslink_gateway::{IdentityVerifier, Notifier, RoomRegistry, SessionDeps};

#[derive(Clone)]
struct ServerState {
    deps: SessionDeps,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "opslink=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("OPSLINK_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("OPSLINK_DB_PATH").unwrap_or_else(|_| "opslink.db".into());
    let host = std::env::var("OPSLINK_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("OPSLINK_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;

    // Init store
    let db = Database::open(&PathBuf::from(&db_path))?;
    let store = ChatStore::new(db);

    // Shared state
    let registry = RoomRegistry::new();
    let verifier = IdentityVerifier::new(jwt_secret);
    let (notifier, mut notifications) = Notifier::new();

    // Stand-in for the external notification/email pipeline: drain the
    // message-created events and log them. The send path never waits on this.
    tokio::spawn(async move {
        while let Some(event) = notifications.recv().await {
            debug!(
                "message {} created ({} -> {})",
                event.message_id, event.sender_id, event.receiver_id
            );
        }
    });

    let deps = SessionDeps {
        store: store.clone(),
        registry,
        notifier,
        verifier: verifier.clone(),
    };

    let app_state: AppState = Arc::new(AppStateInner { store, verifier });

    // Routes
    let rest_routes = Router::new()
        .route("/chats/active_chats", get(chats::get_active_chats))
        .route("/chats/search_users", get(chats::search_users))
        .route("/chats/{counterpart_id}/history", get(chats::get_history))
        .layer(middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ))
        .with_state(app_state);

    let ws_route = Router::new()
        .route("/ws/chats/{counterpart_id}", get(ws_upgrade))
        .with_state(ServerState { deps });

    let app = Router::new()
        .merge(rest_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("opslink server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_upgrade(
    State(state): State<ServerState>,
    Path(counterpart_id): Path<String>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    // Credential is read once, here at handshake time. Validation happens on
    // the accepted socket so a failure can close with the reserved 4001 code.
    let credential = extract_credential(&headers);
    ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, state.deps, credential, counterpart_id)
    })
}
