pub mod chats;
pub mod middleware;

use std::sync::Arc;

use opslink_db::ChatStore;
use opslink_gateway::IdentityVerifier;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub store: ChatStore,
    pub verifier: IdentityVerifier,
}
