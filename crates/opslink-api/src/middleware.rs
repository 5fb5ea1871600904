use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{Authorization, Cookie, HeaderMapExt, authorization::Bearer};

use crate::AppState;

/// Cookie the platform's web client carries its session token in.
pub const AUTH_COOKIE: &str = "opslink_token";

/// Credential presented with a request: the `opslink_token` cookie first,
/// then an `Authorization: Bearer` header. Shared by the REST middleware and
/// the WebSocket upgrade handler.
pub fn extract_credential(headers: &HeaderMap) -> Option<String> {
    if let Some(cookie) = headers.typed_get::<Cookie>() {
        if let Some(token) = cookie.get(AUTH_COOKIE) {
            return Some(token.to_string());
        }
    }

    headers
        .typed_get::<Authorization<Bearer>>()
        .map(|auth| auth.token().to_string())
}

/// Extract and validate the caller's credential, stashing the claims for the
/// handlers.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = extract_credential(req.headers()).ok_or(StatusCode::UNAUTHORIZED)?;

    let claims = state
        .verifier
        .verify(&token)
        .map_err(|_| StatusCode::UNAUTHORIZED)?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}
