use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};

use crate::server::error::ServerError;
use crate::server::state::AppState;

/// Extract a Bearer token from the Authorization header
fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    let auth_header = headers.get("Authorization")?.to_str().ok()?;
    auth_header.strip_prefix("Bearer ")
}

/// Auth gate for every route except `/health`.
///
/// An empty configured token disables authentication entirely; otherwise the
/// request must carry `Authorization: Bearer <token>` with an exact match.
pub async fn require_bearer_token(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ServerError> {
    if state.auth_token.is_empty() {
        return Ok(next.run(req).await);
    }

    let authorised = extract_bearer_token(req.headers())
        .map(|token| token == state.auth_token)
        .unwrap_or(false);

    if !authorised {
        tracing::warn!(path = %req.uri().path(), "Rejecting unauthorised request");
        return Err(ServerError::forbidden("not authorised"));
    }

    Ok(next.run(req).await)
}
