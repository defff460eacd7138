use axum::{
    extract::{Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::Response,
};

use tasktalk_sync::AuthError;

use crate::error::ApiError;
use crate::state::AppState;

/// Resolves the bearer token into a `Session` request extension.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(req.headers())
        .ok_or(AuthError::InvalidToken)?
        .to_string();

    let session = state.auth.resume(&token).await?;
    req.extensions_mut().insert(session);
    Ok(next.run(req).await)
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}
