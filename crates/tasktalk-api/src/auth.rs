use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::info;

use tasktalk_sync::auth::SignupForm;
use tasktalk_sync::{Session, SyncError};
use tasktalk_types::api::{LoginRequest, SessionResponse, SignUpRequest};
use tasktalk_types::models::User;

use crate::error::ApiError;
use crate::state::AppState;

/// Validates the form, creates the account and signs straight in.
pub async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignUpRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let form = SignupForm {
        name: req.name,
        email: req.email,
        password: req.password,
        confirm_password: req.confirm_password,
    };
    if let Err(errors) = form.validate() {
        // One message at a time, like the form shows it.
        let first = errors.first().map(|e| e.message).unwrap_or("Invalid sign-up form");
        return Err(SyncError::validation(first).into());
    }

    state.auth.sign_up(&form.email, &form.password, &form.name).await?;
    let session = state.auth.sign_in(&form.email, &form.password).await?;
    info!("New user {} signed up", session.user_id());

    Ok((
        StatusCode::CREATED,
        Json(SessionResponse {
            user: session.user,
            token: session.token,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<SessionResponse>, ApiError> {
    let session = state.auth.sign_in(&req.email, &req.password).await?;
    Ok(Json(SessionResponse {
        user: session.user,
        token: session.token,
    }))
}

pub async fn logout(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Result<StatusCode, ApiError> {
    state.auth.sign_out(session).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Everyone except the caller.
pub async fn list_users(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Result<Json<Vec<User>>, ApiError> {
    Ok(Json(state.auth.list_users(session.user_id()).await?))
}

pub async fn me(Extension(session): Extension<Session>) -> Json<User> {
    Json(session.user)
}
