use axum::{Extension, Json, body::Bytes, extract::State, http::StatusCode};

use tasktalk_sync::{ProfileEditor, Session};
use tasktalk_types::api::{AvatarResponse, ChangePasswordRequest, UpdateNameRequest};
use tasktalk_types::models::User;

use crate::error::ApiError;
use crate::state::AppState;

pub async fn update_name(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(req): Json<UpdateNameRequest>,
) -> Result<Json<User>, ApiError> {
    let mut editor = ProfileEditor::new(state.backend.clone(), session);
    editor.update_display_name(&req.display_name).await?;
    Ok(Json(editor.into_session().user))
}

/// Raw image bytes in the body.
pub async fn update_avatar(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    body: Bytes,
) -> Result<Json<AvatarResponse>, ApiError> {
    let mut editor = ProfileEditor::new(state.backend.clone(), session);
    let photo_url = editor.update_avatar(&body).await?;
    Ok(Json(AvatarResponse { photo_url }))
}

pub async fn change_password(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<StatusCode, ApiError> {
    ProfileEditor::new(state.backend.clone(), session)
        .change_password(&req.old_password, &req.new_password, &req.confirm_password)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
