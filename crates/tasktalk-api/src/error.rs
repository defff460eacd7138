use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::error;

use tasktalk_sync::{AuthError, SyncError};
use tasktalk_types::api::ErrorBody;

/// A facade error on its way to an HTTP response.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct ApiError(#[from] pub SyncError);

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        Self(e.into())
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            SyncError::Auth(AuthError::EmailAlreadyInUse) => StatusCode::CONFLICT,
            SyncError::Auth(AuthError::WeakPassword | AuthError::InvalidEmail) => StatusCode::BAD_REQUEST,
            SyncError::Auth(_) => StatusCode::UNAUTHORIZED,
            SyncError::Validation(_) => StatusCode::BAD_REQUEST,
            SyncError::NotFound(_) => StatusCode::NOT_FOUND,
            SyncError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            SyncError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self.0 {
            SyncError::Store(e) => {
                error!("Store failure: {:#}", e);
                "Something went wrong. Please try again.".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}
