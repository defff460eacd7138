use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{MediaKind, Priority, Task, TaskFilter, User};

// -- JWT Claims --

/// Session token claims, shared by the REST middleware and the gateway
/// upgrade path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub email: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SignUpRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub user: User,
    pub token: String,
}

// -- Profile --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateNameRequest {
    pub display_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChangePasswordRequest {
    pub old_password: String,
    pub new_password: String,
    pub confirm_password: String,
}

#[derive(Debug, Serialize)]
pub struct AvatarResponse {
    pub photo_url: String,
}

// -- Chat --

#[derive(Debug, Default, Deserialize)]
pub struct ChatQuery {
    #[serde(default)]
    pub q: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub kind: MediaKind,
    #[serde(default)]
    pub text: String,
    pub media_uri: Option<String>,
}

// -- Todos --

#[derive(Debug, Default, Deserialize)]
pub struct TodoQuery {
    #[serde(default)]
    pub filter: TaskFilter,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskRequest {
    pub text: String,
    #[serde(default)]
    pub priority: Priority,
}

/// Partial edit; omitted fields keep their stored value.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateTaskRequest {
    pub text: Option<String>,
    pub priority: Option<Priority>,
}

#[derive(Debug, Serialize)]
pub struct TodoListResponse {
    pub filter: TaskFilter,
    pub tasks: Vec<Task>,
    pub active: usize,
    pub completed: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
