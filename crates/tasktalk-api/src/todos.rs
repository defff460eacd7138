use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Serialize;
use uuid::Uuid;

use tasktalk_sync::{RemoteTaskRepository, Session, TodoStore};
use tasktalk_types::api::{TaskRequest, TodoListResponse, TodoQuery, UpdateTaskRequest};
use tasktalk_types::models::Task;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ClearResponse {
    pub removed: usize,
}

async fn loaded_store(
    state: &AppState,
    session: &Session,
) -> Result<TodoStore<RemoteTaskRepository>, ApiError> {
    let mut store = TodoStore::new(RemoteTaskRepository::new(state.backend.clone()), session);
    store.load().await?;
    Ok(store)
}

pub async fn list_todos(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Query(query): Query<TodoQuery>,
) -> Result<Json<TodoListResponse>, ApiError> {
    let mut store = loaded_store(&state, &session).await?;
    store.set_filter(query.filter);
    let counts = store.counts();
    Ok(Json(TodoListResponse {
        filter: store.filter(),
        tasks: store.visible().into_iter().cloned().collect(),
        active: counts.active,
        completed: counts.completed,
    }))
}

pub async fn create_todo(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(req): Json<TaskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut store = TodoStore::new(RemoteTaskRepository::new(state.backend.clone()), &session);
    let task = store.add(&req.text, req.priority).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

pub async fn update_todo(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateTaskRequest>,
) -> Result<Json<Task>, ApiError> {
    let mut store = loaded_store(&state, &session).await?;
    let current = store.find(id)?;
    let text = req.text.unwrap_or_else(|| current.text.clone());
    let priority = req.priority.unwrap_or(current.priority);
    Ok(Json(store.edit(id, &text, priority).await?))
}

pub async fn toggle_todo(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(id): Path<Uuid>,
) -> Result<Json<Task>, ApiError> {
    let mut store = loaded_store(&state, &session).await?;
    Ok(Json(store.toggle(id).await?))
}

pub async fn delete_todo(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let mut store = TodoStore::new(RemoteTaskRepository::new(state.backend.clone()), &session);
    store.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn clear_todos(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Result<Json<ClearResponse>, ApiError> {
    let mut store = TodoStore::new(RemoteTaskRepository::new(state.backend.clone()), &session);
    let removed = store.clear_all().await?;
    Ok(Json(ClearResponse { removed }))
}
