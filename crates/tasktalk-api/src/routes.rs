use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, patch, post, put},
};

use tasktalk_sync::profile::MAX_AVATAR_BYTES;

use crate::middleware::require_auth;
use crate::state::AppState;
use crate::{auth, chats, profile, todos, ws};

/// Every REST and gateway route. Static files, CORS and tracing are layered
/// on by the binary.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/auth/signup", post(auth::signup))
        .route("/auth/login", post(auth::login))
        .route("/gateway", get(ws::ws_upgrade))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/auth/logout", post(auth::logout))
        .route("/users", get(auth::list_users))
        .route("/users/me", get(auth::me))
        .route("/profile/name", patch(profile::update_name))
        .route(
            "/profile/avatar",
            put(profile::update_avatar).layer(DefaultBodyLimit::max(MAX_AVATAR_BYTES)),
        )
        .route("/profile/password", post(profile::change_password))
        .route("/chats", get(chats::list_chats))
        .route("/chats/{peer_id}/read", post(chats::mark_read))
        .route(
            "/chats/{peer_id}/messages",
            get(chats::get_messages).post(chats::send_message),
        )
        .route("/todos", get(todos::list_todos).post(todos::create_todo).delete(todos::clear_todos))
        .route("/todos/{id}", patch(todos::update_todo).delete(todos::delete_todo))
        .route("/todos/{id}/toggle", post(todos::toggle_todo))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state);

    Router::new().merge(public_routes).merge(protected_routes)
}
