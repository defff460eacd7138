//! HTTP and WebSocket surface of the TaskTalk backend.

pub mod auth;
pub mod chats;
pub mod error;
pub mod middleware;
pub mod profile;
pub mod routes;
pub mod state;
pub mod todos;
pub mod ws;

pub use error::ApiError;
pub use routes::router;
pub use state::{AppState, AppStateInner};
