//! Client-side facades over the TaskTalk backend: authentication, chat list
//! and conversation sync, to-do storage and profile editing.
//!
//! Every facade takes an explicit [`Backend`] (the platform handles) and,
//! where a user is involved, a [`Session`].

pub mod auth;
pub mod chat_list;
pub mod conversation;
pub mod error;
pub mod profile;
pub mod session;
pub mod storage;
pub mod todos;

use std::sync::Arc;

use anyhow::anyhow;

use tasktalk_db::Database;
use tasktalk_gateway::Dispatcher;

pub use auth::{AuthConfig, AuthFacade};
pub use chat_list::ChatListSync;
pub use conversation::ChatConversationSync;
pub use error::{AuthError, Result, SyncError};
pub use profile::ProfileEditor;
pub use session::Session;
pub use storage::ObjectStorage;
pub use todos::{LocalTaskRepository, RemoteTaskRepository, TaskRepository, TodoStore};

/// Handles to the platform services: document store, change feed, object
/// storage and identity settings. Cheap to clone.
#[derive(Clone)]
pub struct Backend {
    pub db: Arc<Database>,
    pub dispatcher: Dispatcher,
    pub storage: Arc<ObjectStorage>,
    pub auth: AuthConfig,
}

impl Backend {
    pub fn new(db: Database, storage: ObjectStorage, auth: AuthConfig) -> Self {
        Self {
            db: Arc::new(db),
            dispatcher: Dispatcher::new(),
            storage: Arc::new(storage),
            auth,
        }
    }

    /// Runs a store call off the async runtime.
    pub(crate) async fn store<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        blocking(self.db.clone(), f).await.map_err(SyncError::Store)
    }
}

pub(crate) async fn blocking<F, T>(db: Arc<Database>, f: F) -> anyhow::Result<T>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| anyhow!("spawn_blocking join error: {}", e))?
}

#[cfg(test)]
pub(crate) mod testing {
    use std::path::PathBuf;

    use uuid::Uuid;

    use super::*;

    pub fn scratch_dir(label: &str) -> PathBuf {
        std::env::temp_dir().join(format!("tasktalk-{}-{}", label, Uuid::new_v4()))
    }

    pub async fn backend() -> Backend {
        let storage = ObjectStorage::new(scratch_dir("objects"), "http://files.test")
            .await
            .unwrap();
        Backend::new(
            Database::open_in_memory().unwrap(),
            storage,
            AuthConfig::for_tests(),
        )
    }

    /// Signs up and signs in a user; the local part of `email` becomes the name.
    pub async fn session(backend: &Backend, email: &str) -> Session {
        let auth = AuthFacade::new(backend.clone());
        let name = email.split('@').next().unwrap();
        auth.sign_up(email, "Secret1", name).await.unwrap();
        auth.sign_in(email, "Secret1").await.unwrap()
    }
}
