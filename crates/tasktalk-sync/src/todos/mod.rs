//! Per-user to-do list: a [`TodoStore`] state machine over a pluggable
//! [`TaskRepository`].

mod local;
mod remote;

use std::future::Future;

use tracing::debug;
use uuid::Uuid;

use tasktalk_types::models::{Priority, Task, TaskFilter};

use crate::error::{Result, SyncError};
use crate::session::Session;

pub use local::LocalTaskRepository;
pub use remote::RemoteTaskRepository;

/// Where a user's tasks are persisted.
pub trait TaskRepository: Send + Sync {
    /// All tasks of `owner_id`, oldest first.
    fn load(&self, owner_id: Uuid) -> impl Future<Output = Result<Vec<Task>>> + Send;

    fn insert(&self, task: &Task) -> impl Future<Output = Result<()>> + Send;

    /// Returns false when the task does not exist for its owner.
    fn update(&self, task: &Task) -> impl Future<Output = Result<bool>> + Send;

    fn delete(&self, owner_id: Uuid, id: Uuid) -> impl Future<Output = Result<bool>> + Send;

    /// Removes every task of `owner_id` at once; returns how many went.
    fn clear(&self, owner_id: Uuid) -> impl Future<Output = Result<usize>> + Send;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskCounts {
    pub active: usize,
    pub completed: usize,
}

/// In-memory view of one user's tasks, written through to the repository.
pub struct TodoStore<R> {
    repo: R,
    owner_id: Uuid,
    tasks: Vec<Task>,
    filter: TaskFilter,
}

impl<R: TaskRepository> TodoStore<R> {
    pub fn new(repo: R, session: &Session) -> Self {
        Self::for_owner(repo, session.user_id())
    }

    pub fn for_owner(repo: R, owner_id: Uuid) -> Self {
        Self {
            repo,
            owner_id,
            tasks: Vec::new(),
            filter: TaskFilter::All,
        }
    }

    pub async fn load(&mut self) -> Result<&[Task]> {
        self.tasks = self.repo.load(self.owner_id).await?;
        debug!("Loaded {} tasks for {}", self.tasks.len(), self.owner_id);
        Ok(&self.tasks)
    }

    pub async fn add(&mut self, text: &str, priority: Priority) -> Result<Task> {
        let task = Task::new(self.owner_id, text, priority)?;
        self.repo.insert(&task).await?;
        self.tasks.push(task.clone());
        Ok(task)
    }

    pub async fn edit(&mut self, id: Uuid, text: &str, priority: Priority) -> Result<Task> {
        let mut task = self.find(id)?.clone();
        task.edit(text, priority)?;
        self.write_back(task).await
    }

    /// Flips completion; returns the updated task.
    pub async fn toggle(&mut self, id: Uuid) -> Result<Task> {
        let mut task = self.find(id)?.clone();
        task.toggle();
        self.write_back(task).await
    }

    pub async fn delete(&mut self, id: Uuid) -> Result<()> {
        if !self.repo.delete(self.owner_id, id).await? {
            return Err(SyncError::NotFound(format!("task {}", id)));
        }
        self.tasks.retain(|t| t.id != id);
        Ok(())
    }

    /// Deletes all of the owner's tasks in one batch.
    pub async fn clear_all(&mut self) -> Result<usize> {
        let removed = self.repo.clear(self.owner_id).await?;
        self.tasks.clear();
        Ok(removed)
    }

    pub fn set_filter(&mut self, filter: TaskFilter) {
        self.filter = filter;
    }

    pub fn filter(&self) -> TaskFilter {
        self.filter
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Tasks passing the current filter.
    pub fn visible(&self) -> Vec<&Task> {
        self.tasks.iter().filter(|t| self.filter.matches(t)).collect()
    }

    pub fn counts(&self) -> TaskCounts {
        let completed = self.tasks.iter().filter(|t| t.completed).count();
        TaskCounts {
            active: self.tasks.len() - completed,
            completed,
        }
    }

    pub fn find(&self, id: Uuid) -> Result<&Task> {
        self.tasks
            .iter()
            .find(|t| t.id == id)
            .ok_or_else(|| SyncError::NotFound(format!("task {}", id)))
    }

    async fn write_back(&mut self, task: Task) -> Result<Task> {
        if !self.repo.update(&task).await? {
            self.tasks.retain(|t| t.id != task.id);
            return Err(SyncError::NotFound(format!("task {}", task.id)));
        }
        if let Some(slot) = self.tasks.iter_mut().find(|t| t.id == task.id) {
            *slot = task.clone();
        }
        Ok(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{backend, scratch_dir, session};

    async fn exercise<R: TaskRepository>(repo: R, other: R, owner: Uuid, stranger: Uuid) {
        let mut store = TodoStore::for_owner(repo, owner);
        assert!(store.load().await.unwrap().is_empty());

        let task = store.add("  Buy milk ", Priority::High).await.unwrap();
        assert_eq!(task.text, "Buy milk");
        assert_eq!(task.priority, Priority::High);
        assert!(matches!(store.add("   ", Priority::Low).await, Err(SyncError::Validation(_))));

        store.add("Walk dog", Priority::default()).await.unwrap();
        store.toggle(task.id).await.unwrap();
        store.edit(task.id, "Buy oat milk", Priority::Medium).await.unwrap();

        // Reload from the repository to see what was persisted.
        store.load().await.unwrap();
        let reloaded = store.tasks().iter().find(|t| t.id == task.id).unwrap();
        assert_eq!(reloaded.text, "Buy oat milk");
        assert_eq!(reloaded.priority, Priority::Medium);
        assert!(reloaded.completed);
        assert_eq!(store.counts(), TaskCounts { active: 1, completed: 1 });

        store.set_filter(TaskFilter::Completed);
        assert_eq!(store.visible().len(), 1);
        store.set_filter(TaskFilter::Active);
        assert_eq!(store.visible()[0].text, "Walk dog");

        let mut theirs = TodoStore::for_owner(other, stranger);
        theirs.add("Not yours", Priority::Low).await.unwrap();

        for i in 0..3 {
            store.add(&format!("extra {}", i), Priority::Low).await.unwrap();
        }
        assert_eq!(store.clear_all().await.unwrap(), 5);
        assert!(store.load().await.unwrap().is_empty());
        assert_eq!(theirs.load().await.unwrap().len(), 1);

        assert!(matches!(store.delete(task.id).await, Err(SyncError::NotFound(_))));
    }

    #[tokio::test]
    async fn remote_repository_lifecycle() {
        let backend = backend().await;
        let me = session(&backend, "ann@example.com").await;
        let you = session(&backend, "ben@example.com").await;
        exercise(
            RemoteTaskRepository::new(backend.clone()),
            RemoteTaskRepository::new(backend.clone()),
            me.user_id(),
            you.user_id(),
        )
        .await;
    }

    #[tokio::test]
    async fn local_repository_lifecycle() {
        let dir = scratch_dir("todos");
        exercise(
            LocalTaskRepository::new(dir.clone()),
            LocalTaskRepository::new(dir),
            Uuid::new_v4(),
            Uuid::new_v4(),
        )
        .await;
    }

    #[tokio::test]
    async fn delete_removes_single_task() {
        let mut store = TodoStore::for_owner(LocalTaskRepository::new(scratch_dir("todos")), Uuid::new_v4());
        let keep = store.add("keep", Priority::Low).await.unwrap();
        let gone = store.add("gone", Priority::Low).await.unwrap();
        store.delete(gone.id).await.unwrap();
        assert_eq!(store.load().await.unwrap(), &[keep][..]);
    }
}
