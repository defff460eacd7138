use uuid::Uuid;

use tasktalk_types::events::ChangeEvent;
use tasktalk_types::models::Task;

use super::TaskRepository;
use crate::Backend;
use crate::error::Result;

/// Tasks kept in the shared document store. Every write announces a
/// `TasksChanged` event for the owner.
#[derive(Clone)]
pub struct RemoteTaskRepository {
    backend: Backend,
}

impl RemoteTaskRepository {
    pub fn new(backend: Backend) -> Self {
        Self { backend }
    }

    fn changed(&self, owner_id: Uuid) {
        self.backend
            .dispatcher
            .publish(ChangeEvent::TasksChanged { owner_id });
    }
}

impl TaskRepository for RemoteTaskRepository {
    async fn load(&self, owner_id: Uuid) -> Result<Vec<Task>> {
        self.backend.store(move |db| db.list_tasks(owner_id)).await
    }

    async fn insert(&self, task: &Task) -> Result<()> {
        let record = task.clone();
        self.backend.store(move |db| db.insert_task(&record)).await?;
        self.changed(task.owner_id);
        Ok(())
    }

    async fn update(&self, task: &Task) -> Result<bool> {
        let record = task.clone();
        let found = self.backend.store(move |db| db.update_task(&record)).await?;
        if found {
            self.changed(task.owner_id);
        }
        Ok(found)
    }

    async fn delete(&self, owner_id: Uuid, id: Uuid) -> Result<bool> {
        let found = self.backend.store(move |db| db.delete_task(owner_id, id)).await?;
        if found {
            self.changed(owner_id);
        }
        Ok(found)
    }

    async fn clear(&self, owner_id: Uuid) -> Result<usize> {
        let removed = self.backend.store(move |db| db.clear_tasks(owner_id)).await?;
        if removed > 0 {
            self.changed(owner_id);
        }
        Ok(removed)
    }
}
