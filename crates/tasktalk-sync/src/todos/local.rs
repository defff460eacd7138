use std::io::ErrorKind;
use std::path::PathBuf;

use anyhow::Context;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use tasktalk_types::models::Task;

use super::TaskRepository;
use crate::error::Result;

/// On-device storage: one JSON array per owner, rewritten whole on every
/// change.
pub struct LocalTaskRepository {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl LocalTaskRepository {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            lock: Mutex::new(()),
        }
    }

    fn path(&self, owner_id: Uuid) -> PathBuf {
        self.dir.join(format!("todos-{}.json", owner_id))
    }

    async fn read(&self, owner_id: Uuid) -> anyhow::Result<Vec<Task>> {
        let path = self.path(owner_id);
        match fs::read(&path).await {
            Ok(raw) => serde_json::from_slice(&raw)
                .with_context(|| format!("corrupt task file {}", path.display())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, owner_id: Uuid, tasks: &[Task]) -> anyhow::Result<()> {
        fs::create_dir_all(&self.dir).await?;
        let path = self.path(owner_id);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(tasks)?).await?;
        fs::rename(&tmp, &path).await?;
        debug!("Wrote {} tasks to {}", tasks.len(), path.display());
        Ok(())
    }

    /// Read-modify-write of one owner's list under the repository lock.
    async fn modify<T>(&self, owner_id: Uuid, f: impl FnOnce(&mut Vec<Task>) -> T + Send) -> Result<T> {
        let _guard = self.lock.lock().await;
        let mut tasks = self.read(owner_id).await?;
        let out = f(&mut tasks);
        self.write(owner_id, &tasks).await?;
        Ok(out)
    }
}

impl TaskRepository for LocalTaskRepository {
    async fn load(&self, owner_id: Uuid) -> Result<Vec<Task>> {
        let _guard = self.lock.lock().await;
        Ok(self.read(owner_id).await?)
    }

    async fn insert(&self, task: &Task) -> Result<()> {
        let task = task.clone();
        self.modify(task.owner_id, move |tasks| tasks.push(task)).await
    }

    async fn update(&self, task: &Task) -> Result<bool> {
        let task = task.clone();
        self.modify(task.owner_id, move |tasks| {
            match tasks.iter_mut().find(|t| t.id == task.id) {
                Some(slot) => {
                    *slot = task;
                    true
                }
                None => false,
            }
        })
        .await
    }

    async fn delete(&self, owner_id: Uuid, id: Uuid) -> Result<bool> {
        self.modify(owner_id, move |tasks| {
            let before = tasks.len();
            tasks.retain(|t| t.id != id);
            tasks.len() != before
        })
        .await
    }

    async fn clear(&self, owner_id: Uuid) -> Result<usize> {
        self.modify(owner_id, |tasks| std::mem::take(tasks).len()).await
    }
}
