use crate::core::store::{StoreError, StoreResult, TaskStore, apply_update};
use crate::core::task::{Task, TaskId, TaskStatus};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Default)]
struct Tables {
    tasks: BTreeMap<TaskId, Task>,
    idempotency: HashMap<(String, String), TaskId>,
    next_id: TaskId,
}

/// In-memory task store using a mutex-guarded table and uniqueness index
#[derive(Clone, Default)]
pub struct MemoryTaskStore {
    inner: Arc<Mutex<Tables>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn insert_task(&self, code: &str, idempotency_key: &str) -> StoreResult<Task> {
        let mut tables = self.inner.lock().await;
        let unique = (code.to_string(), idempotency_key.to_string());
        if let Some(id) = tables.idempotency.get(&unique) {
            debug!(task_id = id, code, idempotency_key, "Idempotent insert hit");
            return tables
                .tasks
                .get(id)
                .cloned()
                .ok_or_else(|| StoreError::Conflict {
                    code: code.to_string(),
                    idempotency_key: idempotency_key.to_string(),
                });
        }

        tables.next_id += 1;
        let task = Task::pending(tables.next_id, code, idempotency_key, Utc::now());
        tables.idempotency.insert(unique, task.id);
        tables.tasks.insert(task.id, task.clone());
        debug!(task_id = task.id, code, "Task inserted");
        Ok(task)
    }

    async fn get_task(&self, code: &str, id: TaskId) -> StoreResult<Task> {
        let tables = self.inner.lock().await;
        tables
            .tasks
            .get(&id)
            .filter(|task| task.code == code)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn get_last_successful_task(&self, code: &str) -> StoreResult<Task> {
        let tables = self.inner.lock().await;
        tables
            .tasks
            .values()
            .filter(|task| task.code == code && task.status == TaskStatus::Success)
            .max_by_key(|task| (task.updated_at, task.id))
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn get_pending_tasks(&self) -> StoreResult<Vec<Task>> {
        let tables = self.inner.lock().await;
        let mut pending: Vec<Task> = tables
            .tasks
            .values()
            .filter(|task| task.is_pending())
            .cloned()
            .collect();
        pending.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(pending)
    }

    async fn update_task(&self, task: &Task) -> StoreResult<Task> {
        let mut tables = self.inner.lock().await;
        let stored = tables.tasks.get_mut(&task.id).ok_or(StoreError::NotFound)?;
        apply_update(stored, task)?;
        stored.updated_at = Utc::now();
        debug!(task_id = task.id, status = %task.status, "Task updated");
        Ok(stored.clone())
    }
}
