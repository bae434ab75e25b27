//! Task persistence abstractions

use async_trait::async_trait;
use thiserror::Error;

use super::task::{Task, TaskId, TaskStatus};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("task not found")]
    NotFound,

    /// The idempotency index points at a row that no longer exists.
    #[error("conflicting task for code {code} and idempotency key {idempotency_key}")]
    Conflict {
        code: String,
        idempotency_key: String,
    },

    #[error("task {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("task store at {} is in use by another process", .0.display())]
    Locked(std::path::PathBuf),

    #[error("store backend error: {0}")]
    Backend(String),
}

impl From<fjall::Error> for StoreError {
    fn from(err: fjall::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Backend(format!("serialization: {err}"))
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Backend(format!("io: {err}"))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Applies a status update to a stored row.
///
/// Only pending tasks change, and only into a terminal state. A success
/// must carry a price, and the price is dropped for any other status.
pub(crate) fn apply_update(stored: &mut Task, update: &Task) -> StoreResult<()> {
    let (id, from, to) = (stored.id, stored.status, update.status);
    let invalid = move || StoreError::InvalidTransition { id, from, to };
    if !stored.is_pending() || update.is_pending() {
        return Err(invalid());
    }
    stored.price = match update.status {
        TaskStatus::Success => Some(update.price.ok_or_else(invalid)?),
        _ => None,
    };
    stored.status = update.status;
    Ok(())
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Creates a pending task, or returns the existing one for the same
    /// `(code, idempotency_key)` pair.
    async fn insert_task(&self, code: &str, idempotency_key: &str) -> StoreResult<Task>;

    async fn get_task(&self, code: &str, id: TaskId) -> StoreResult<Task>;

    /// Most recently updated successful task for `code`.
    async fn get_last_successful_task(&self, code: &str) -> StoreResult<Task>;

    /// Pending tasks, newest first.
    async fn get_pending_tasks(&self) -> StoreResult<Vec<Task>>;

    /// Moves a pending row to the status of `task`, keeping its price only on
    /// success, and bumps `updated_at`.
    async fn update_task(&self, task: &Task) -> StoreResult<Task>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_apply_update_keeps_price_only_on_success() {
        let mut stored = Task::pending(1, "EUR_USD", "k1", Utc::now());
        let mut update = stored.clone();
        update.status = TaskStatus::Failed;
        update.price = Some(1.08);

        apply_update(&mut stored, &update).unwrap();
        assert_eq!(stored.status, TaskStatus::Failed);
        assert!(stored.price.is_none());
    }

    #[test]
    fn test_apply_update_rejects_invalid_transitions() {
        let pending = Task::pending(1, "EUR_USD", "k1", Utc::now());

        let mut stored = pending.clone();
        assert!(matches!(
            apply_update(&mut stored, &pending),
            Err(StoreError::InvalidTransition { .. })
        ));

        let mut no_price = pending.clone();
        no_price.status = TaskStatus::Success;
        assert!(matches!(
            apply_update(&mut stored, &no_price),
            Err(StoreError::InvalidTransition { .. })
        ));
        assert!(stored.is_pending());

        let mut resolved = pending.clone();
        resolved.resolve(1.08);
        apply_update(&mut stored, &resolved).unwrap();
        assert_eq!(stored.price, Some(1.08));

        let mut failed = pending.clone();
        failed.fail();
        let err = apply_update(&mut stored, &failed).unwrap_err();
        assert!(err.to_string().contains("from success to failed"));
        assert_eq!(stored.status, TaskStatus::Success);
    }
}
