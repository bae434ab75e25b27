use crate::core::store::{StoreError, StoreResult, TaskStore, apply_update};
use crate::core::task::{Task, TaskId, TaskStatus};
use async_trait::async_trait;
use chrono::Utc;
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};
use std::fs::{File, OpenOptions, TryLockError};
use std::path::Path;
use tokio::sync::Mutex;
use tracing::debug;

const NEXT_ID_KEY: &[u8] = b"next_id";
const LOCK_FILE: &str = "fxquote.lock";

fn task_key(id: TaskId) -> [u8; 8] {
    id.to_be_bytes()
}

fn idempotency_key(code: &str, key: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(code.len() + key.len() + 1);
    buf.extend_from_slice(code.as_bytes());
    buf.push(0);
    buf.extend_from_slice(key.as_bytes());
    buf
}

/// Inverted creation time then inverted id, so a forward scan is newest first.
fn pending_key(task: &Task) -> [u8; 16] {
    let micros = u64::try_from(task.created_at.timestamp_micros()).unwrap_or(0);
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&(u64::MAX - micros).to_be_bytes());
    key[8..].copy_from_slice(&(u64::MAX - task.id).to_be_bytes());
    key
}

fn decode_id(bytes: &[u8]) -> StoreResult<TaskId> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| StoreError::Backend(format!("corrupt task id of {} bytes", bytes.len())))?;
    Ok(TaskId::from_be_bytes(raw))
}

fn lock_dir(path: &Path) -> StoreResult<File> {
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path.join(LOCK_FILE))?;
    match file.try_lock() {
        Ok(()) => Ok(file),
        Err(TryLockError::WouldBlock) => Err(StoreError::Locked(path.to_path_buf())),
        Err(TryLockError::Error(e)) => Err(e.into()),
    }
}

/// Task store persisted in a fjall keyspace.
///
/// Rows live in `tasks` keyed by big-endian id. Secondary partitions hold the
/// `(code, idempotency_key)` uniqueness index, the pending set ordered newest
/// first, the last successful task per code and the id sequence. Every write
/// updates the row and its index entries in one batch under `write_lock`.
///
/// The directory is locked for the lifetime of the store, so only one process
/// can have it open.
pub struct DiskTaskStore {
    keyspace: Keyspace,
    tasks: PartitionHandle,
    idempotency: PartitionHandle,
    pending: PartitionHandle,
    last_success: PartitionHandle,
    meta: PartitionHandle,
    write_lock: Mutex<()>,
    _dir_lock: File,
}

impl DiskTaskStore {
    pub fn open(path: &Path) -> StoreResult<Self> {
        std::fs::create_dir_all(path)?;
        let dir_lock = lock_dir(path)?;
        let keyspace = Config::new(path).open()?;
        let tasks = keyspace.open_partition("tasks", PartitionCreateOptions::default())?;
        let idempotency =
            keyspace.open_partition("idempotency", PartitionCreateOptions::default())?;
        let pending = keyspace.open_partition("pending", PartitionCreateOptions::default())?;
        let last_success =
            keyspace.open_partition("last_success", PartitionCreateOptions::default())?;
        let meta = keyspace.open_partition("meta", PartitionCreateOptions::default())?;
        debug!("Opened task store at {}", path.display());

        Ok(Self {
            keyspace,
            tasks,
            idempotency,
            pending,
            last_success,
            meta,
            write_lock: Mutex::new(()),
            _dir_lock: dir_lock,
        })
    }

    fn read_task(&self, id: TaskId) -> StoreResult<Option<Task>> {
        match self.tasks.get(task_key(id))? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    fn read_indexed(&self, id_bytes: &[u8]) -> StoreResult<Task> {
        let id = decode_id(id_bytes)?;
        self.read_task(id)?
            .ok_or_else(|| StoreError::Backend(format!("index points at missing task {id}")))
    }

    fn next_id(&self) -> StoreResult<TaskId> {
        match self.meta.get(NEXT_ID_KEY)? {
            Some(value) => Ok(decode_id(&value)? + 1),
            None => Ok(1),
        }
    }
}

#[async_trait]
impl TaskStore for DiskTaskStore {
    async fn insert_task(&self, code: &str, idempotency_key_value: &str) -> StoreResult<Task> {
        let _guard = self.write_lock.lock().await;
        let unique = idempotency_key(code, idempotency_key_value);

        if let Some(existing) = self.idempotency.get(&unique)? {
            let id = decode_id(&existing)?;
            debug!(task_id = id, code, "Idempotent insert hit");
            return self.read_task(id)?.ok_or_else(|| StoreError::Conflict {
                code: code.to_string(),
                idempotency_key: idempotency_key_value.to_string(),
            });
        }

        let id = self.next_id()?;
        let task = Task::pending(id, code, idempotency_key_value, Utc::now());
        let value = serde_json::to_vec(&task)?;

        let mut batch = self.keyspace.batch();
        batch.insert(&self.tasks, &task_key(id)[..], value);
        batch.insert(&self.idempotency, unique, &task_key(id)[..]);
        batch.insert(&self.pending, &pending_key(&task)[..], &task_key(id)[..]);
        batch.insert(&self.meta, NEXT_ID_KEY, &task_key(id)[..]);
        batch.commit()?;
        self.keyspace.persist(PersistMode::SyncAll)?;

        debug!(task_id = id, code, "Task inserted");
        Ok(task)
    }

    async fn get_task(&self, code: &str, id: TaskId) -> StoreResult<Task> {
        self.read_task(id)?
            .filter(|task| task.code == code)
            .ok_or(StoreError::NotFound)
    }

    async fn get_last_successful_task(&self, code: &str) -> StoreResult<Task> {
        match self.last_success.get(code.as_bytes())? {
            Some(id) => self.read_indexed(&id),
            None => Err(StoreError::NotFound),
        }
    }

    async fn get_pending_tasks(&self) -> StoreResult<Vec<Task>> {
        self.pending
            .iter()
            .map(|item| -> StoreResult<Task> {
                let (_, id) = item?;
                self.read_indexed(&id)
            })
            .collect()
    }

    async fn update_task(&self, task: &Task) -> StoreResult<Task> {
        let _guard = self.write_lock.lock().await;
        let mut stored = self.read_task(task.id)?.ok_or(StoreError::NotFound)?;
        apply_update(&mut stored, task)?;
        stored.updated_at = Utc::now();
        let value = serde_json::to_vec(&stored)?;

        let mut batch = self.keyspace.batch();
        batch.insert(&self.tasks, &task_key(stored.id)[..], value);
        batch.remove(&self.pending, &pending_key(&stored)[..]);
        if stored.status == TaskStatus::Success {
            batch.insert(
                &self.last_success,
                stored.code.as_bytes(),
                &task_key(stored.id)[..],
            );
        }
        batch.commit()?;
        self.keyspace.persist(PersistMode::SyncAll)?;

        debug!(task_id = stored.id, status = %stored.status, "Task updated");
        Ok(stored)
    }
}
