//! Task entity and lifecycle

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;

pub type TaskId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Success,
    Failed,
}

impl Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                TaskStatus::Pending => "pending",
                TaskStatus::Success => "success",
                TaskStatus::Failed => "failed",
            }
        )
    }
}

/// One request to resolve the rate of a currency pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub code: String,
    pub idempotency_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// A fresh pending task. The id is assigned by the store.
    pub fn pending(id: TaskId, code: &str, idempotency_key: &str, now: DateTime<Utc>) -> Self {
        Self {
            id,
            code: code.to_string(),
            idempotency_key: idempotency_key.to_string(),
            price: None,
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn resolve(&mut self, price: f64) {
        self.price = Some(price);
        self.status = TaskStatus::Success;
    }

    pub fn fail(&mut self) {
        self.price = None;
        self.status = TaskStatus::Failed;
    }

    pub fn is_pending(&self) -> bool {
        self.status == TaskStatus::Pending
    }
}
