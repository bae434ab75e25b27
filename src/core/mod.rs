//! Core business logic abstractions

pub mod config;
pub mod log;
pub mod quota;
pub mod store;
pub mod task;

// Re-export main types for cleaner imports
pub use quota::{CurrencyPair, QuotaError, QuotaFetcher, QuotaResult};
pub use store::{StoreError, StoreResult, TaskStore};
pub use task::{Task, TaskId, TaskStatus};
