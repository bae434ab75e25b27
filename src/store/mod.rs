pub mod disk;
pub mod memory;

use crate::core::config::AppConfig;
use crate::core::store::TaskStore;
use anyhow::{Context, Result};
use disk::DiskTaskStore;
use std::sync::Arc;

pub use memory::MemoryTaskStore;

/// Opens the persistent task store under the configured data directory.
pub fn open_store(config: &AppConfig) -> Result<Arc<dyn TaskStore>> {
    let path = config.default_data_path()?.join("tasks");
    let store = DiskTaskStore::open(&path)
        .with_context(|| format!("Failed to open task store at {}", path.display()))?;
    Ok(Arc::new(store))
}
