//! Subcommand implementations.

pub mod config_cmd;
pub mod insights;
pub mod run;
pub mod say;
pub mod status;

use earshot_config::AppConfig;
use earshot_core::Store;
use earshot_store::{InMemoryStore, SqliteStore};
use std::sync::Arc;

/// Open the configured store, or an in-memory one when asked.
pub async fn open_store(
    config: &AppConfig,
    memory: bool,
) -> Result<Arc<dyn Store>, Box<dyn std::error::Error>> {
    if memory || config.store.backend == "memory" {
        return Ok(Arc::new(InMemoryStore::new()));
    }

    let path = config.store.database_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = SqliteStore::new(&format!("sqlite://{}", path.display())).await?;
    Ok(Arc::new(store))
}

pub fn load_config() -> Result<AppConfig, Box<dyn std::error::Error>> {
    Ok(AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?)
}
