//! CLI command implementations

pub mod config;
pub mod keys;
pub mod report;
pub mod simulate;
pub mod status;

use anyhow::{Context, Result};
use credpool_lib::config::PoolConfig;
use credpool_lib::cooldown::{HealthProbe, StaticProbe};
use credpool_lib::persistence::JsonFilePoolStore;
use credpool_lib::pool::CredentialPool;
use credpool_lib::clock::SystemClock;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Get the path to the pool configuration file
pub fn config_path(storage_dir: &Path) -> PathBuf {
    storage_dir.join("config.json")
}

/// Get the path to the persisted pool state
pub fn state_path(storage_dir: &Path) -> PathBuf {
    storage_dir.join("pool.json")
}

/// Load the configuration, falling back to defaults when none was written
pub fn load_config(storage_dir: &Path) -> Result<PoolConfig> {
    let path = config_path(storage_dir);
    if !path.exists() {
        return Ok(PoolConfig::default());
    }
    PoolConfig::from_file(&path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))
}

/// Open the pool stored in `storage_dir` with a probe that always succeeds
pub async fn open_pool(storage_dir: &Path) -> Result<Arc<CredentialPool>> {
    open_pool_with(storage_dir, Arc::new(StaticProbe::healthy())).await
}

/// Open the pool stored in `storage_dir`
pub async fn open_pool_with(
    storage_dir: &Path,
    probe: Arc<dyn HealthProbe>,
) -> Result<Arc<CredentialPool>> {
    let config = load_config(storage_dir)?;
    let store = Arc::new(JsonFilePoolStore::new(state_path(storage_dir)));
    CredentialPool::open(config, store, probe, Arc::new(SystemClock))
        .await
        .with_context(|| format!("Failed to open pool in {}", storage_dir.display()))
}
