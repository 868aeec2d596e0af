//! Single-document JSON file store.

use super::{MetricsBatch, PoolState, PoolStore, StoredState};
use crate::store::Credential;
use crate::{CredentialId, CredpoolError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

const FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct Document {
    version: u32,
    #[serde(flatten)]
    state: StoredState,
}

/// Store keeping the whole pool state in one JSON file.
///
/// Every write replaces the file atomically: the document goes to a
/// temporary sibling first and is then renamed over the original.
pub struct JsonFilePoolStore {
    path: PathBuf,
    cache: Mutex<Option<StoredState>>,
}

impl JsonFilePoolStore {
    /// Store backed by `path`. The file is created on the first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: Mutex::new(None),
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_file(&self) -> Result<StoredState> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(json) if json.trim().is_empty() => Ok(StoredState::default()),
            Ok(json) => {
                let document: Document = serde_json::from_str(&json)?;
                if document.version > FORMAT_VERSION {
                    return Err(CredpoolError::Serialization(format!(
                        "unsupported store format version {}",
                        document.version
                    )));
                }
                Ok(document.state)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StoredState::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_file(&self, state: &StoredState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let document = Document {
            version: FORMAT_VERSION,
            state: state.clone(),
        };
        let json = serde_json::to_string_pretty(&document)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Apply a change to the cached state and persist it.
    ///
    /// The cache only ever holds what is on disk.
    async fn update(&self, f: impl FnOnce(&mut StoredState)) -> Result<()> {
        let mut cache = self.cache.lock().await;
        let mut state = match cache.as_ref() {
            Some(state) => state.clone(),
            None => self.read_file().await?,
        };
        f(&mut state);
        self.write_file(&state).await?;
        *cache = Some(state);
        Ok(())
    }
}

#[async_trait]
impl PoolStore for JsonFilePoolStore {
    async fn load(&self) -> Result<PoolState> {
        let mut cache = self.cache.lock().await;
        let state = self.read_file().await?;
        let pool_state = state.to_pool_state();
        *cache = Some(state);
        tracing::debug!(
            path = %self.path.display(),
            credentials = pool_state.credentials.len(),
            "loaded pool state"
        );
        Ok(pool_state)
    }

    async fn save_credential(&self, credential: &Credential) -> Result<()> {
        self.update(|state| state.save_credential(credential)).await
    }

    async fn delete_credential(&self, id: &CredentialId) -> Result<()> {
        self.update(|state| state.delete_credential(id)).await
    }

    async fn save_metrics(&self, batch: &MetricsBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        self.update(|state| state.save_metrics(batch)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CredentialConfig, CredentialStore};
    use crate::test_utils::ManualClock;
    use crate::Service;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_is_empty_state() {
        let dir = TempDir::new().unwrap();
        let store = JsonFilePoolStore::new(dir.path().join("pool.json"));
        assert_eq!(store.load().await.unwrap(), PoolState::default());
    }

    #[tokio::test]
    async fn test_write_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("pool.json");
        let registry = CredentialStore::new(Arc::new(ManualClock::default()));
        let credential = registry
            .register(CredentialConfig::new(Service::SerpApi, "a", "vault://serp"))
            .unwrap();

        let store = JsonFilePoolStore::new(&path);
        store.save_credential(&credential).await.unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());

        let reopened = JsonFilePoolStore::new(&path);
        let state = reopened.load().await.unwrap();
        assert_eq!(state.credentials.len(), 1);
        assert_eq!(state.credentials[0].id, credential.id);
        assert_eq!(state.credentials[0].secret_ref.expose(), "vault://serp");
    }

    #[tokio::test]
    async fn test_failed_write_is_not_carried_by_the_next_one() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pool.json");
        let registry = CredentialStore::new(Arc::new(ManualClock::default()));
        let rejected = registry
            .register(CredentialConfig::new(Service::Exa, "rejected", "vault://exa/1"))
            .unwrap();
        let accepted = registry
            .register(CredentialConfig::new(Service::Exa, "accepted", "vault://exa/2"))
            .unwrap();

        let store = JsonFilePoolStore::new(&path);
        store.load().await.unwrap();

        // A directory in the way of the temporary file makes the write fail.
        let tmp = path.with_extension("json.tmp");
        std::fs::create_dir(&tmp).unwrap();
        assert!(store.save_credential(&rejected).await.is_err());
        std::fs::remove_dir(&tmp).unwrap();

        store.save_credential(&accepted).await.unwrap();
        let state = JsonFilePoolStore::new(&path).load().await.unwrap();
        assert_eq!(state.credentials.len(), 1);
        assert_eq!(state.credentials[0].id, accepted.id);
    }

    #[tokio::test]
    async fn test_rejects_newer_format() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pool.json");
        std::fs::write(&path, r#"{ "version": 99 }"#).unwrap();
        let store = JsonFilePoolStore::new(&path);
        assert!(matches!(
            store.load().await,
            Err(CredpoolError::Serialization(_))
        ));
    }
}
