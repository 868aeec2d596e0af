//! In-memory store.

use super::{MetricsBatch, PoolState, PoolStore, StoredState};
use crate::store::Credential;
use crate::{CredentialId, Result};
use async_trait::async_trait;
use std::sync::Mutex;

/// Store that keeps state for the lifetime of the process.
#[derive(Debug, Default)]
pub struct MemoryPoolStore {
    state: Mutex<StoredState>,
}

impl MemoryPoolStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the stored state.
    pub fn state(&self) -> PoolState {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .to_pool_state()
    }
}

#[async_trait]
impl PoolStore for MemoryPoolStore {
    async fn load(&self) -> Result<PoolState> {
        Ok(self.state())
    }

    async fn save_credential(&self, credential: &Credential) -> Result<()> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .save_credential(credential);
        Ok(())
    }

    async fn delete_credential(&self, id: &CredentialId) -> Result<()> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .delete_credential(id);
        Ok(())
    }

    async fn save_metrics(&self, batch: &MetricsBatch) -> Result<()> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .save_metrics(batch);
        Ok(())
    }
}
