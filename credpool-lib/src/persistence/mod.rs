//! Persistence boundary.
//!
//! The pool writes administrative changes through to a [`PoolStore`]
//! immediately. Metrics and usage windows change on every request and are
//! written behind in batches.

mod json_file;
mod memory;

pub use json_file::JsonFilePoolStore;
pub use memory::MemoryPoolStore;

use crate::health::PerformanceMetrics;
use crate::store::Credential;
use crate::usage::UsageWindow;
use crate::{CredentialId, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Everything the pool needs to resume after a restart.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolState {
    /// Registered credentials.
    #[serde(default)]
    pub credentials: Vec<Credential>,
    /// Last flushed metrics.
    #[serde(default)]
    pub metrics: Vec<PerformanceMetrics>,
    /// Last flushed usage windows.
    #[serde(default)]
    pub usage: HashMap<CredentialId, UsageWindow>,
}

/// Write-behind batch of changed metrics and usage windows.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsBatch {
    /// Changed metrics.
    pub metrics: Vec<PerformanceMetrics>,
    /// Usage windows of the same credentials.
    pub usage: HashMap<CredentialId, UsageWindow>,
}

impl MetricsBatch {
    /// Whether there is nothing to write.
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty() && self.usage.is_empty()
    }
}

/// Storage collaborator for pool state.
#[async_trait]
pub trait PoolStore: Send + Sync {
    /// Load the persisted state. An empty store yields the default state.
    async fn load(&self) -> Result<PoolState>;

    /// Insert or replace a credential.
    async fn save_credential(&self, credential: &Credential) -> Result<()>;

    /// Delete a credential with its metrics and usage.
    async fn delete_credential(&self, id: &CredentialId) -> Result<()>;

    /// Insert or replace metrics and usage windows.
    async fn save_metrics(&self, batch: &MetricsBatch) -> Result<()>;
}

/// Keyed form of [`PoolState`] shared by the implementations.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct StoredState {
    #[serde(default)]
    credentials: HashMap<CredentialId, Credential>,
    #[serde(default)]
    metrics: HashMap<CredentialId, PerformanceMetrics>,
    #[serde(default)]
    usage: HashMap<CredentialId, UsageWindow>,
}

impl StoredState {
    fn to_pool_state(&self) -> PoolState {
        let mut credentials: Vec<Credential> = self.credentials.values().cloned().collect();
        credentials.sort_by_key(|c| (c.created_at, c.id));
        // Metrics of deleted credentials are never resurrected.
        let metrics = self
            .metrics
            .values()
            .filter(|m| self.credentials.contains_key(&m.credential_id))
            .cloned()
            .collect();
        let usage = self
            .usage
            .iter()
            .filter(|(id, _)| self.credentials.contains_key(id))
            .map(|(id, w)| (*id, w.clone()))
            .collect();
        PoolState {
            credentials,
            metrics,
            usage,
        }
    }

    fn save_credential(&mut self, credential: &Credential) {
        self.credentials.insert(credential.id, credential.clone());
    }

    fn delete_credential(&mut self, id: &CredentialId) {
        self.credentials.remove(id);
        self.metrics.remove(id);
        self.usage.remove(id);
    }

    fn save_metrics(&mut self, batch: &MetricsBatch) {
        for m in &batch.metrics {
            if self.credentials.contains_key(&m.credential_id) {
                self.metrics.insert(m.credential_id, m.clone());
            }
        }
        for (id, window) in &batch.usage {
            if self.credentials.contains_key(id) {
                self.usage.insert(*id, window.clone());
            }
        }
    }
}
