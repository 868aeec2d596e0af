//! Test fixtures.

use super::ManualClock;
use crate::config::PoolConfig;
use crate::cooldown::{HealthProbe, StaticProbe};
use crate::persistence::MemoryPoolStore;
use crate::pool::CredentialPool;
use crate::store::{CredentialConfig, ResetPeriod};
use crate::Service;
use std::sync::Arc;

/// Collection of commonly used registrations.
pub struct TestFixtures;

impl TestFixtures {
    /// Registration number `n` for a service, with the service's defaults.
    pub fn credential(service: Service, n: usize) -> CredentialConfig {
        CredentialConfig::new(service, format!("key-{n}"), format!("vault://{service}/{n}"))
    }

    /// Registration with an explicit limit and window.
    pub fn limited(service: Service, n: usize, rate_limit: u32, period: ResetPeriod) -> CredentialConfig {
        Self::credential(service, n)
            .with_rate_limit(rate_limit)
            .with_reset_period(period)
    }
}

/// Pool with default configuration, in-memory persistence and a probe that
/// always succeeds.
pub async fn test_pool(clock: Arc<ManualClock>) -> Arc<CredentialPool> {
    test_pool_with(PoolConfig::default(), Arc::new(StaticProbe::healthy()), clock).await
}

/// Pool with the given configuration and probe, in-memory persistence.
///
/// # Panics
/// Panics if the configuration is invalid.
pub async fn test_pool_with(
    config: PoolConfig,
    probe: Arc<dyn HealthProbe>,
    clock: Arc<ManualClock>,
) -> Arc<CredentialPool> {
    CredentialPool::open(config, Arc::new(MemoryPoolStore::new()), probe, clock)
        .await
        .expect("test pool should open")
}
