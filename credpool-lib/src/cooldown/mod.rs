//! Temporary suspension and probe-driven recovery.
//!
//! A credential enters `Cooldown` on a throttling signal or by explicit
//! scheduling. Once `cooldown_until` passes, [`CooldownManager::reactivate_expired`]
//! probes it and either returns it to rotation or extends the cooldown with
//! a longer backoff.

mod probe;

pub use probe::{HealthProbe, StaticProbe};

use crate::clock::SharedClock;
use crate::health::{HealthMonitor, HealthState, HealthTransition};
use crate::store::CredentialStore;
use crate::{CredentialId, Result};
use std::sync::Arc;

/// Schedules and lifts cooldowns.
pub struct CooldownManager {
    health: Arc<HealthMonitor>,
    store: Arc<CredentialStore>,
    probe: Arc<dyn HealthProbe>,
    clock: SharedClock,
}

impl CooldownManager {
    /// Create a manager.
    pub fn new(
        health: Arc<HealthMonitor>,
        store: Arc<CredentialStore>,
        probe: Arc<dyn HealthProbe>,
        clock: SharedClock,
    ) -> Self {
        Self {
            health,
            store,
            probe,
            clock,
        }
    }

    /// Whether a credential is suspended.
    pub fn is_in_cooldown(&self, id: &CredentialId) -> bool {
        self.health.is_in_cooldown(id)
    }

    /// Suspend a credential now.
    pub fn schedule_cooldown(&self, id: &CredentialId, reason: &str) -> Result<HealthTransition> {
        let transition = self.health.enter_cooldown(id)?;
        let until = self.health.metrics(id)?.cooldown_until;
        tracing::info!(
            credential = %id,
            reason,
            until = ?until,
            "cooldown scheduled"
        );
        Ok(transition)
    }

    /// Probe every credential whose cooldown has ended.
    ///
    /// Returns the credentials that rejoined rotation. Probes run
    /// sequentially with no lock held; the result is applied afterwards, and
    /// ignored if an operator changed the credential's state meanwhile.
    pub async fn reactivate_expired(&self) -> Vec<CredentialId> {
        let due = self.health.expired_cooldowns(self.clock.now());
        let mut reactivated = Vec::new();

        for id in due {
            let credential = match self.store.get(&id) {
                Ok(credential) => credential,
                Err(_) => {
                    tracing::debug!(credential = %id, "skipping probe of removed credential");
                    continue;
                }
            };

            let healthy = match self.probe.probe(&credential).await {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(credential = %id, error = %e, "probe failed");
                    false
                }
            };

            match self.health.complete_probe(&id, healthy) {
                Ok(t) if t.from == HealthState::Cooldown && t.to == HealthState::Healthy => {
                    reactivated.push(id);
                }
                Ok(t) if t.to == HealthState::Cooldown => {
                    let until = self.health.metrics(&id).ok().and_then(|m| m.cooldown_until);
                    tracing::debug!(credential = %id, until = ?until, "cooldown extended");
                }
                Ok(_) => {}
                Err(e) => tracing::debug!(credential = %id, error = %e, "probe result dropped"),
            }
        }

        reactivated
    }
}
