//! Selection of the best admissible credential.

use super::strategy::{Ranked, RotationStrategy};
use super::CredentialHandle;
use crate::clock::SharedClock;
use crate::health::{HealthMonitor, HealthState};
use crate::store::{Credential, CredentialStore};
use crate::usage::UsageWindowTracker;
use crate::{AdmissionError, CredentialId, CredpoolError, Service};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

struct Candidate {
    credential: Credential,
    priority: f64,
    last_used: Option<DateTime<Utc>>,
    health: HealthState,
}

impl Ranked for Candidate {
    fn id(&self) -> CredentialId {
        self.credential.id
    }

    fn priority(&self) -> f64 {
        self.priority
    }

    fn last_used(&self) -> Option<DateTime<Utc>> {
        self.last_used
    }

    fn health(&self) -> HealthState {
        self.health
    }
}

/// Picks credentials for callers.
pub struct RotationSelector {
    store: Arc<CredentialStore>,
    usage: Arc<UsageWindowTracker>,
    health: Arc<HealthMonitor>,
    clock: SharedClock,
    emergency_stop: AtomicBool,
    strategies: RwLock<HashMap<Service, RotationStrategy>>,
    last_selected: Mutex<HashMap<Service, CredentialId>>,
}

impl RotationSelector {
    /// Create a selector over the pool's components.
    pub fn new(
        store: Arc<CredentialStore>,
        usage: Arc<UsageWindowTracker>,
        health: Arc<HealthMonitor>,
        clock: SharedClock,
    ) -> Self {
        Self {
            store,
            usage,
            health,
            clock,
            emergency_stop: AtomicBool::new(false),
            strategies: RwLock::new(HashMap::new()),
            last_selected: Mutex::new(HashMap::new()),
        }
    }

    /// Candidate ordering used for a service.
    pub fn strategy(&self, service: Service) -> RotationStrategy {
        self.strategies
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&service)
            .copied()
            .unwrap_or_default()
    }

    /// Change the candidate ordering of a service.
    pub fn set_strategy(&self, service: Service, strategy: RotationStrategy) {
        let previous = self
            .strategies
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(service, strategy)
            .unwrap_or_default();
        if previous != strategy {
            tracing::info!(service = %service, from = %previous, to = %strategy, "rotation strategy changed");
        }
    }

    /// Halt or resume all selection.
    pub fn set_emergency_stop(&self, active: bool) {
        let was = self.emergency_stop.swap(active, Ordering::SeqCst);
        if was != active {
            if active {
                tracing::warn!("emergency stop activated, selection halted");
            } else {
                tracing::info!("emergency stop released");
            }
        }
    }

    /// Whether selection is halted.
    pub fn is_emergency_stopped(&self) -> bool {
        self.emergency_stop.load(Ordering::SeqCst)
    }

    /// Enabled, selectable credentials of a service in trial order.
    fn candidates(&self, service: Service) -> Vec<Candidate> {
        let mut candidates: Vec<Candidate> = self
            .store
            .list(service)
            .into_iter()
            .filter(|c| c.is_enabled())
            .filter_map(|credential| {
                let metrics = self.health.metrics(&credential.id).ok()?;
                metrics.health_status.is_selectable().then(|| Candidate {
                    credential,
                    priority: metrics.priority_score,
                    last_used: metrics.last_used,
                    health: metrics.health_status,
                })
            })
            .collect();

        let last = self
            .last_selected
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&service)
            .copied();
        self.strategy(service).order(&mut candidates, last);
        candidates
    }

    /// Still selectable after the reservation was taken.
    fn still_admissible(&self, id: &CredentialId) -> bool {
        let enabled = self.store.get(id).map(|c| c.is_enabled()).unwrap_or(false);
        let selectable = self
            .health
            .state(id)
            .map(|s| s.is_selectable())
            .unwrap_or(false);
        enabled && selectable
    }

    /// Select a credential and reserve one unit of its quota.
    ///
    /// # Errors
    ///
    /// - `EmergencyStop` while the stop switch is on
    /// - `UnknownService` when nothing was ever registered for the service
    /// - `NoAdmissibleCredential` when every credential is exhausted,
    ///   cooling down, failed or disabled
    pub fn select(&self, service: Service) -> std::result::Result<CredentialHandle, AdmissionError> {
        if self.is_emergency_stopped() {
            return Err(AdmissionError::EmergencyStop { service });
        }
        if !self.store.has_service(service) {
            return Err(AdmissionError::UnknownService { service });
        }

        for candidate in self.candidates(service) {
            let id = candidate.credential.id;
            let reservation = match self.usage.try_reserve(&id) {
                Ok(reservation) => reservation,
                Err(CredpoolError::QuotaExceeded { .. }) => continue,
                Err(e) => {
                    tracing::debug!(credential = %id, error = %e, "candidate skipped");
                    continue;
                }
            };

            if !self.still_admissible(&id) {
                self.usage.rollback(&reservation);
                continue;
            }

            self.last_selected
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(service, id);
            let now = self.clock.now();
            if let Err(e) = self.health.mark_used(&id, now) {
                tracing::debug!(credential = %id, error = %e, "could not mark credential used");
            }
            tracing::debug!(
                credential = %id,
                service = %service,
                priority = candidate.priority,
                "credential selected"
            );
            return Ok(CredentialHandle::new(candidate.credential, reservation, now));
        }

        tracing::info!(service = %service, "no admissible credential");
        Err(AdmissionError::NoAdmissibleCredential { service })
    }
}
