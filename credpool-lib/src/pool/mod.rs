//! The credential pool.
//!
//! [`CredentialPool`] owns every component, exposes the operations callers
//! and administrators use, and moves state to and from the [`PoolStore`].
//! It is constructed once with [`CredentialPool::open`] and shared as an
//! `Arc`.
//!
//! # Request flow
//!
//! 1. `select_credential` reserves quota on the best admissible credential
//! 2. The caller performs the external call with the handed-out credential
//! 3. `report_outcome` commits the reservation and updates health, or
//!    `release` rolls it back when no call was made

mod background;

pub use background::BackgroundTasks;

use crate::analytics::{
    render_report, render_usage_report, AnalyticsAggregator, FleetSnapshot, RotationEvent,
    RotationOutcome,
};
use crate::clock::SharedClock;
use crate::config::PoolConfig;
use crate::cooldown::{CooldownManager, HealthProbe};
use crate::health::{HealthMonitor, HealthState, HealthTransition, Outcome, PerformanceMetrics};
use crate::persistence::{MetricsBatch, PoolStore};
use crate::rotation::{CredentialHandle, RotationSelector, RotationStrategy};
use crate::store::{Credential, CredentialConfig, CredentialStore, ResetPeriod};
use crate::usage::{QuotaAlert, UsageAnalytics, UsageForecast, UsageStatus, UsageWindowTracker};
use crate::{AdmissionError, CredentialId, CredpoolError, Result, Service};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Alerts considered by the usage report.
const USAGE_REPORT_ALERTS: usize = 50;

/// Pool of credentials for rate-limited services.
pub struct CredentialPool {
    config: PoolConfig,
    store: Arc<CredentialStore>,
    usage: Arc<UsageWindowTracker>,
    health: Arc<HealthMonitor>,
    cooldown: CooldownManager,
    selector: RotationSelector,
    analytics: AnalyticsAggregator,
    persistence: Arc<dyn PoolStore>,
    dirty: Mutex<HashSet<CredentialId>>,
    admin: tokio::sync::Mutex<()>,
    clock: SharedClock,
}

impl CredentialPool {
    /// Build a pool and load its persisted state.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` when the configuration does not validate, or the
    /// persistence error when loading fails.
    pub async fn open(
        config: PoolConfig,
        persistence: Arc<dyn PoolStore>,
        probe: Arc<dyn HealthProbe>,
        clock: SharedClock,
    ) -> Result<Arc<Self>> {
        config.validate()?;

        let store = Arc::new(CredentialStore::new(clock.clone()));
        let usage = Arc::new(UsageWindowTracker::new(
            config.reservation_timeout(),
            config.alerts.clone(),
            clock.clone(),
        ));
        let health = Arc::new(HealthMonitor::new(
            config.health.clone(),
            config.priority.clone(),
            config.backoff.clone(),
            clock.clone(),
        ));
        let cooldown = CooldownManager::new(health.clone(), store.clone(), probe, clock.clone());
        let selector =
            RotationSelector::new(store.clone(), usage.clone(), health.clone(), clock.clone());
        for (service, strategy) in &config.rotation {
            selector.set_strategy(*service, *strategy);
        }
        let analytics = AnalyticsAggregator::new(config.event_log_capacity, clock.now());

        let mut state = persistence.load().await?;
        for credential in &state.credentials {
            store.restore(credential.clone());
            usage.track(credential, state.usage.remove(&credential.id));
            health.track(credential.id);
        }
        for metrics in state.metrics {
            if store.get(&metrics.credential_id).is_ok() {
                health.restore(metrics);
            }
        }
        tracing::info!(credentials = store.len(), "credential pool opened");

        Ok(Arc::new(Self {
            config,
            store,
            usage,
            health,
            cooldown,
            selector,
            analytics,
            persistence,
            dirty: Mutex::new(HashSet::new()),
            admin: tokio::sync::Mutex::new(()),
            clock,
        }))
    }

    /// Configuration the pool runs with.
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    fn mark_dirty(&self, id: CredentialId) {
        self.dirty
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id);
    }

    // === Administration ===

    /// Register a credential and persist it.
    pub async fn register(&self, config: CredentialConfig) -> Result<CredentialId> {
        let _admin = self.admin.lock().await;
        let credential = self.store.register(config)?;
        if let Err(e) = self.persistence.save_credential(&credential).await {
            // Keep memory and storage in agreement.
            let _ = self.store.remove(&credential.id);
            tracing::warn!(credential = %credential.id, error = %e, "registration not persisted");
            return Err(e);
        }
        self.usage.track(&credential, None);
        self.health.track(credential.id);
        tracing::info!(
            credential = %credential.id,
            service = %credential.service,
            rate_limit = credential.rate_limit,
            reset_period = %credential.reset_period,
            "credential registered"
        );
        Ok(credential.id)
    }

    /// Exclude a credential from selection. Idempotent.
    pub async fn disable(&self, id: &CredentialId) -> Result<Credential> {
        let _admin = self.admin.lock().await;
        let credential = self.store.disable(id)?;
        self.persist_admin_change(&credential, |store| store.enable(id))
            .await?;
        tracing::info!(credential = %id, "credential disabled");
        Ok(credential)
    }

    /// Return a credential to selection. Idempotent.
    pub async fn enable(&self, id: &CredentialId) -> Result<Credential> {
        let _admin = self.admin.lock().await;
        let credential = self.store.enable(id)?;
        self.persist_admin_change(&credential, |store| store.disable(id))
            .await?;
        tracing::info!(credential = %id, "credential enabled");
        Ok(credential)
    }

    /// Change a credential's rate limit and window length.
    pub async fn update_limits(
        &self,
        id: &CredentialId,
        rate_limit: u32,
        reset_period: ResetPeriod,
    ) -> Result<Credential> {
        let _admin = self.admin.lock().await;
        let previous = self.store.get(id)?;
        let credential = self.store.update_limits(id, rate_limit, reset_period)?;
        self.persist_admin_change(&credential, |store| {
            store.update_limits(id, previous.rate_limit, previous.reset_period)
        })
        .await?;
        self.usage.sync_limits(&credential)?;
        tracing::info!(
            credential = %id,
            rate_limit,
            reset_period = %reset_period,
            "credential limits updated"
        );
        Ok(credential)
    }

    async fn persist_admin_change(
        &self,
        credential: &Credential,
        revert: impl FnOnce(&CredentialStore) -> Result<Credential>,
    ) -> Result<()> {
        if let Err(e) = self.persistence.save_credential(credential).await {
            tracing::warn!(credential = %credential.id, error = %e, "change not persisted, reverted");
            let _ = revert(self.store.as_ref());
            return Err(e);
        }
        Ok(())
    }

    /// Delete a credential.
    ///
    /// The credential leaves rotation before the outstanding check, so no
    /// selection can reserve on it while the deletion is persisted. It is
    /// put back as it was when the removal fails.
    ///
    /// # Errors
    ///
    /// `ReservationsOutstanding` while unexpired reservations exist.
    pub async fn remove(&self, id: &CredentialId) -> Result<Credential> {
        let _admin = self.admin.lock().await;
        let previous = self.store.get(id)?;
        let was_enabled = previous.is_enabled();
        if was_enabled {
            self.store.disable(id)?;
        }

        let outstanding = self.usage.outstanding(id);
        if outstanding > 0 {
            self.restore_enabled(id, was_enabled);
            return Err(CredpoolError::ReservationsOutstanding {
                id: *id,
                outstanding,
            });
        }
        if let Err(e) = self.persistence.delete_credential(id).await {
            tracing::warn!(credential = %id, error = %e, "removal not persisted");
            self.restore_enabled(id, was_enabled);
            return Err(e);
        }

        self.store.remove(id)?;
        self.usage.untrack(id);
        self.health.untrack(id);
        self.dirty
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
        tracing::info!(credential = %id, "credential removed");
        Ok(previous)
    }

    fn restore_enabled(&self, id: &CredentialId, was_enabled: bool) {
        if was_enabled {
            if let Err(e) = self.store.enable(id) {
                tracing::warn!(credential = %id, error = %e, "could not return credential to rotation");
            }
        }
    }

    /// Administrative reset of a credential to `Healthy`.
    pub fn reinstate(&self, id: &CredentialId) -> Result<HealthTransition> {
        let transition = self.health.reinstate(id)?;
        self.mark_dirty(*id);
        Ok(transition)
    }

    /// Suspend a credential with the configured backoff.
    pub fn schedule_cooldown(&self, id: &CredentialId, reason: &str) -> Result<HealthTransition> {
        let transition = self.cooldown.schedule_cooldown(id, reason)?;
        self.mark_dirty(*id);
        Ok(transition)
    }

    /// Change how a service's credentials are ordered for selection.
    ///
    /// Lasts for the life of the pool; the configured strategy applies again
    /// after a restart.
    pub fn set_rotation_strategy(&self, service: Service, strategy: RotationStrategy) {
        self.selector.set_strategy(service, strategy);
    }

    /// How a service's credentials are ordered for selection.
    pub fn rotation_strategy(&self, service: Service) -> RotationStrategy {
        self.selector.strategy(service)
    }

    /// Halt or resume all selection.
    pub fn set_emergency_stop(&self, active: bool) {
        self.selector.set_emergency_stop(active);
    }

    /// Whether selection is halted.
    pub fn is_emergency_stopped(&self) -> bool {
        self.selector.is_emergency_stopped()
    }

    /// Most recent quota alerts, newest first.
    pub fn recent_alerts(&self, limit: usize) -> Vec<QuotaAlert> {
        self.usage.recent_alerts(limit)
    }

    /// Drop quota alerts older than `age`.
    pub fn clear_alerts_older_than(&self, age: Duration) -> usize {
        self.usage.clear_alerts_older_than(age)
    }

    // === Requests ===

    /// Pick a credential for `service` and reserve one unit of its quota.
    pub fn select_credential(
        &self,
        service: Service,
    ) -> std::result::Result<CredentialHandle, AdmissionError> {
        let started = Instant::now();
        let result = self.selector.select(service);
        self.analytics
            .record_selection(started.elapsed(), result.is_ok());
        if result.is_err() {
            self.analytics.record_event(RotationEvent {
                credential_id: None,
                service,
                timestamp: self.clock.now(),
                outcome: RotationOutcome::AdmissionDenied,
                latency: Duration::ZERO,
            });
        }
        result
    }

    /// Report the result of a call made with a selected credential.
    ///
    /// The reservation is committed whatever the outcome, since the attempt
    /// reached the provider. A reservation that already expired was returned
    /// to the window and is not counted again; the outcome still updates
    /// health.
    pub fn report_outcome(
        &self,
        handle: CredentialHandle,
        outcome: Outcome,
    ) -> Result<HealthTransition> {
        let (credential, reservation) = handle.into_parts();
        let id = credential.id;
        let committed = self.usage.commit(&reservation);
        let quota_remaining = self.usage.remaining_fraction(&id);
        if !committed {
            tracing::warn!(
                credential = %id,
                reservation = %reservation.id(),
                quota_remaining,
                "reported call not counted against quota"
            );
        }
        let transition = self.health.report_outcome(&id, &outcome, quota_remaining)?;

        self.analytics.record_event(RotationEvent {
            credential_id: Some(id),
            service: credential.service,
            timestamp: self.clock.now(),
            outcome: if outcome.normalized().success {
                RotationOutcome::Success
            } else {
                RotationOutcome::Failure
            },
            latency: outcome.latency,
        });
        self.mark_dirty(id);
        Ok(transition)
    }

    /// Return an unused credential without consuming quota.
    pub fn release(&self, handle: CredentialHandle) {
        let (credential, reservation) = handle.into_parts();
        if self.usage.rollback(&reservation) {
            tracing::debug!(credential = %credential.id, "reservation released");
        }
    }

    // === Queries ===

    /// Every registered credential, ordered by service then id.
    pub fn credentials(&self) -> Vec<Credential> {
        self.store.list_all()
    }

    /// A credential by id.
    pub fn credential(&self, id: &CredentialId) -> Result<Credential> {
        self.store.get(id)
    }

    /// Metrics of a credential.
    pub fn metrics(&self, id: &CredentialId) -> Result<PerformanceMetrics> {
        self.health.metrics(id)
    }

    /// Quota usage of a credential.
    pub fn get_usage_status(&self, id: &CredentialId) -> Result<UsageStatus> {
        self.usage.status(id)
    }

    /// Projected usage of a credential from its current window.
    pub fn generate_usage_forecast(&self, id: &CredentialId) -> Result<UsageForecast> {
        self.usage.forecast(id)
    }

    /// Usage and forecast of every credential, ordered by service then id.
    pub fn get_usage_analytics(&self) -> Vec<UsageAnalytics> {
        self.store
            .list_all()
            .into_iter()
            .filter_map(|c| {
                let status = self.usage.status(&c.id).ok()?;
                let forecast = UsageForecast::from_status(&status, self.clock.now());
                Some(UsageAnalytics {
                    service: c.service,
                    name: c.name,
                    status,
                    forecast,
                })
            })
            .collect()
    }

    /// Credentials that are not `Healthy`, most severe first.
    pub fn get_keys_needing_attention(&self) -> Vec<PerformanceMetrics> {
        self.health.keys_needing_attention()
    }

    /// Sweep stale reservations, refresh priority scores and report the
    /// state of every credential.
    pub fn perform_health_check(&self) -> Vec<(CredentialId, HealthState)> {
        let expired = self.usage.expire_stale_reservations();
        if expired > 0 {
            tracing::warn!(expired, "health check released unresolved reservations");
        }

        let mut states = Vec::new();
        for credential in self.store.list_all() {
            let remaining = self.usage.remaining_fraction(&credential.id);
            if self.health.update_priority(&credential.id, remaining).is_err() {
                continue;
            }
            if let Ok(state) = self.health.state(&credential.id) {
                states.push((credential.id, state));
            }
        }

        let counts = self.health.state_counts();
        tracing::info!(
            healthy = counts.healthy,
            degraded = counts.degraded,
            unhealthy = counts.unhealthy,
            failed = counts.failed,
            cooldown = counts.cooldown,
            "health check complete"
        );
        states
    }

    /// Probe credentials whose cooldown has ended.
    pub async fn reactivate_cooled_down_keys(&self) -> Vec<CredentialId> {
        let due = self.health.expired_cooldowns(self.clock.now());
        let reactivated = self.cooldown.reactivate_expired().await;
        for id in due {
            self.mark_dirty(id);
        }
        if !reactivated.is_empty() {
            tracing::info!(count = reactivated.len(), "credentials reactivated");
        }
        reactivated
    }

    /// Fleet-wide counters.
    pub fn snapshot(&self) -> FleetSnapshot {
        self.analytics
            .snapshot(self.health.state_counts(), self.clock.now())
    }

    /// Markdown report of rotation statistics and per-key health.
    pub fn generate_rotation_report(&self) -> String {
        let keys: Vec<(Credential, PerformanceMetrics)> = self
            .store
            .list_all()
            .into_iter()
            .filter_map(|c| {
                let metrics = self.health.metrics(&c.id).ok()?;
                Some((c, metrics))
            })
            .collect();
        render_report(&self.snapshot(), &keys)
    }

    /// Markdown report of quota bands, recent alerts and forecasts.
    pub fn generate_usage_report(&self) -> String {
        let keys = self.get_usage_analytics();
        let alerts = self.usage.recent_alerts(USAGE_REPORT_ALERTS);
        tracing::debug!(keys = keys.len(), alerts = alerts.len(), "usage report generated");
        render_usage_report(&keys, &alerts, self.clock.now())
    }

    // === Lifecycle ===

    /// Write metrics changed since the last flush. Returns how many
    /// credentials were written.
    pub async fn flush(&self) -> Result<usize> {
        let ids: Vec<CredentialId> = {
            let mut dirty = self.dirty.lock().unwrap_or_else(|e| e.into_inner());
            dirty.drain().collect()
        };
        if ids.is_empty() {
            return Ok(0);
        }

        let mut batch = MetricsBatch::default();
        for id in &ids {
            if let Ok(metrics) = self.health.metrics(id) {
                batch.metrics.push(metrics);
            }
            if let Ok(window) = self.usage.window(id) {
                batch.usage.insert(*id, window);
            }
        }

        if let Err(e) = self.persistence.save_metrics(&batch).await {
            tracing::warn!(error = %e, pending = ids.len(), "metrics flush failed");
            let mut dirty = self.dirty.lock().unwrap_or_else(|e| e.into_inner());
            dirty.extend(ids);
            return Err(e);
        }
        tracing::debug!(count = batch.metrics.len(), "metrics flushed");
        Ok(batch.metrics.len())
    }

    /// Write every credential's metrics and usage window.
    pub async fn shutdown(&self) -> Result<()> {
        self.dirty.lock().unwrap_or_else(|e| e.into_inner()).clear();
        let batch = MetricsBatch {
            metrics: self.health.all_metrics(),
            usage: self.usage.all_windows(),
        };
        self.persistence.save_metrics(&batch).await?;
        tracing::info!(credentials = batch.metrics.len(), "credential pool shut down");
        Ok(())
    }

    /// Start reactivation, health check and flush loops.
    pub fn start_background_tasks(self: &Arc<Self>) -> BackgroundTasks {
        BackgroundTasks::spawn(self, &self.config.background)
    }
}
