//! Per-credential health tracking.
//!
//! Every outcome report updates lifetime counters, a rolling window of the
//! most recent outcomes, the discrete [`HealthState`] and the continuous
//! priority score used by the selector.
//!
//! # Thread Safety
//!
//! Records live behind a per-credential `Mutex` inside an `RwLock`ed map.
//! Reports for the same credential are applied in call order.

mod priority;
mod state;

pub use priority::{priority_score, PriorityInputs};
pub use state::{next_state, HealthState, Outcome, TransitionInput};

use crate::clock::SharedClock;
use crate::config::{BackoffPolicy, HealthThresholds, PriorityWeights};
use crate::{CredentialId, CredpoolError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};

/// Statistics and health of one credential.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// Credential.
    pub credential_id: CredentialId,
    /// Reported outcomes.
    pub total_requests: u64,
    /// Successful outcomes.
    pub successful_requests: u64,
    /// Failed outcomes.
    pub failed_requests: u64,
    /// Lifetime success rate.
    pub success_rate: f64,
    /// Success rate over the rolling window.
    pub rolling_success_rate: f64,
    /// Mean latency of every reported call, in milliseconds.
    pub average_response_time_ms: f64,
    /// Failures since the last success.
    pub consecutive_failures: u32,
    /// Successes since the last failure.
    pub consecutive_successes: u32,
    /// Last successful outcome.
    pub last_success: Option<DateTime<Utc>>,
    /// Last failed outcome.
    pub last_failure: Option<DateTime<Utc>>,
    /// Current health.
    pub health_status: HealthState,
    /// Selection ranking in `[0, 100]`.
    pub priority_score: f64,
    /// Last time the selector handed the credential out.
    pub last_used: Option<DateTime<Utc>>,
    /// End of the current cooldown; set exactly when in `Cooldown`.
    pub cooldown_until: Option<DateTime<Utc>>,
    /// Backoff level of the current cooldown.
    pub cooldown_level: u32,
    /// The provider rejected the credential; blocks recovery by traffic.
    pub permanent_failure: bool,
    /// Most recent outcomes, oldest first.
    #[serde(default)]
    pub recent_outcomes: VecDeque<bool>,
}

impl PerformanceMetrics {
    /// Fresh metrics for a newly registered credential.
    pub fn new(credential_id: CredentialId) -> Self {
        Self {
            credential_id,
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            success_rate: 1.0,
            rolling_success_rate: 1.0,
            average_response_time_ms: 0.0,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_success: None,
            last_failure: None,
            health_status: HealthState::Healthy,
            priority_score: 100.0,
            last_used: None,
            cooldown_until: None,
            cooldown_level: 0,
            permanent_failure: false,
            recent_outcomes: VecDeque::new(),
        }
    }

    fn rolling_rate(&self) -> f64 {
        if self.recent_outcomes.is_empty() {
            return 1.0;
        }
        let ok = self.recent_outcomes.iter().filter(|s| **s).count();
        ok as f64 / self.recent_outcomes.len() as f64
    }

    fn enter_cooldown(&mut self, backoff: &BackoffPolicy, now: DateTime<Utc>) {
        if self.health_status != HealthState::Cooldown {
            self.cooldown_level = self.consecutive_failures.max(1);
        }
        self.health_status = HealthState::Cooldown;
        self.cooldown_until = Some(cooldown_deadline(now, backoff.backoff(self.cooldown_level)));
    }
}

/// State change caused by a report, probe or administrative action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthTransition {
    /// Credential.
    pub credential_id: CredentialId,
    /// State before.
    pub from: HealthState,
    /// State after.
    pub to: HealthState,
}

impl HealthTransition {
    /// Whether the state changed.
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

/// Number of credentials in each health state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCounts {
    /// Healthy credentials.
    pub healthy: usize,
    /// Degraded credentials.
    pub degraded: usize,
    /// Unhealthy credentials.
    pub unhealthy: usize,
    /// Failed credentials.
    pub failed: usize,
    /// Credentials cooling down.
    pub cooldown: usize,
}

impl HealthCounts {
    /// Count one credential in `state`.
    pub fn add(&mut self, state: HealthState) {
        match state {
            HealthState::Healthy => self.healthy += 1,
            HealthState::Degraded => self.degraded += 1,
            HealthState::Unhealthy => self.unhealthy += 1,
            HealthState::Failed => self.failed += 1,
            HealthState::Cooldown => self.cooldown += 1,
        }
    }

    /// Count of credentials in `state`.
    pub fn get(&self, state: HealthState) -> usize {
        match state {
            HealthState::Healthy => self.healthy,
            HealthState::Degraded => self.degraded,
            HealthState::Unhealthy => self.unhealthy,
            HealthState::Failed => self.failed,
            HealthState::Cooldown => self.cooldown,
        }
    }

    /// Total credentials counted.
    pub fn total(&self) -> usize {
        self.healthy + self.degraded + self.unhealthy + self.failed + self.cooldown
    }
}

pub(crate) fn chrono_duration(d: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}

/// End of a cooldown, saturating at the latest representable instant.
pub(crate) fn cooldown_deadline(now: DateTime<Utc>, backoff: std::time::Duration) -> DateTime<Utc> {
    now.checked_add_signed(chrono_duration(backoff))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Tracks health of every credential.
pub struct HealthMonitor {
    records: RwLock<HashMap<CredentialId, Arc<Mutex<PerformanceMetrics>>>>,
    thresholds: HealthThresholds,
    weights: PriorityWeights,
    backoff: BackoffPolicy,
    clock: SharedClock,
}

impl HealthMonitor {
    /// Create a monitor.
    pub fn new(
        thresholds: HealthThresholds,
        weights: PriorityWeights,
        backoff: BackoffPolicy,
        clock: SharedClock,
    ) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            thresholds,
            weights,
            backoff,
            clock,
        }
    }

    /// Backoff curve used for cooldowns.
    pub fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }

    fn record(&self, id: &CredentialId) -> Result<Arc<Mutex<PerformanceMetrics>>> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        records.get(id).cloned().ok_or(CredpoolError::NotFound(*id))
    }

    fn with_record<T>(
        &self,
        id: &CredentialId,
        f: impl FnOnce(&mut PerformanceMetrics) -> T,
    ) -> Result<T> {
        let record = self.record(id)?;
        let mut metrics = record.lock().unwrap_or_else(|e| e.into_inner());
        Ok(f(&mut metrics))
    }

    /// Start tracking a credential with fresh metrics. No-op when tracked.
    pub fn track(&self, id: CredentialId) {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        records
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(PerformanceMetrics::new(id))));
    }

    /// Install persisted metrics, replacing any tracked record.
    pub fn restore(&self, mut metrics: PerformanceMetrics) {
        // Cooldown must carry an end time; a missing one is due for a probe.
        if metrics.health_status == HealthState::Cooldown && metrics.cooldown_until.is_none() {
            metrics.cooldown_until = Some(self.clock.now());
        }
        if metrics.health_status != HealthState::Cooldown {
            metrics.cooldown_until = None;
        }
        while metrics.recent_outcomes.len() > self.thresholds.rolling_window {
            metrics.recent_outcomes.pop_front();
        }
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        records.insert(metrics.credential_id, Arc::new(Mutex::new(metrics)));
    }

    /// Stop tracking a credential.
    pub fn untrack(&self, id: &CredentialId) {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        records.remove(id);
    }

    /// Apply an outcome report.
    ///
    /// `quota_remaining` is the fraction of the credential's window still
    /// free after the attempt, used by the priority score.
    pub fn report_outcome(
        &self,
        id: &CredentialId,
        outcome: &Outcome,
        quota_remaining: f64,
    ) -> Result<HealthTransition> {
        if outcome.is_contradictory() {
            tracing::warn!(credential = %id, ?outcome, "contradictory outcome treated as failure");
        }
        let outcome = outcome.normalized();
        let now = self.clock.now();

        let transition = self.with_record(id, |m| {
            let from = m.health_status;

            m.total_requests += 1;
            if outcome.success {
                m.successful_requests += 1;
                m.consecutive_successes = m.consecutive_successes.saturating_add(1);
                m.consecutive_failures = 0;
                m.last_success = Some(now);
            } else {
                m.failed_requests += 1;
                m.consecutive_failures = m.consecutive_failures.saturating_add(1);
                m.consecutive_successes = 0;
                m.last_failure = Some(now);
            }
            m.success_rate = m.successful_requests as f64 / m.total_requests as f64;
            let latency_ms = outcome.latency.as_secs_f64() * 1000.0;
            m.average_response_time_ms +=
                (latency_ms - m.average_response_time_ms) / m.total_requests as f64;

            m.recent_outcomes.push_back(outcome.success);
            while m.recent_outcomes.len() > self.thresholds.rolling_window {
                m.recent_outcomes.pop_front();
            }
            m.rolling_success_rate = m.rolling_rate();
            m.permanent_failure |= outcome.permanent_error;

            let to = next_state(
                &TransitionInput {
                    current: from,
                    rolling_success_rate: m.rolling_success_rate,
                    consecutive_failures: m.consecutive_failures,
                    consecutive_successes: m.consecutive_successes,
                    permanent_error: outcome.permanent_error,
                    permanent_failure: m.permanent_failure,
                    rate_limited: outcome.rate_limited,
                },
                &self.thresholds,
            );
            if to == HealthState::Cooldown && from != HealthState::Cooldown {
                m.enter_cooldown(&self.backoff, now);
            } else {
                m.health_status = to;
            }
            self.refresh_priority(m, quota_remaining, now);

            HealthTransition {
                credential_id: *id,
                from,
                to: m.health_status,
            }
        })?;

        log_transition(&transition, "outcome report");
        Ok(transition)
    }

    fn refresh_priority(&self, m: &mut PerformanceMetrics, quota_remaining: f64, now: DateTime<Utc>) {
        m.priority_score = priority_score(
            &PriorityInputs {
                success_rate: m.rolling_success_rate,
                consecutive_failures: m.consecutive_failures,
                since_last_success: m
                    .last_success
                    .map(|at| (now - at).to_std().unwrap_or_default()),
                quota_remaining,
            },
            &self.weights,
        );
    }

    /// Recompute the priority score with the current quota headroom.
    pub fn update_priority(&self, id: &CredentialId, quota_remaining: f64) -> Result<f64> {
        let now = self.clock.now();
        self.with_record(id, |m| {
            self.refresh_priority(m, quota_remaining, now);
            m.priority_score
        })
    }

    /// Suspend a credential. A credential already cooling down keeps its
    /// level and gets a fresh end time.
    pub fn enter_cooldown(&self, id: &CredentialId) -> Result<HealthTransition> {
        let now = self.clock.now();
        self.with_record(id, |m| {
            let from = m.health_status;
            m.enter_cooldown(&self.backoff, now);
            HealthTransition {
                credential_id: *id,
                from,
                to: m.health_status,
            }
        })
    }

    /// Whether a credential is suspended right now.
    pub fn is_in_cooldown(&self, id: &CredentialId) -> bool {
        self.with_record(id, |m| m.health_status == HealthState::Cooldown)
            .unwrap_or(false)
    }

    /// Credentials whose cooldown ended at or before `now`.
    pub fn expired_cooldowns(&self, now: DateTime<Utc>) -> Vec<CredentialId> {
        let mut expired: Vec<CredentialId> = self
            .snapshot_records()
            .into_iter()
            .filter_map(|record| {
                let m = record.lock().unwrap_or_else(|e| e.into_inner());
                let due = m.health_status == HealthState::Cooldown
                    && m.cooldown_until.map(|until| until <= now).unwrap_or(true);
                due.then_some(m.credential_id)
            })
            .collect();
        expired.sort();
        expired
    }

    /// Apply a probe result to a cooling credential.
    ///
    /// Success returns the credential to `Healthy` with a clean slate; failure
    /// raises the backoff level and extends the cooldown. Credentials no
    /// longer in cooldown are left alone.
    pub fn complete_probe(&self, id: &CredentialId, healthy: bool) -> Result<HealthTransition> {
        let now = self.clock.now();
        let transition = self.with_record(id, |m| {
            let from = m.health_status;
            if from != HealthState::Cooldown {
                return HealthTransition {
                    credential_id: *id,
                    from,
                    to: from,
                };
            }
            if healthy {
                m.health_status = HealthState::Healthy;
                m.cooldown_until = None;
                m.cooldown_level = 0;
                m.consecutive_failures = 0;
                m.permanent_failure = false;
                m.recent_outcomes.clear();
                m.rolling_success_rate = 1.0;
            } else {
                m.cooldown_level = m.cooldown_level.saturating_add(1);
                m.cooldown_until =
                    Some(cooldown_deadline(now, self.backoff.backoff(m.cooldown_level)));
            }
            HealthTransition {
                credential_id: *id,
                from,
                to: m.health_status,
            }
        })?;
        log_transition(&transition, "probe");
        Ok(transition)
    }

    /// Administrative reset to `Healthy`, clearing failure history.
    pub fn reinstate(&self, id: &CredentialId) -> Result<HealthTransition> {
        let transition = self.with_record(id, |m| {
            let from = m.health_status;
            m.health_status = HealthState::Healthy;
            m.cooldown_until = None;
            m.cooldown_level = 0;
            m.consecutive_failures = 0;
            m.consecutive_successes = 0;
            m.permanent_failure = false;
            m.recent_outcomes.clear();
            m.rolling_success_rate = 1.0;
            HealthTransition {
                credential_id: *id,
                from,
                to: HealthState::Healthy,
            }
        })?;
        log_transition(&transition, "reinstate");
        Ok(transition)
    }

    /// Record that the selector handed the credential out.
    pub fn mark_used(&self, id: &CredentialId, at: DateTime<Utc>) -> Result<()> {
        self.with_record(id, |m| m.last_used = Some(at))
    }

    /// Current state of a credential.
    pub fn state(&self, id: &CredentialId) -> Result<HealthState> {
        self.with_record(id, |m| m.health_status)
    }

    /// Metrics of a credential.
    pub fn metrics(&self, id: &CredentialId) -> Result<PerformanceMetrics> {
        self.with_record(id, |m| m.clone())
    }

    fn snapshot_records(&self) -> Vec<Arc<Mutex<PerformanceMetrics>>> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        records.values().cloned().collect()
    }

    /// Metrics of every credential, highest priority first.
    pub fn all_metrics(&self) -> Vec<PerformanceMetrics> {
        let mut all: Vec<PerformanceMetrics> = self
            .snapshot_records()
            .into_iter()
            .map(|record| record.lock().unwrap_or_else(|e| e.into_inner()).clone())
            .collect();
        all.sort_by(|a, b| {
            b.priority_score
                .total_cmp(&a.priority_score)
                .then(a.credential_id.cmp(&b.credential_id))
        });
        all
    }

    /// Metrics of credentials that are not `Healthy`, most severe first.
    pub fn keys_needing_attention(&self) -> Vec<PerformanceMetrics> {
        let mut keys: Vec<PerformanceMetrics> = self
            .all_metrics()
            .into_iter()
            .filter(|m| m.health_status.needs_attention())
            .collect();
        keys.sort_by(|a, b| {
            b.health_status
                .cmp(&a.health_status)
                .then(a.credential_id.cmp(&b.credential_id))
        });
        keys
    }

    /// Number of credentials per state.
    pub fn state_counts(&self) -> HealthCounts {
        let mut counts = HealthCounts::default();
        for record in self.snapshot_records() {
            counts.add(record.lock().unwrap_or_else(|e| e.into_inner()).health_status);
        }
        counts
    }
}

fn log_transition(transition: &HealthTransition, cause: &str) {
    if !transition.changed() {
        return;
    }
    if transition.to > transition.from {
        tracing::warn!(
            credential = %transition.credential_id,
            from = %transition.from,
            to = %transition.to,
            cause,
            "credential health worsened"
        );
    } else {
        tracing::info!(
            credential = %transition.credential_id,
            from = %transition.from,
            to = %transition.to,
            cause,
            "credential health improved"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use crate::test_utils::ManualClock;
    use std::time::Duration;

    fn monitor() -> (Arc<ManualClock>, HealthMonitor, CredentialId) {
        let clock = Arc::new(ManualClock::default());
        let monitor = HealthMonitor::new(
            HealthThresholds::default(),
            PriorityWeights::default(),
            BackoffPolicy::default(),
            clock.clone(),
        );
        let id = CredentialId::new();
        monitor.track(id);
        (clock, monitor, id)
    }

    fn fail(monitor: &HealthMonitor, id: &CredentialId) -> HealthTransition {
        monitor
            .report_outcome(id, &Outcome::failure(Duration::from_millis(50)), 1.0)
            .unwrap()
    }

    fn succeed(monitor: &HealthMonitor, id: &CredentialId) -> HealthTransition {
        monitor
            .report_outcome(id, &Outcome::success(Duration::from_millis(50)), 1.0)
            .unwrap()
    }

    #[test]
    fn test_consecutive_failures_walk_down_the_states() {
        let (_, monitor, id) = monitor();
        let states: Vec<HealthState> = (0..5).map(|_| fail(&monitor, &id).to).collect();
        assert_eq!(
            states,
            vec![
                HealthState::Degraded,
                HealthState::Unhealthy,
                HealthState::Unhealthy,
                HealthState::Unhealthy,
                HealthState::Failed,
            ]
        );
        let m = monitor.metrics(&id).unwrap();
        assert_eq!(m.consecutive_failures, 5);
        assert_eq!(m.failed_requests, 5);
        assert_eq!(m.rolling_success_rate, 0.0);
    }

    #[test]
    fn test_rate_limit_enters_cooldown_with_floor_backoff() {
        let (clock, monitor, id) = monitor();
        let t = monitor
            .report_outcome(&id, &Outcome::rate_limited(Duration::ZERO), 1.0)
            .unwrap();
        assert_eq!(t.to, HealthState::Cooldown);
        let m = monitor.metrics(&id).unwrap();
        assert_eq!(m.cooldown_until, Some(clock.now() + chrono::Duration::seconds(30)));
        assert_eq!(m.cooldown_level, 1);
        assert!(monitor.is_in_cooldown(&id));

        // Reports during cooldown never leave it.
        assert_eq!(succeed(&monitor, &id).to, HealthState::Cooldown);
        assert!(monitor.expired_cooldowns(clock.now()).is_empty());
        clock.advance(Duration::from_secs(30));
        assert_eq!(monitor.expired_cooldowns(clock.now()), vec![id]);
    }

    #[test]
    fn test_unbounded_backoff_saturates_cooldown_deadline() {
        let clock = Arc::new(ManualClock::default());
        let monitor = HealthMonitor::new(
            HealthThresholds::default(),
            PriorityWeights::default(),
            BackoffPolicy {
                floor_secs: u64::MAX,
                cap_secs: u64::MAX,
            },
            clock.clone(),
        );
        let id = CredentialId::new();
        monitor.track(id);

        let t = monitor
            .report_outcome(&id, &Outcome::rate_limited(Duration::ZERO), 1.0)
            .unwrap();
        assert_eq!(t.to, HealthState::Cooldown);
        let m = monitor.metrics(&id).unwrap();
        assert_eq!(m.cooldown_until, Some(DateTime::<Utc>::MAX_UTC));
        assert!(monitor.is_in_cooldown(&id));

        let t = monitor.complete_probe(&id, false).unwrap();
        assert_eq!(t.to, HealthState::Cooldown);
    }

    #[test]
    fn test_probe_results() {
        let (clock, monitor, id) = monitor();
        fail(&monitor, &id);
        fail(&monitor, &id);
        monitor.enter_cooldown(&id).unwrap();
        assert_eq!(monitor.metrics(&id).unwrap().cooldown_level, 2);

        let t = monitor.complete_probe(&id, false).unwrap();
        assert_eq!(t.to, HealthState::Cooldown);
        let m = monitor.metrics(&id).unwrap();
        assert_eq!(m.cooldown_level, 3);
        assert_eq!(m.cooldown_until, Some(clock.now() + chrono::Duration::seconds(120)));

        let t = monitor.complete_probe(&id, true).unwrap();
        assert_eq!(t.to, HealthState::Healthy);
        let m = monitor.metrics(&id).unwrap();
        assert_eq!(m.consecutive_failures, 0);
        assert_eq!(m.cooldown_level, 0);
        assert!(m.cooldown_until.is_none());
        assert!(m.recent_outcomes.is_empty());
    }

    #[test]
    fn test_recovery_after_probation() {
        let (_, monitor, id) = monitor();
        fail(&monitor, &id);
        fail(&monitor, &id);
        assert_eq!(monitor.state(&id).unwrap(), HealthState::Unhealthy);

        let mut recovered_after = None;
        for n in 1..=40 {
            if succeed(&monitor, &id).to == HealthState::Healthy {
                recovered_after = Some(n);
                break;
            }
        }
        // The rate reaches 0.95 once the first failure leaves the window.
        assert_eq!(recovered_after, Some(19));
    }

    #[test]
    fn test_permanent_failure_blocks_traffic_recovery() {
        let (_, monitor, id) = monitor();
        monitor
            .report_outcome(&id, &Outcome::permanent(Duration::ZERO), 1.0)
            .unwrap();
        assert_eq!(monitor.state(&id).unwrap(), HealthState::Degraded);
        for _ in 0..30 {
            succeed(&monitor, &id);
        }
        assert_eq!(monitor.state(&id).unwrap(), HealthState::Degraded);

        monitor.reinstate(&id).unwrap();
        let m = monitor.metrics(&id).unwrap();
        assert_eq!(m.health_status, HealthState::Healthy);
        assert!(!m.permanent_failure);
    }

    #[test]
    fn test_attention_and_counts() {
        let (_, monitor, a) = monitor();
        let b = CredentialId::new();
        monitor.track(b);
        fail(&monitor, &a);

        let attention = monitor.keys_needing_attention();
        assert_eq!(attention.len(), 1);
        assert_eq!(attention[0].credential_id, a);

        let counts = monitor.state_counts();
        assert_eq!(counts.healthy, 1);
        assert_eq!(counts.degraded, 1);
        assert_eq!(counts.total(), 2);
    }

    #[test]
    fn test_restore_enforces_cooldown_invariant() {
        let (clock, monitor, id) = monitor();
        let mut m = PerformanceMetrics::new(id);
        m.health_status = HealthState::Cooldown;
        monitor.restore(m);
        assert_eq!(monitor.expired_cooldowns(clock.now()), vec![id]);

        let mut m = PerformanceMetrics::new(id);
        m.cooldown_until = Some(clock.now());
        monitor.restore(m);
        assert!(monitor.metrics(&id).unwrap().cooldown_until.is_none());
    }

    #[test]
    fn test_average_latency() {
        let (_, monitor, id) = monitor();
        monitor
            .report_outcome(&id, &Outcome::success(Duration::from_millis(100)), 1.0)
            .unwrap();
        monitor
            .report_outcome(&id, &Outcome::success(Duration::from_millis(300)), 1.0)
            .unwrap();
        assert!((monitor.metrics(&id).unwrap().average_response_time_ms - 200.0).abs() < 1e-9);
    }
}
