//! Quota window accounting.
//!
//! Each credential has a fixed accounting window on a grid anchored at its
//! registration time. Callers take a provisional [`Reservation`] before an
//! external call and later commit it (the attempt consumed quota) or roll it
//! back (nothing was dispatched).
//!
//! The invariant `current_usage + provisional_reservations <= rate_limit`
//! holds at every instant: the check and the increment happen under the
//! credential's own mutex.
//!
//! # Thread Safety
//!
//! Windows live behind a per-credential `Mutex` inside an `RwLock`ed map, so
//! callers racing on different credentials never contend.

mod alerts;
mod forecast;

pub use alerts::{LimitStatus, QuotaAlert};
pub use forecast::{UsageAnalytics, UsageForecast};

use crate::clock::SharedClock;
use crate::config::AlertThresholds;
use crate::store::{Credential, ResetPeriod};
use crate::{CredentialId, CredpoolError, Result};
use alerts::AlertLog;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use uuid::Uuid;

/// Provisional claim on one unit of a credential's quota.
///
/// Must be resolved through [`UsageWindowTracker::commit`] or
/// [`UsageWindowTracker::rollback`]; unresolved reservations expire after
/// the configured timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    id: Uuid,
    credential_id: CredentialId,
    reserved_at: DateTime<Utc>,
}

impl Reservation {
    /// Unique token id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Credential the quota was reserved on.
    pub fn credential_id(&self) -> CredentialId {
        self.credential_id
    }

    /// Time the reservation was taken.
    pub fn reserved_at(&self) -> DateTime<Utc> {
        self.reserved_at
    }
}

/// Persistable view of a credential's current window.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageWindow {
    /// Inclusive start of the window.
    pub window_start: DateTime<Utc>,
    /// Exclusive end of the window.
    pub window_end: DateTime<Utc>,
    /// Committed attempts in this window.
    pub current_usage: u32,
    /// In-flight reservations.
    pub provisional_reservations: u32,
}

/// Usage report for dashboards.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UsageStatus {
    /// Credential.
    pub credential_id: CredentialId,
    /// Committed attempts in this window.
    pub current_usage: u32,
    /// In-flight reservations.
    pub provisional_reservations: u32,
    /// Maximum attempts per window.
    pub rate_limit: u32,
    /// Inclusive start of the window.
    pub window_start: DateTime<Utc>,
    /// Exclusive end of the window.
    pub window_end: DateTime<Utc>,
    /// Committed usage as a percentage of the limit.
    pub percentage_used: f64,
    /// Reservations that can still be taken.
    pub requests_remaining: u32,
    /// When usage resets to zero.
    pub reset_time: DateTime<Utc>,
    /// Seconds until the reset.
    pub time_until_reset_secs: i64,
    /// Threshold band of the committed usage.
    pub limit_status: LimitStatus,
}

struct WindowState {
    anchor: DateTime<Utc>,
    period: ResetPeriod,
    period_index: u32,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    rate_limit: u32,
    current_usage: u32,
    pending: HashMap<Uuid, DateTime<Utc>>,
    alerted: LimitStatus,
}

impl WindowState {
    fn new(credential: &Credential, now: DateTime<Utc>) -> Self {
        let mut state = Self {
            anchor: credential.created_at,
            period: credential.reset_period,
            period_index: 0,
            window_start: credential.created_at,
            window_end: credential.reset_period.advance(credential.created_at),
            rate_limit: credential.rate_limit,
            current_usage: 0,
            pending: HashMap::new(),
            alerted: LimitStatus::Safe,
        };
        state.roll(now);
        state
    }

    fn provisional(&self) -> u32 {
        self.pending.len() as u32
    }

    /// Reset usage if the window has ended. Returns whether a reset happened.
    ///
    /// Boundaries move along the anchored grid; however many periods were
    /// skipped, usage is zeroed once.
    fn roll(&mut self, now: DateTime<Utc>) -> bool {
        if now < self.window_end {
            return false;
        }
        let mut index = self.estimate_index(now).max(self.period_index);
        while self.period.boundary(self.anchor, index + 1) <= now {
            index += 1;
        }
        while index > 0 && self.period.boundary(self.anchor, index) > now {
            index -= 1;
        }
        self.period_index = index;
        self.window_start = self.period.boundary(self.anchor, index);
        self.window_end = self.period.boundary(self.anchor, index + 1);
        self.current_usage = 0;
        self.alerted = LimitStatus::Safe;
        true
    }

    fn estimate_index(&self, now: DateTime<Utc>) -> u32 {
        let elapsed = (now - self.anchor).num_seconds().max(0);
        let approx_len = match self.period {
            ResetPeriod::Hourly => 3600,
            ResetPeriod::Daily => 86_400,
            ResetPeriod::Weekly => 7 * 86_400,
            // Shortest month; the correction loops in `roll` settle the rest.
            ResetPeriod::Monthly => 28 * 86_400,
            ResetPeriod::Custom { secs } => secs.max(1) as i64,
        };
        // One below the estimate keeps the forward correction loop short.
        (elapsed / approx_len).saturating_sub(1).min(u32::MAX as i64) as u32
    }

    fn purge_expired(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.pending.len();
        self.pending.retain(|_, reserved_at| *reserved_at > cutoff);
        before - self.pending.len()
    }

    fn view(&self) -> UsageWindow {
        UsageWindow {
            window_start: self.window_start,
            window_end: self.window_end,
            current_usage: self.current_usage,
            provisional_reservations: self.provisional(),
        }
    }

    fn percentage_used(&self) -> f64 {
        if self.rate_limit == 0 {
            100.0
        } else {
            f64::from(self.current_usage) / f64::from(self.rate_limit) * 100.0
        }
    }
}

/// Tracks per-credential quota windows and reservations.
pub struct UsageWindowTracker {
    windows: RwLock<HashMap<CredentialId, Arc<Mutex<WindowState>>>>,
    reservation_timeout: chrono::Duration,
    thresholds: AlertThresholds,
    alerts: AlertLog,
    clock: SharedClock,
}

impl UsageWindowTracker {
    /// Create a tracker.
    pub fn new(
        reservation_timeout: std::time::Duration,
        thresholds: AlertThresholds,
        clock: SharedClock,
    ) -> Self {
        let reservation_timeout =
            chrono::Duration::from_std(reservation_timeout).unwrap_or(chrono::Duration::MAX);
        Self {
            windows: RwLock::new(HashMap::new()),
            reservation_timeout,
            alerts: AlertLog::new(thresholds.max_alerts),
            thresholds,
            clock,
        }
    }

    fn entry(&self, id: &CredentialId) -> Result<Arc<Mutex<WindowState>>> {
        let windows = self.windows.read().unwrap_or_else(|e| e.into_inner());
        windows.get(id).cloned().ok_or(CredpoolError::NotFound(*id))
    }

    /// Lock a window, apply resets and expire stale reservations.
    fn with_window<T>(
        &self,
        id: &CredentialId,
        f: impl FnOnce(&mut WindowState, DateTime<Utc>) -> T,
    ) -> Result<T> {
        let entry = self.entry(id)?;
        let now = self.clock.now();
        let mut state = entry.lock().unwrap_or_else(|e| e.into_inner());
        self.maintain(id, &mut state, now);
        Ok(f(&mut state, now))
    }

    /// Reservations made before this instant have expired.
    fn reservation_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.reservation_timeout)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    fn maintain(&self, id: &CredentialId, state: &mut WindowState, now: DateTime<Utc>) {
        if state.roll(now) {
            tracing::debug!(
                credential = %id,
                window_start = %state.window_start,
                window_end = %state.window_end,
                "usage window reset"
            );
        }
        let expired = state.purge_expired(self.reservation_cutoff(now));
        if expired > 0 {
            tracing::warn!(credential = %id, expired, "released unresolved reservations");
        }
    }

    /// Start tracking a credential, optionally resuming a persisted window.
    ///
    /// Re-tracking an already tracked credential only syncs its limits.
    pub fn track(&self, credential: &Credential, persisted: Option<UsageWindow>) {
        let now = self.clock.now();
        let mut windows = self.windows.write().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = windows.get(&credential.id) {
            let mut state = existing.lock().unwrap_or_else(|e| e.into_inner());
            state.rate_limit = credential.rate_limit;
            state.period = credential.reset_period;
            return;
        }

        let mut state = WindowState::new(credential, now);
        if let Some(window) = persisted {
            // Only resume usage that belongs to the window we are in now.
            if window.window_start == state.window_start && window.window_end == state.window_end
            {
                state.current_usage = window.current_usage.min(credential.rate_limit);
            }
        }
        windows.insert(credential.id, Arc::new(Mutex::new(state)));
    }

    /// Stop tracking a credential.
    pub fn untrack(&self, id: &CredentialId) {
        let mut windows = self.windows.write().unwrap_or_else(|e| e.into_inner());
        windows.remove(id);
    }

    /// Apply changed limits of a credential.
    ///
    /// A changed period re-anchors the grid at the current window start.
    /// A lowered limit blocks new reservations until the next reset.
    pub fn sync_limits(&self, credential: &Credential) -> Result<()> {
        self.with_window(&credential.id, |state, now| {
            state.rate_limit = credential.rate_limit;
            if state.period != credential.reset_period {
                state.period = credential.reset_period;
                state.anchor = state.window_start;
                state.period_index = 0;
                state.window_end = state.period.advance(state.window_start);
                state.roll(now);
            }
        })
    }

    /// Try to take one unit of quota.
    ///
    /// # Errors
    ///
    /// `QuotaExceeded` when committed plus in-flight usage already reaches the
    /// limit, `NotFound` for an untracked credential.
    pub fn try_reserve(&self, id: &CredentialId) -> Result<Reservation> {
        self.with_window(id, |state, now| {
            let used = state.current_usage.saturating_add(state.provisional());
            if used >= state.rate_limit {
                return Err(CredpoolError::QuotaExceeded {
                    used,
                    limit: state.rate_limit,
                });
            }
            let reservation = Reservation {
                id: Uuid::new_v4(),
                credential_id: *id,
                reserved_at: now,
            };
            state.pending.insert(reservation.id, now);
            Ok(reservation)
        })?
    }

    /// Consume the reserved unit. Returns false when the reservation was
    /// already resolved or expired.
    pub fn commit(&self, reservation: &Reservation) -> bool {
        let id = reservation.credential_id;
        let applied = self.with_window(&id, |state, now| {
            if state.pending.remove(&reservation.id).is_none() {
                return None;
            }
            state.current_usage = state.current_usage.saturating_add(1);
            let status = LimitStatus::classify(
                state.current_usage,
                state.rate_limit,
                state.percentage_used(),
                &self.thresholds,
            );
            if status > state.alerted && status != LimitStatus::Safe {
                state.alerted = status;
                return Some(Some(QuotaAlert::new(
                    id,
                    status,
                    state.current_usage,
                    state.rate_limit,
                    now,
                )));
            }
            Some(None)
        });

        match applied {
            Ok(Some(alert)) => {
                if let Some(alert) = alert {
                    tracing::info!(
                        credential = %id,
                        status = ?alert.status,
                        usage = alert.current_usage,
                        limit = alert.limit,
                        "quota threshold crossed"
                    );
                    self.alerts.push(alert);
                }
                true
            }
            Ok(None) => {
                tracing::debug!(
                    credential = %id,
                    reservation = %reservation.id,
                    "commit of unknown or expired reservation ignored"
                );
                false
            }
            Err(_) => {
                tracing::warn!(credential = %id, "commit for untracked credential ignored");
                false
            }
        }
    }

    /// Release the reserved unit without consuming quota. Returns false when
    /// the reservation was already resolved or expired.
    pub fn rollback(&self, reservation: &Reservation) -> bool {
        let released = self
            .with_window(&reservation.credential_id, |state, _| {
                state.pending.remove(&reservation.id).is_some()
            })
            .unwrap_or(false);
        if !released {
            tracing::warn!(
                credential = %reservation.credential_id,
                reservation = %reservation.id,
                "rollback of unknown or expired reservation ignored"
            );
        }
        released
    }

    /// Current window of a credential.
    pub fn window(&self, id: &CredentialId) -> Result<UsageWindow> {
        self.with_window(id, |state, _| state.view())
    }

    /// Usage report of a credential.
    pub fn status(&self, id: &CredentialId) -> Result<UsageStatus> {
        self.with_window(id, |state, now| {
            let provisional = state.provisional();
            UsageStatus {
                credential_id: *id,
                current_usage: state.current_usage,
                provisional_reservations: provisional,
                rate_limit: state.rate_limit,
                window_start: state.window_start,
                window_end: state.window_end,
                percentage_used: state.percentage_used(),
                requests_remaining: state
                    .rate_limit
                    .saturating_sub(state.current_usage.saturating_add(provisional)),
                reset_time: state.window_end,
                time_until_reset_secs: (state.window_end - now).num_seconds().max(0),
                limit_status: LimitStatus::classify(
                    state.current_usage,
                    state.rate_limit,
                    state.percentage_used(),
                    &self.thresholds,
                ),
            }
        })
    }

    /// Project a credential's usage from its current window.
    pub fn forecast(&self, id: &CredentialId) -> Result<UsageForecast> {
        let status = self.status(id)?;
        Ok(UsageForecast::from_status(&status, self.clock.now()))
    }

    /// Fraction of the window's quota still free, in `[0, 1]`.
    pub fn remaining_fraction(&self, id: &CredentialId) -> f64 {
        self.with_window(id, |state, _| {
            if state.rate_limit == 0 {
                return 0.0;
            }
            let used = state.current_usage.saturating_add(state.provisional());
            f64::from(state.rate_limit.saturating_sub(used)) / f64::from(state.rate_limit)
        })
        .unwrap_or(0.0)
    }

    /// In-flight reservations on a credential.
    pub fn outstanding(&self, id: &CredentialId) -> u32 {
        self.with_window(id, |state, _| state.provisional())
            .unwrap_or(0)
    }

    /// Release every reservation older than the timeout. Returns the count.
    pub fn expire_stale_reservations(&self) -> usize {
        let ids: Vec<CredentialId> = {
            let windows = self.windows.read().unwrap_or_else(|e| e.into_inner());
            windows.keys().copied().collect()
        };
        let cutoff = self.reservation_cutoff(self.clock.now());
        ids.iter()
            .filter_map(|id| {
                self.entry(id).ok().map(|entry| {
                    let mut state = entry.lock().unwrap_or_else(|e| e.into_inner());
                    state.purge_expired(cutoff)
                })
            })
            .sum()
    }

    /// Snapshot of every tracked window, for persistence.
    pub fn all_windows(&self) -> HashMap<CredentialId, UsageWindow> {
        let ids: Vec<CredentialId> = {
            let windows = self.windows.read().unwrap_or_else(|e| e.into_inner());
            windows.keys().copied().collect()
        };
        ids.into_iter()
            .filter_map(|id| self.window(&id).ok().map(|w| (id, w)))
            .collect()
    }

    /// Most recent quota alerts, newest first.
    pub fn recent_alerts(&self, limit: usize) -> Vec<QuotaAlert> {
        self.alerts.recent(limit)
    }

    /// Drop alerts older than `age`. Returns the number removed.
    pub fn clear_alerts_older_than(&self, age: std::time::Duration) -> usize {
        let age = chrono::Duration::from_std(age).unwrap_or(chrono::Duration::MAX);
        let cutoff = self
            .clock
            .now()
            .checked_sub_signed(age)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.alerts.retain_after(cutoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CredentialConfig, CredentialStore};
    use crate::test_utils::ManualClock;
    use crate::Service;
    use std::time::Duration;

    fn setup(limit: u32, period: ResetPeriod) -> (Arc<ManualClock>, UsageWindowTracker, Credential) {
        let clock = Arc::new(ManualClock::default());
        let store = CredentialStore::new(clock.clone());
        let credential = store
            .register(
                CredentialConfig::new(Service::Tavily, "a", "secret")
                    .with_rate_limit(limit)
                    .with_reset_period(period),
            )
            .unwrap();
        let tracker = UsageWindowTracker::new(
            Duration::from_secs(60),
            AlertThresholds::default(),
            clock.clone(),
        );
        tracker.track(&credential, None);
        (clock, tracker, credential)
    }

    #[test]
    fn test_reserve_until_limit() {
        let (_, tracker, cred) = setup(3, ResetPeriod::Hourly);
        let r1 = tracker.try_reserve(&cred.id).unwrap();
        let _r2 = tracker.try_reserve(&cred.id).unwrap();
        let _r3 = tracker.try_reserve(&cred.id).unwrap();
        assert!(matches!(
            tracker.try_reserve(&cred.id),
            Err(CredpoolError::QuotaExceeded { used: 3, limit: 3 })
        ));

        // Rollback frees the slot, commit would not.
        assert!(tracker.rollback(&r1));
        assert!(tracker.try_reserve(&cred.id).is_ok());
    }

    #[test]
    fn test_commit_consumes_quota_once() {
        let (_, tracker, cred) = setup(2, ResetPeriod::Hourly);
        let r = tracker.try_reserve(&cred.id).unwrap();
        assert!(tracker.commit(&r));
        assert!(!tracker.commit(&r));
        assert!(!tracker.rollback(&r));

        let window = tracker.window(&cred.id).unwrap();
        assert_eq!(window.current_usage, 1);
        assert_eq!(window.provisional_reservations, 0);
    }

    #[test]
    fn test_window_resets_once_per_period() {
        let (clock, tracker, cred) = setup(2, ResetPeriod::Hourly);
        let start = tracker.window(&cred.id).unwrap().window_start;

        for _ in 0..2 {
            let r = tracker.try_reserve(&cred.id).unwrap();
            tracker.commit(&r);
        }
        assert!(tracker.try_reserve(&cred.id).is_err());

        clock.advance(Duration::from_secs(3600));
        let r = tracker.try_reserve(&cred.id).unwrap();
        tracker.commit(&r);
        // Many calls inside the new window never reset again.
        let _ = tracker.try_reserve(&cred.id);
        let window = tracker.window(&cred.id).unwrap();
        assert_eq!(window.window_start, start + chrono::Duration::hours(1));
        assert_eq!(window.window_end, start + chrono::Duration::hours(2));
        assert_eq!(window.current_usage, 1);
    }

    #[test]
    fn test_window_stays_on_grid_after_long_idle() {
        let (clock, tracker, cred) = setup(5, ResetPeriod::Hourly);
        let start = tracker.window(&cred.id).unwrap().window_start;
        clock.advance(Duration::from_secs(5 * 3600 + 1234));
        let window = tracker.window(&cred.id).unwrap();
        assert_eq!(window.window_start, start + chrono::Duration::hours(5));
        assert_eq!(window.window_end, start + chrono::Duration::hours(6));
    }

    #[test]
    fn test_unresolved_reservations_expire() {
        let (clock, tracker, cred) = setup(1, ResetPeriod::Daily);
        let stale = tracker.try_reserve(&cred.id).unwrap();
        assert!(tracker.try_reserve(&cred.id).is_err());

        clock.advance(Duration::from_secs(61));
        assert_eq!(tracker.expire_stale_reservations(), 1);
        assert_eq!(tracker.outstanding(&cred.id), 0);
        assert!(!tracker.commit(&stale));
        assert!(tracker.try_reserve(&cred.id).is_ok());
    }

    #[test]
    fn test_unbounded_timeout_never_expires_reservations() {
        let clock = Arc::new(ManualClock::default());
        let store = CredentialStore::new(clock.clone());
        let cred = store
            .register(CredentialConfig::new(Service::Exa, "a", "secret").with_rate_limit(3))
            .unwrap();
        let tracker = UsageWindowTracker::new(
            Duration::from_secs(u64::MAX),
            AlertThresholds::default(),
            clock.clone(),
        );
        tracker.track(&cred, None);

        let r = tracker.try_reserve(&cred.id).unwrap();
        clock.advance(Duration::from_secs(7 * 86_400));
        assert_eq!(tracker.expire_stale_reservations(), 0);
        assert_eq!(tracker.outstanding(&cred.id), 1);
        assert!(tracker.commit(&r));
    }

    #[test]
    fn test_forecast_follows_window_usage() {
        let (clock, tracker, cred) = setup(100, ResetPeriod::Daily);
        clock.advance(Duration::from_secs(2 * 3600));
        for _ in 0..20 {
            let r = tracker.try_reserve(&cred.id).unwrap();
            tracker.commit(&r);
        }
        let forecast = tracker.forecast(&cred.id).unwrap();
        assert_eq!(forecast.credential_id, cred.id);
        assert_eq!(forecast.current_usage, 20);
        assert!(forecast.usage_rate_per_hour > 0.0);
        assert!(forecast.predicted_usage_24h > 20);
        assert!(tracker.forecast(&CredentialId::new()).is_err());
    }

    #[test]
    fn test_status_and_alerts() {
        let (_, tracker, cred) = setup(4, ResetPeriod::Daily);
        for _ in 0..3 {
            let r = tracker.try_reserve(&cred.id).unwrap();
            tracker.commit(&r);
        }
        let status = tracker.status(&cred.id).unwrap();
        assert_eq!(status.current_usage, 3);
        assert_eq!(status.requests_remaining, 1);
        assert_eq!(status.percentage_used, 75.0);
        assert_eq!(status.limit_status, LimitStatus::Warning);

        let r = tracker.try_reserve(&cred.id).unwrap();
        tracker.commit(&r);
        let alerts = tracker.recent_alerts(10);
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].status, LimitStatus::Exhausted);
        assert_eq!(alerts[1].status, LimitStatus::Warning);
        assert_eq!(tracker.remaining_fraction(&cred.id), 0.0);
    }

    #[test]
    fn test_persisted_usage_resumes_in_same_window() {
        let (_, tracker, cred) = setup(10, ResetPeriod::Daily);
        let mut window = tracker.window(&cred.id).unwrap();
        window.current_usage = 7;

        let fresh = UsageWindowTracker::new(
            Duration::from_secs(60),
            AlertThresholds::default(),
            Arc::new(ManualClock::default()),
        );
        fresh.track(&cred, Some(window));
        assert_eq!(fresh.window(&cred.id).unwrap().current_usage, 7);
    }

    #[test]
    fn test_lowered_limit_blocks_until_reset() {
        let (clock, tracker, mut cred) = setup(5, ResetPeriod::Hourly);
        for _ in 0..3 {
            let r = tracker.try_reserve(&cred.id).unwrap();
            tracker.commit(&r);
        }
        cred.rate_limit = 2;
        tracker.sync_limits(&cred).unwrap();
        assert!(tracker.try_reserve(&cred.id).is_err());
        assert_eq!(tracker.status(&cred.id).unwrap().requests_remaining, 0);

        clock.advance(Duration::from_secs(3600));
        assert!(tracker.try_reserve(&cred.id).is_ok());
    }

    #[test]
    fn test_unknown_credential() {
        let (_, tracker, _) = setup(1, ResetPeriod::Hourly);
        let id = CredentialId::new();
        assert!(matches!(
            tracker.try_reserve(&id),
            Err(CredpoolError::NotFound(_))
        ));
        assert_eq!(tracker.remaining_fraction(&id), 0.0);
    }
}
