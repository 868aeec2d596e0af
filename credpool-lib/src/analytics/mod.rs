//! Fleet-wide rotation analytics.
//!
//! Counters are atomics; individual outcomes go to a bounded event log. The
//! aggregator only reads pool state handed to it and never mutates it.
//!
//! # Example
//!
//! ```rust
//! use credpool_lib::analytics::AnalyticsAggregator;
//! use credpool_lib::health::HealthCounts;
//! use chrono::Utc;
//! use std::time::Duration;
//!
//! let analytics = AnalyticsAggregator::new(100, Utc::now());
//! analytics.record_selection(Duration::from_micros(250), true);
//! analytics.record_selection(Duration::from_micros(150), false);
//!
//! let snapshot = analytics.snapshot(HealthCounts::default(), Utc::now());
//! assert_eq!(snapshot.total_rotations, 1);
//! assert_eq!(snapshot.admission_denials, 1);
//! ```

mod report;
mod usage_report;

pub use report::render_report;
pub use usage_report::render_usage_report;

use crate::health::HealthCounts;
use crate::{CredentialId, Service};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// What happened to one request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationOutcome {
    /// The external call succeeded.
    Success,
    /// The external call failed.
    Failure,
    /// No credential could be handed out.
    AdmissionDenied,
}

/// Immutable log record of one request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RotationEvent {
    /// Credential used; absent for admission denials.
    pub credential_id: Option<CredentialId>,
    /// Requested service.
    pub service: Service,
    /// When the event happened.
    pub timestamp: DateTime<Utc>,
    /// Result.
    pub outcome: RotationOutcome,
    /// Latency of the external call, zero for denials.
    pub latency: Duration,
}

/// Point-in-time view of the fleet. Never persisted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FleetSnapshot {
    /// Credentials per health state.
    pub health: HealthCounts,
    /// Selections that handed out a credential.
    pub total_rotations: u64,
    /// Reported successful outcomes.
    pub successful_requests: u64,
    /// Reported failed outcomes.
    pub failed_requests: u64,
    /// Selections that found no admissible credential.
    pub admission_denials: u64,
    /// Mean time spent in selection, in milliseconds.
    pub average_rotation_time_ms: f64,
    /// Rotations per hour since the aggregator started.
    pub rotation_frequency_per_hour: f64,
    /// Outcomes reported in the last hour.
    pub requests_last_hour: u64,
    /// Success rate of the outcomes reported in the last hour.
    pub success_rate_last_hour: Option<f64>,
    /// When the snapshot was taken.
    pub taken_at: DateTime<Utc>,
}

/// Collects rotation counters and events.
#[derive(Debug)]
pub struct AnalyticsAggregator {
    total_rotations: AtomicU64,
    admission_denials: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    selection_micros: AtomicU64,
    selections: AtomicU64,
    events: Mutex<VecDeque<RotationEvent>>,
    capacity: usize,
    started_at: DateTime<Utc>,
}

impl AnalyticsAggregator {
    /// Create an aggregator keeping at most `capacity` events.
    pub fn new(capacity: usize, started_at: DateTime<Utc>) -> Self {
        Self {
            total_rotations: AtomicU64::new(0),
            admission_denials: AtomicU64::new(0),
            successful_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            selection_micros: AtomicU64::new(0),
            selections: AtomicU64::new(0),
            events: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            started_at,
        }
    }

    /// Record one selection and how long it took.
    pub fn record_selection(&self, duration: Duration, admitted: bool) {
        self.selections.fetch_add(1, Ordering::Relaxed);
        self.selection_micros.fetch_add(
            u64::try_from(duration.as_micros()).unwrap_or(u64::MAX),
            Ordering::Relaxed,
        );
        if admitted {
            self.total_rotations.fetch_add(1, Ordering::Relaxed);
        } else {
            self.admission_denials.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Append an event, dropping the oldest when full.
    pub fn record_event(&self, event: RotationEvent) {
        match event.outcome {
            RotationOutcome::Success => {
                self.successful_requests.fetch_add(1, Ordering::Relaxed);
            }
            RotationOutcome::Failure => {
                self.failed_requests.fetch_add(1, Ordering::Relaxed);
            }
            RotationOutcome::AdmissionDenied => {}
        }
        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        if events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// Most recent events, newest first.
    pub fn recent_events(&self, limit: usize) -> Vec<RotationEvent> {
        let events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        events.iter().rev().take(limit).cloned().collect()
    }

    /// Snapshot of the counters at `now`.
    pub fn snapshot(&self, health: HealthCounts, now: DateTime<Utc>) -> FleetSnapshot {
        let total_rotations = self.total_rotations.load(Ordering::Relaxed);
        let selections = self.selections.load(Ordering::Relaxed);
        let micros = self.selection_micros.load(Ordering::Relaxed);

        let hour_ago = now - chrono::Duration::hours(1);
        let (requests_last_hour, successes_last_hour) = {
            let events = self.events.lock().unwrap_or_else(|e| e.into_inner());
            events
                .iter()
                .rev()
                .take_while(|e| e.timestamp > hour_ago)
                .filter(|e| e.outcome != RotationOutcome::AdmissionDenied)
                .fold((0u64, 0u64), |(n, ok), e| {
                    (n + 1, ok + u64::from(e.outcome == RotationOutcome::Success))
                })
        };

        // A young aggregator counts as running for one hour.
        let hours = ((now - self.started_at).num_seconds() as f64 / 3600.0).max(1.0);

        FleetSnapshot {
            health,
            total_rotations,
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            admission_denials: self.admission_denials.load(Ordering::Relaxed),
            average_rotation_time_ms: if selections == 0 {
                0.0
            } else {
                micros as f64 / selections as f64 / 1000.0
            },
            rotation_frequency_per_hour: total_rotations as f64 / hours,
            requests_last_hour,
            success_rate_last_hour: (requests_last_hour > 0)
                .then(|| successes_last_hour as f64 / requests_last_hour as f64),
            taken_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    fn event(at: DateTime<Utc>, outcome: RotationOutcome) -> RotationEvent {
        RotationEvent {
            credential_id: Some(CredentialId::new()),
            service: Service::Tavily,
            timestamp: at,
            outcome,
            latency: Duration::from_millis(100),
        }
    }

    #[test]
    fn test_selection_counters() {
        let analytics = AnalyticsAggregator::new(10, start());
        analytics.record_selection(Duration::from_micros(1000), true);
        analytics.record_selection(Duration::from_micros(3000), true);
        analytics.record_selection(Duration::from_micros(2000), false);

        let snapshot = analytics.snapshot(HealthCounts::default(), start());
        assert_eq!(snapshot.total_rotations, 2);
        assert_eq!(snapshot.admission_denials, 1);
        assert!((snapshot.average_rotation_time_ms - 2.0).abs() < 1e-9);
        assert_eq!(snapshot.rotation_frequency_per_hour, 2.0);
    }

    #[test]
    fn test_last_hour_window() {
        let analytics = AnalyticsAggregator::new(10, start());
        analytics.record_event(event(start(), RotationOutcome::Success));
        let later = start() + chrono::Duration::minutes(90);
        analytics.record_event(event(later, RotationOutcome::Success));
        analytics.record_event(event(later, RotationOutcome::Failure));
        analytics.record_event(event(later, RotationOutcome::AdmissionDenied));

        let snapshot = analytics.snapshot(HealthCounts::default(), later);
        assert_eq!(snapshot.requests_last_hour, 2);
        assert_eq!(snapshot.success_rate_last_hour, Some(0.5));
        assert_eq!(snapshot.successful_requests, 2);
        assert_eq!(snapshot.failed_requests, 1);
    }

    #[test]
    fn test_event_log_is_bounded() {
        let analytics = AnalyticsAggregator::new(3, start());
        for i in 0..5 {
            analytics.record_event(event(
                start() + chrono::Duration::seconds(i),
                RotationOutcome::Success,
            ));
        }
        let events = analytics.recent_events(10);
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].timestamp, start() + chrono::Duration::seconds(4));
    }

    #[test]
    fn test_empty_snapshot() {
        let analytics = AnalyticsAggregator::new(3, start());
        let snapshot = analytics.snapshot(HealthCounts::default(), start());
        assert_eq!(snapshot.average_rotation_time_ms, 0.0);
        assert_eq!(snapshot.success_rate_last_hour, None);
    }
}
