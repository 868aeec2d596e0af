//! Quota threshold bands and the alert buffer.

use crate::config::AlertThresholds;
use crate::CredentialId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;

/// Usage band of a credential's current window, ordered by severity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitStatus {
    /// Below the warning threshold.
    Safe,
    /// At or above the warning threshold.
    Warning,
    /// At or above the emergency threshold.
    Emergency,
    /// Limit reached.
    Exhausted,
}

impl LimitStatus {
    /// Every band, least severe first.
    pub const ALL: [LimitStatus; 4] = [
        LimitStatus::Safe,
        LimitStatus::Warning,
        LimitStatus::Emergency,
        LimitStatus::Exhausted,
    ];

    /// Classify committed usage against the thresholds.
    pub fn classify(used: u32, limit: u32, percentage: f64, thresholds: &AlertThresholds) -> Self {
        if used >= limit {
            Self::Exhausted
        } else if percentage >= thresholds.emergency_percent {
            Self::Emergency
        } else if percentage >= thresholds.warning_percent {
            Self::Warning
        } else {
            Self::Safe
        }
    }
}

impl std::fmt::Display for LimitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Safe => "safe",
            Self::Warning => "warning",
            Self::Emergency => "emergency",
            Self::Exhausted => "exhausted",
        };
        f.write_str(s)
    }
}

/// Raised when a commit moves a credential into a higher usage band.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuotaAlert {
    /// Credential concerned.
    pub credential_id: CredentialId,
    /// Band entered.
    pub status: LimitStatus,
    /// Committed usage at the time of the alert.
    pub current_usage: u32,
    /// Rate limit at the time of the alert.
    pub limit: u32,
    /// Committed usage as a percentage of the limit.
    pub percentage_used: f64,
    /// When the band was entered.
    pub raised_at: DateTime<Utc>,
}

impl QuotaAlert {
    pub(crate) fn new(
        credential_id: CredentialId,
        status: LimitStatus,
        current_usage: u32,
        limit: u32,
        raised_at: DateTime<Utc>,
    ) -> Self {
        let percentage_used = if limit == 0 {
            100.0
        } else {
            f64::from(current_usage) / f64::from(limit) * 100.0
        };
        Self {
            credential_id,
            status,
            current_usage,
            limit,
            percentage_used,
            raised_at,
        }
    }
}

/// Bounded alert buffer; the oldest alert is dropped when full.
pub(crate) struct AlertLog {
    alerts: Mutex<VecDeque<QuotaAlert>>,
    capacity: usize,
}

impl AlertLog {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            alerts: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    pub(crate) fn push(&self, alert: QuotaAlert) {
        let mut alerts = self.alerts.lock().unwrap_or_else(|e| e.into_inner());
        if alerts.len() >= self.capacity {
            alerts.pop_front();
        }
        alerts.push_back(alert);
    }

    /// Newest first.
    pub(crate) fn recent(&self, limit: usize) -> Vec<QuotaAlert> {
        let alerts = self.alerts.lock().unwrap_or_else(|e| e.into_inner());
        alerts.iter().rev().take(limit).cloned().collect()
    }

    pub(crate) fn retain_after(&self, cutoff: DateTime<Utc>) -> usize {
        let mut alerts = self.alerts.lock().unwrap_or_else(|e| e.into_inner());
        let before = alerts.len();
        alerts.retain(|a| a.raised_at >= cutoff);
        before - alerts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_bands() {
        let t = AlertThresholds::default();
        assert_eq!(LimitStatus::classify(10, 100, 10.0, &t), LimitStatus::Safe);
        assert_eq!(LimitStatus::classify(75, 100, 75.0, &t), LimitStatus::Warning);
        assert_eq!(LimitStatus::classify(95, 100, 95.0, &t), LimitStatus::Emergency);
        assert_eq!(LimitStatus::classify(100, 100, 100.0, &t), LimitStatus::Exhausted);
        assert!(LimitStatus::Exhausted > LimitStatus::Warning);
    }

    #[test]
    fn test_alert_log_is_bounded() {
        let log = AlertLog::new(2);
        let id = CredentialId::new();
        let t0 = Utc::now();
        for (i, status) in [LimitStatus::Warning, LimitStatus::Emergency, LimitStatus::Exhausted]
            .into_iter()
            .enumerate()
        {
            log.push(QuotaAlert::new(
                id,
                status,
                90,
                100,
                t0 + chrono::Duration::seconds(i as i64),
            ));
        }
        let recent = log.recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].status, LimitStatus::Exhausted);

        assert_eq!(log.retain_after(t0 + chrono::Duration::seconds(2)), 1);
        assert_eq!(log.recent(10).len(), 1);
    }
}
