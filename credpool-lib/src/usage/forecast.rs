//! Usage projection from the current window's consumption rate.

use super::UsageStatus;
use crate::{CredentialId, Service};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Shortest observation before a rate is extrapolated.
const MIN_OBSERVATION_SECS: i64 = 60;

/// Forecasts never claim more confidence than this.
const MAX_CONFIDENCE: f64 = 0.9;

/// Usage percentage above which more keys are recommended.
const ADD_KEYS_PERCENT: f64 = 80.0;

/// Projected consumption of a credential.
///
/// Projections extrapolate the committed usage rate of the current window
/// and ignore resets, so `predicted_usage_7d` is demand, not window usage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UsageForecast {
    /// Credential.
    pub credential_id: CredentialId,
    /// Committed attempts in this window.
    pub current_usage: u32,
    /// Maximum attempts per window.
    pub rate_limit: u32,
    /// Committed attempts per hour since the window started.
    pub usage_rate_per_hour: f64,
    /// Expected cumulative usage 24 hours from now.
    pub predicted_usage_24h: u32,
    /// Expected cumulative usage 7 days from now.
    pub predicted_usage_7d: u32,
    /// When the quota runs out, if that happens before the window resets.
    pub predicted_exhaustion_time: Option<DateTime<Utc>>,
    /// Share of the window observed, capped at 0.9.
    pub confidence_level: f64,
    /// Operator hints.
    pub recommendations: Vec<String>,
}

impl UsageForecast {
    /// Project usage from a status taken at `now`.
    pub fn from_status(status: &UsageStatus, now: DateTime<Utc>) -> Self {
        let observed = (now - status.window_start).num_seconds();
        let window = (status.window_end - status.window_start).num_seconds().max(1);
        let current = status.current_usage;
        let mut recommendations = Vec::new();

        let (rate_per_hour, confidence) = if observed < MIN_OBSERVATION_SECS {
            recommendations.push("Not enough usage in this window for a forecast".to_string());
            (0.0, 0.0)
        } else {
            let rate = f64::from(current) / (observed as f64 / 3600.0);
            let confidence = (observed as f64 / window as f64).min(MAX_CONFIDENCE);
            (rate, confidence)
        };

        let project = |hours: f64| -> u32 {
            let projected = f64::from(current) + rate_per_hour * hours;
            projected.round().min(f64::from(u32::MAX)) as u32
        };

        let predicted_exhaustion_time = if status.requests_remaining == 0 {
            Some(now)
        } else if rate_per_hour > 0.0 {
            let secs = f64::from(status.requests_remaining) / rate_per_hour * 3600.0;
            chrono::Duration::try_seconds(secs.ceil() as i64)
                .and_then(|d| now.checked_add_signed(d))
                .filter(|at| *at < status.window_end)
        } else {
            None
        };

        if status.percentage_used > ADD_KEYS_PERCENT {
            recommendations.push("Consider adding additional API keys for this service".to_string());
        }
        if let Some(at) = predicted_exhaustion_time {
            recommendations.push(format!(
                "Quota predicted to run out at {} before the window resets at {}",
                at.format("%Y-%m-%d %H:%M UTC"),
                status.window_end.format("%Y-%m-%d %H:%M UTC")
            ));
        }

        Self {
            credential_id: status.credential_id,
            current_usage: current,
            rate_limit: status.rate_limit,
            usage_rate_per_hour: rate_per_hour,
            predicted_usage_24h: project(24.0),
            predicted_usage_7d: project(24.0 * 7.0),
            predicted_exhaustion_time,
            confidence_level: confidence,
            recommendations,
        }
    }
}

/// Usage and forecast of one credential, for usage reports.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UsageAnalytics {
    /// Service the credential belongs to.
    pub service: Service,
    /// Display name.
    pub name: String,
    /// Current window.
    pub status: UsageStatus,
    /// Projection from the current window.
    pub forecast: UsageForecast,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usage::LimitStatus;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap()
    }

    fn status(used: u32, limit: u32, window_hours: i64) -> UsageStatus {
        let window_end = start() + chrono::Duration::hours(window_hours);
        UsageStatus {
            credential_id: CredentialId::new(),
            current_usage: used,
            provisional_reservations: 0,
            rate_limit: limit,
            window_start: start(),
            window_end,
            percentage_used: f64::from(used) / f64::from(limit) * 100.0,
            requests_remaining: limit.saturating_sub(used),
            reset_time: window_end,
            time_until_reset_secs: 0,
            limit_status: LimitStatus::Safe,
        }
    }

    #[test]
    fn test_too_early_to_forecast() {
        let f = UsageForecast::from_status(&status(3, 100, 24), start() + chrono::Duration::seconds(30));
        assert_eq!(f.usage_rate_per_hour, 0.0);
        assert_eq!(f.predicted_usage_24h, 3);
        assert_eq!(f.predicted_usage_7d, 3);
        assert_eq!(f.confidence_level, 0.0);
        assert!(f.predicted_exhaustion_time.is_none());
        assert_eq!(f.recommendations.len(), 1);
    }

    #[test]
    fn test_steady_rate_projection() {
        // 10 per hour over the first 6 hours of a monthly-sized window.
        let now = start() + chrono::Duration::hours(6);
        let f = UsageForecast::from_status(&status(60, 10_000, 720), now);
        assert_eq!(f.usage_rate_per_hour, 10.0);
        assert_eq!(f.predicted_usage_24h, 300);
        assert_eq!(f.predicted_usage_7d, 60 + 1680);
        assert!(f.predicted_exhaustion_time.is_none(), "window resets first");
        assert!((f.confidence_level - 6.0 / 720.0).abs() < 1e-9);
        assert!(f.recommendations.is_empty());
    }

    #[test]
    fn test_exhaustion_before_reset() {
        // 85 of 100 in 17 hours of a daily window: 5 per hour, 3 hours left.
        let now = start() + chrono::Duration::hours(17);
        let f = UsageForecast::from_status(&status(85, 100, 24), now);
        assert_eq!(f.predicted_exhaustion_time, Some(now + chrono::Duration::hours(3)));
        assert_eq!(f.recommendations.len(), 2);
        assert!(f.recommendations[0].contains("additional API keys"));
        assert!(f.confidence_level <= MAX_CONFIDENCE);
    }

    #[test]
    fn test_exhausted_now() {
        let now = start() + chrono::Duration::hours(1);
        let f = UsageForecast::from_status(&status(50, 50, 24), now);
        assert_eq!(f.predicted_exhaustion_time, Some(now));
    }
}
