//! Pool configuration.
//!
//! All thresholds of the health state machine, the cooldown backoff curve,
//! the priority score weights and the background task intervals live here.
//! Every struct deserializes with defaults for missing fields, so a JSON file
//! only needs to name what it overrides.

use crate::rotation::RotationStrategy;
use crate::{CredpoolError, Result, Service};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Thresholds driving health state transitions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthThresholds {
    /// Number of most recent outcomes in the rolling window (N).
    pub rolling_window: usize,
    /// Rolling success rate below which a healthy key becomes degraded.
    pub degraded_below: f64,
    /// Rolling success rate below which a degraded key becomes unhealthy.
    pub unhealthy_below: f64,
    /// Consecutive failures that make a degraded key unhealthy.
    pub unhealthy_consecutive_failures: u32,
    /// Consecutive failures that make an unhealthy key failed.
    pub failed_consecutive_failures: u32,
    /// Rolling success rate required to recover.
    pub recovery_rate: f64,
    /// Consecutive successes required before recovery (M).
    pub probation_successes: u32,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            rolling_window: 20,
            degraded_below: 0.90,
            unhealthy_below: 0.70,
            unhealthy_consecutive_failures: 3,
            failed_consecutive_failures: 5,
            recovery_rate: 0.95,
            probation_successes: 5,
        }
    }
}

/// Longest accepted cooldown cap.
pub const MAX_BACKOFF_CAP_SECS: u64 = 30 * 86_400;

/// Longest accepted reservation timeout.
pub const MAX_RESERVATION_TIMEOUT_SECS: u64 = 86_400;

/// Exponential cooldown backoff with a floor and a cap.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    /// Shortest cooldown in seconds.
    pub floor_secs: u64,
    /// Longest cooldown in seconds.
    pub cap_secs: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            floor_secs: 30,
            cap_secs: 3600,
        }
    }
}

impl BackoffPolicy {
    /// Cooldown length for a backoff level.
    ///
    /// Levels 0 and 1 both yield the floor; each further level doubles it
    /// until the cap.
    pub fn backoff(&self, level: u32) -> Duration {
        let exponent = level.saturating_sub(1).min(32);
        let secs = self
            .floor_secs
            .saturating_mul(1u64 << exponent)
            .clamp(self.floor_secs, self.cap_secs.max(self.floor_secs));
        Duration::from_secs(secs)
    }
}

/// Weights of the priority score.
///
/// `score = success_rate * w_s - consecutive_failures * w_f + recency_bonus
/// - (1 - quota_remaining) * w_q`, clamped to `[0, 100]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorityWeights {
    /// Points for a perfect rolling success rate.
    pub success_rate: f64,
    /// Penalty per consecutive failure.
    pub consecutive_failure: f64,
    /// Bonus for a success right now, decaying to zero over the horizon.
    pub recency: f64,
    /// Horizon of the recency bonus in seconds.
    pub recency_horizon_secs: u64,
    /// Penalty for a fully consumed quota window.
    pub quota_pressure: f64,
}

impl Default for PriorityWeights {
    fn default() -> Self {
        Self {
            success_rate: 100.0,
            consecutive_failure: 5.0,
            recency: 5.0,
            recency_horizon_secs: 3600,
            quota_pressure: 10.0,
        }
    }
}

/// Usage percentages that raise quota alerts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertThresholds {
    /// Percentage of the limit that raises a warning.
    pub warning_percent: f64,
    /// Percentage of the limit that raises an emergency alert.
    pub emergency_percent: f64,
    /// Maximum retained alerts.
    pub max_alerts: usize,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            warning_percent: 75.0,
            emergency_percent: 90.0,
            max_alerts: 1000,
        }
    }
}

/// Intervals of the background tasks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackgroundConfig {
    /// Seconds between cooldown reactivation sweeps.
    pub reactivation_interval_secs: u64,
    /// Seconds between health checks (includes reservation expiry).
    pub health_check_interval_secs: u64,
    /// Seconds between metric flushes to the persistence store.
    pub flush_interval_secs: u64,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            reactivation_interval_secs: 15,
            health_check_interval_secs: 300,
            flush_interval_secs: 30,
        }
    }
}

/// Complete pool configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Health state machine thresholds.
    pub health: HealthThresholds,
    /// Cooldown backoff curve.
    pub backoff: BackoffPolicy,
    /// Priority score weights.
    pub priority: PriorityWeights,
    /// Quota alert thresholds.
    pub alerts: AlertThresholds,
    /// Seconds after which an unresolved reservation is released.
    pub reservation_timeout_secs: u64,
    /// Maximum retained rotation events.
    pub event_log_capacity: usize,
    /// Background task intervals.
    pub background: BackgroundConfig,
    /// Candidate ordering per service. Services not listed use
    /// [`RotationStrategy::PriorityBased`].
    pub rotation: BTreeMap<Service, RotationStrategy>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            health: HealthThresholds::default(),
            backoff: BackoffPolicy::default(),
            priority: PriorityWeights::default(),
            alerts: AlertThresholds::default(),
            reservation_timeout_secs: 300,
            event_log_capacity: 10_000,
            background: BackgroundConfig::default(),
            rotation: BTreeMap::new(),
        }
    }
}

impl PoolConfig {
    /// Strict thresholds for keys that are expensive to burn.
    ///
    /// Degrades early, fails after three consecutive failures and backs off
    /// for at least two minutes.
    pub fn strict() -> Self {
        Self {
            health: HealthThresholds {
                degraded_below: 0.95,
                unhealthy_below: 0.80,
                unhealthy_consecutive_failures: 2,
                failed_consecutive_failures: 3,
                recovery_rate: 0.98,
                probation_successes: 10,
                ..HealthThresholds::default()
            },
            backoff: BackoffPolicy {
                floor_secs: 120,
                cap_secs: 6 * 3600,
            },
            reservation_timeout_secs: 120,
            ..Self::default()
        }
    }

    /// Relaxed thresholds for development and testing.
    pub fn relaxed() -> Self {
        Self {
            health: HealthThresholds {
                degraded_below: 0.70,
                unhealthy_below: 0.40,
                unhealthy_consecutive_failures: 5,
                failed_consecutive_failures: 10,
                recovery_rate: 0.80,
                probation_successes: 3,
                ..HealthThresholds::default()
            },
            backoff: BackoffPolicy {
                floor_secs: 5,
                cap_secs: 300,
            },
            ..Self::default()
        }
    }

    /// Parse a JSON document and validate it.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Candidate ordering for a service.
    pub fn strategy_for(&self, service: Service) -> RotationStrategy {
        self.rotation.get(&service).copied().unwrap_or_default()
    }

    /// Load and validate a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&contents)
    }

    /// Serialize as pretty JSON.
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reservation timeout as a duration.
    pub fn reservation_timeout(&self) -> Duration {
        Duration::from_secs(self.reservation_timeout_secs)
    }

    /// Check internal consistency of all thresholds.
    pub fn validate(&self) -> Result<()> {
        let h = &self.health;
        if h.rolling_window == 0 {
            return Err(CredpoolError::invalid_config(
                "health.rolling_window",
                "must be at least 1",
            ));
        }
        for (field, value) in [
            ("health.degraded_below", h.degraded_below),
            ("health.unhealthy_below", h.unhealthy_below),
            ("health.recovery_rate", h.recovery_rate),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(CredpoolError::invalid_config(
                    field,
                    format!("{value} is not a rate in [0, 1]"),
                ));
            }
        }
        if h.unhealthy_below > h.degraded_below {
            return Err(CredpoolError::invalid_config(
                "health.unhealthy_below",
                "must not exceed health.degraded_below",
            ));
        }
        if h.recovery_rate < h.degraded_below {
            return Err(CredpoolError::invalid_config(
                "health.recovery_rate",
                "must be at least health.degraded_below",
            ));
        }
        if h.failed_consecutive_failures < h.unhealthy_consecutive_failures {
            return Err(CredpoolError::invalid_config(
                "health.failed_consecutive_failures",
                "must be at least health.unhealthy_consecutive_failures",
            ));
        }
        if h.probation_successes == 0 {
            return Err(CredpoolError::invalid_config(
                "health.probation_successes",
                "must be at least 1",
            ));
        }
        if self.backoff.floor_secs == 0 || self.backoff.cap_secs < self.backoff.floor_secs {
            return Err(CredpoolError::invalid_config(
                "backoff",
                "floor must be positive and not exceed cap",
            ));
        }
        if self.backoff.cap_secs > MAX_BACKOFF_CAP_SECS {
            return Err(CredpoolError::invalid_config(
                "backoff.cap_secs",
                "must not exceed 30 days",
            ));
        }
        let p = &self.priority;
        if [p.success_rate, p.consecutive_failure, p.recency, p.quota_pressure]
            .iter()
            .any(|w| !w.is_finite() || *w < 0.0)
        {
            return Err(CredpoolError::invalid_config(
                "priority",
                "weights must be finite and non-negative",
            ));
        }
        let a = &self.alerts;
        if !(0.0..=100.0).contains(&a.warning_percent)
            || !(0.0..=100.0).contains(&a.emergency_percent)
            || a.warning_percent > a.emergency_percent
        {
            return Err(CredpoolError::invalid_config(
                "alerts",
                "percentages must lie in [0, 100] with warning <= emergency",
            ));
        }
        if self.reservation_timeout_secs == 0
            || self.reservation_timeout_secs > MAX_RESERVATION_TIMEOUT_SECS
        {
            return Err(CredpoolError::invalid_config(
                "reservation_timeout_secs",
                "must be positive and at most one day",
            ));
        }
        let b = &self.background;
        if b.reactivation_interval_secs == 0
            || b.health_check_interval_secs == 0
            || b.flush_interval_secs == 0
        {
            return Err(CredpoolError::invalid_config(
                "background",
                "intervals must be positive",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        PoolConfig::default().validate().unwrap();
        PoolConfig::strict().validate().unwrap();
        PoolConfig::relaxed().validate().unwrap();
    }

    #[test]
    fn test_backoff_curve() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_secs(30));
        assert_eq!(policy.backoff(1), Duration::from_secs(30));
        assert_eq!(policy.backoff(2), Duration::from_secs(60));
        assert_eq!(policy.backoff(3), Duration::from_secs(120));
        assert_eq!(policy.backoff(8), Duration::from_secs(3600));
        assert_eq!(policy.backoff(u32::MAX), Duration::from_secs(3600));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = PoolConfig::from_json_str(
            r#"{ "health": { "rolling_window": 10 }, "reservation_timeout_secs": 60 }"#,
        )
        .unwrap();
        assert_eq!(config.health.rolling_window, 10);
        assert_eq!(config.health.degraded_below, 0.90);
        assert_eq!(config.reservation_timeout(), Duration::from_secs(60));
        assert_eq!(config.backoff, BackoffPolicy::default());
    }

    #[test]
    fn test_validation_rejects_inverted_rates() {
        let mut config = PoolConfig::default();
        config.health.unhealthy_below = 0.95;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("unhealthy_below"));

        let mut config = PoolConfig::default();
        config.backoff.cap_secs = 10;
        assert!(config.validate().is_err());

        let mut config = PoolConfig::default();
        config.priority.quota_pressure = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_oversized_durations() {
        let config = PoolConfig::from_json_str(r#"{ "reservation_timeout_secs": 18446744073709551615 }"#);
        assert!(config.unwrap_err().to_string().contains("reservation_timeout_secs"));

        let mut config = PoolConfig::default();
        config.reservation_timeout_secs = MAX_RESERVATION_TIMEOUT_SECS + 1;
        assert!(config.validate().is_err());
        config.reservation_timeout_secs = MAX_RESERVATION_TIMEOUT_SECS;
        config.validate().unwrap();

        let mut config = PoolConfig::default();
        config.backoff.cap_secs = u64::MAX;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("backoff.cap_secs"));
    }

    #[test]
    fn test_rotation_strategy_per_service() {
        let config = PoolConfig::from_json_str(
            r#"{ "rotation": { "tavily": "round_robin", "exa": "health_aware" } }"#,
        )
        .unwrap();
        assert_eq!(config.strategy_for(Service::Tavily), RotationStrategy::RoundRobin);
        assert_eq!(config.strategy_for(Service::Exa), RotationStrategy::HealthAware);
        assert_eq!(config.strategy_for(Service::Jina), RotationStrategy::PriorityBased);

        assert!(PoolConfig::from_json_str(r#"{ "rotation": { "tavily": "random" } }"#).is_err());
    }

    #[test]
    fn test_json_round_trip_of_preset() {
        let json = PoolConfig::strict().to_json_pretty().unwrap();
        let parsed = PoolConfig::from_json_str(&json).unwrap();
        assert_eq!(parsed, PoolConfig::strict());
    }
}
