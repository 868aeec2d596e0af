//! Continuous ranking of credentials.

use crate::config::PriorityWeights;
use std::time::Duration;

/// Values the priority score is computed from.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PriorityInputs {
    /// Rolling success rate in `[0, 1]`.
    pub success_rate: f64,
    /// Failures since the last success.
    pub consecutive_failures: u32,
    /// Time since the last success, if there ever was one.
    pub since_last_success: Option<Duration>,
    /// Fraction of the window's quota still free, in `[0, 1]`.
    pub quota_remaining: f64,
}

/// Priority score in `[0, 100]`.
///
/// Non-increasing in consecutive failures, non-decreasing in success rate
/// and remaining quota.
pub fn priority_score(inputs: &PriorityInputs, weights: &PriorityWeights) -> f64 {
    let success_rate = unit(inputs.success_rate);
    let quota_remaining = unit(inputs.quota_remaining);

    let recency_bonus = match inputs.since_last_success {
        Some(elapsed) if weights.recency_horizon_secs > 0 => {
            let horizon = weights.recency_horizon_secs as f64;
            weights.recency * (1.0 - elapsed.as_secs_f64() / horizon).max(0.0)
        }
        _ => 0.0,
    };

    let score = weights.success_rate * success_rate
        - weights.consecutive_failure * f64::from(inputs.consecutive_failures)
        + recency_bonus
        - weights.quota_pressure * (1.0 - quota_remaining);

    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 100.0)
    }
}

fn unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs() -> PriorityInputs {
        PriorityInputs {
            success_rate: 0.8,
            consecutive_failures: 0,
            since_last_success: None,
            quota_remaining: 1.0,
        }
    }

    #[test]
    fn test_default_weights() {
        let w = PriorityWeights::default();
        assert_eq!(priority_score(&inputs(), &w), 80.0);

        let mut i = inputs();
        i.consecutive_failures = 2;
        i.quota_remaining = 0.5;
        assert_eq!(priority_score(&i, &w), 65.0);
    }

    #[test]
    fn test_recency_bonus_decays() {
        let w = PriorityWeights::default();
        let mut i = inputs();
        i.since_last_success = Some(Duration::ZERO);
        assert_eq!(priority_score(&i, &w), 85.0);
        i.since_last_success = Some(Duration::from_secs(1800));
        assert_eq!(priority_score(&i, &w), 82.5);
        i.since_last_success = Some(Duration::from_secs(7200));
        assert_eq!(priority_score(&i, &w), 80.0);
    }

    #[test]
    fn test_clamped() {
        let w = PriorityWeights::default();
        let mut i = inputs();
        i.success_rate = 1.0;
        i.since_last_success = Some(Duration::ZERO);
        assert_eq!(priority_score(&i, &w), 100.0);

        i.consecutive_failures = 100;
        assert_eq!(priority_score(&i, &w), 0.0);

        i.success_rate = f64::NAN;
        assert!(priority_score(&i, &w) >= 0.0);
    }
}
