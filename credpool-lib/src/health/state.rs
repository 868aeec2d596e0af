//! Health states, reported outcomes and the transition function.

use crate::config::HealthThresholds;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Health of a credential, ordered by severity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum HealthState {
    /// Fully operational.
    Healthy,
    /// Elevated failure rate, still selectable.
    Degraded,
    /// Failing often, selected only when nothing better is available.
    Unhealthy,
    /// Out of rotation until reinstated.
    Failed,
    /// Temporarily suspended until `cooldown_until`.
    Cooldown,
}

impl HealthState {
    /// Every state, in severity order.
    pub const ALL: [HealthState; 5] = [
        HealthState::Healthy,
        HealthState::Degraded,
        HealthState::Unhealthy,
        HealthState::Failed,
        HealthState::Cooldown,
    ];

    /// Whether the selector may hand out the credential.
    pub fn is_selectable(&self) -> bool {
        matches!(self, Self::Healthy | Self::Degraded | Self::Unhealthy)
    }

    /// Whether an operator should look at the credential.
    pub fn needs_attention(&self) -> bool {
        *self != Self::Healthy
    }

    /// Next state on a permanent error: one step, never skipping.
    pub fn escalate(&self) -> Self {
        match self {
            Self::Healthy => Self::Degraded,
            Self::Degraded => Self::Unhealthy,
            Self::Unhealthy | Self::Failed => Self::Failed,
            Self::Cooldown => Self::Cooldown,
        }
    }
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Healthy => "Healthy",
            Self::Degraded => "Degraded",
            Self::Unhealthy => "Unhealthy",
            Self::Failed => "Failed",
            Self::Cooldown => "Cooldown",
        };
        f.write_str(s)
    }
}

/// Result of one external call made with a credential.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    /// The call succeeded.
    pub success: bool,
    /// Round-trip time of the call.
    pub latency: Duration,
    /// The provider rejected the credential itself (revoked, unauthorized).
    pub permanent_error: bool,
    /// The provider throttled the credential.
    pub rate_limited: bool,
}

impl Outcome {
    /// Successful call.
    pub fn success(latency: Duration) -> Self {
        Self {
            success: true,
            latency,
            permanent_error: false,
            rate_limited: false,
        }
    }

    /// Transient failure.
    pub fn failure(latency: Duration) -> Self {
        Self {
            success: false,
            latency,
            permanent_error: false,
            rate_limited: false,
        }
    }

    /// Provider throttled the call.
    pub fn rate_limited(latency: Duration) -> Self {
        Self {
            rate_limited: true,
            ..Self::failure(latency)
        }
    }

    /// Provider rejected the credential.
    pub fn permanent(latency: Duration) -> Self {
        Self {
            permanent_error: true,
            ..Self::failure(latency)
        }
    }

    /// Classify an HTTP status code.
    ///
    /// 2xx is a success, 429 is throttling, 401 and 403 reject the
    /// credential, everything else is a transient failure.
    pub fn from_http_status(status: u16, latency: Duration) -> Self {
        match status {
            200..=299 => Self::success(latency),
            429 => Self::rate_limited(latency),
            401 | 403 => Self::permanent(latency),
            _ => Self::failure(latency),
        }
    }

    /// A success that also carries a failure flag.
    pub fn is_contradictory(&self) -> bool {
        self.success && (self.permanent_error || self.rate_limited)
    }

    /// Contradictory reports count as failures.
    pub(crate) fn normalized(&self) -> Self {
        if self.is_contradictory() {
            Self {
                success: false,
                ..self.clone()
            }
        } else {
            self.clone()
        }
    }
}

/// Counters the transition function reads.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TransitionInput {
    /// State before the report.
    pub current: HealthState,
    /// Success rate over the rolling window.
    pub rolling_success_rate: f64,
    /// Failures since the last success.
    pub consecutive_failures: u32,
    /// Successes since the last failure.
    pub consecutive_successes: u32,
    /// The report carried a permanent error.
    pub permanent_error: bool,
    /// The credential has been rejected by the provider before.
    pub permanent_failure: bool,
    /// The report carried a throttling signal.
    pub rate_limited: bool,
}

/// Compute the state after a report.
///
/// This is the only place health transitions are decided. Cooldown is
/// entered on throttling from any state and left only by a probe.
pub fn next_state(input: &TransitionInput, thresholds: &HealthThresholds) -> HealthState {
    use HealthState::*;

    if input.current == Cooldown || input.rate_limited {
        return Cooldown;
    }
    if input.permanent_error {
        return input.current.escalate();
    }

    let recovered = !input.permanent_failure
        && input.consecutive_failures == 0
        && input.consecutive_successes >= thresholds.probation_successes
        && input.rolling_success_rate >= thresholds.recovery_rate;

    match input.current {
        Healthy => {
            if input.rolling_success_rate < thresholds.degraded_below {
                Degraded
            } else {
                Healthy
            }
        }
        Degraded => {
            if recovered {
                Healthy
            } else if input.rolling_success_rate < thresholds.unhealthy_below
                || input.consecutive_failures >= thresholds.unhealthy_consecutive_failures
            {
                Unhealthy
            } else {
                Degraded
            }
        }
        Unhealthy => {
            if input.consecutive_failures >= thresholds.failed_consecutive_failures {
                Failed
            } else if recovered {
                Healthy
            } else {
                Unhealthy
            }
        }
        Failed => {
            if recovered {
                Healthy
            } else {
                Failed
            }
        }
        Cooldown => Cooldown,
    }
}
