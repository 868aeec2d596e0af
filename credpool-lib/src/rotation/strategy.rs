//! Trial order of admissible credentials.

use crate::health::HealthState;
use crate::{CredentialId, CredpoolError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// How a service's candidates are ordered before reservations are tried.
///
/// Every strategy is deterministic: ties always fall back to the
/// credential id.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationStrategy {
    /// Highest priority score, then least recently used.
    #[default]
    PriorityBased,
    /// Each credential in id order, starting after the last one selected.
    RoundRobin,
    /// Least recently used first; never-used credentials lead.
    LeastRecentlyUsed,
    /// Best health state first, then highest priority score.
    HealthAware,
}

impl RotationStrategy {
    /// Every strategy, in declaration order.
    pub const ALL: [RotationStrategy; 4] = [
        RotationStrategy::PriorityBased,
        RotationStrategy::RoundRobin,
        RotationStrategy::LeastRecentlyUsed,
        RotationStrategy::HealthAware,
    ];

    /// Sort candidates into trial order.
    ///
    /// `last_selected` is the service's most recent pick and only matters
    /// for [`RotationStrategy::RoundRobin`].
    pub(crate) fn order<T: Ranked>(&self, candidates: &mut [T], last_selected: Option<CredentialId>) {
        match self {
            Self::PriorityBased => candidates.sort_by(|a, b| {
                by_priority(a, b)
                    .then(a.last_used().cmp(&b.last_used()))
                    .then(a.id().cmp(&b.id()))
            }),
            Self::LeastRecentlyUsed => candidates.sort_by(|a, b| {
                a.last_used()
                    .cmp(&b.last_used())
                    .then(a.id().cmp(&b.id()))
            }),
            Self::HealthAware => candidates.sort_by(|a, b| {
                health_rank(a.health())
                    .cmp(&health_rank(b.health()))
                    .then(by_priority(a, b))
                    .then(a.last_used().cmp(&b.last_used()))
                    .then(a.id().cmp(&b.id()))
            }),
            Self::RoundRobin => {
                candidates.sort_by_key(|c| c.id());
                if let Some(last) = last_selected {
                    let next = candidates.partition_point(|c| c.id() <= last);
                    candidates.rotate_left(next % candidates.len().max(1));
                }
            }
        }
    }
}

impl fmt::Display for RotationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PriorityBased => "priority_based",
            Self::RoundRobin => "round_robin",
            Self::LeastRecentlyUsed => "least_recently_used",
            Self::HealthAware => "health_aware",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for RotationStrategy {
    type Err = CredpoolError;

    /// Accepts the snake_case name, with dashes or underscores.
    fn from_str(s: &str) -> crate::Result<Self> {
        let name = s.trim().replace('-', "_");
        Self::ALL
            .iter()
            .copied()
            .find(|strategy| strategy.to_string().eq_ignore_ascii_case(&name))
            .ok_or_else(|| {
                CredpoolError::invalid_config("rotation", format!("unknown strategy '{s}'"))
            })
    }
}

/// What a strategy needs to know about a candidate.
pub(crate) trait Ranked {
    fn id(&self) -> CredentialId;
    fn priority(&self) -> f64;
    fn last_used(&self) -> Option<DateTime<Utc>>;
    fn health(&self) -> HealthState;
}

fn by_priority<T: Ranked>(a: &T, b: &T) -> Ordering {
    b.priority().total_cmp(&a.priority())
}

fn health_rank(state: HealthState) -> u8 {
    match state {
        HealthState::Healthy => 0,
        HealthState::Degraded => 1,
        HealthState::Unhealthy => 2,
        HealthState::Failed => 3,
        HealthState::Cooldown => 4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use uuid::Uuid;

    #[derive(Clone, Debug)]
    struct Entry {
        id: CredentialId,
        priority: f64,
        last_used: Option<DateTime<Utc>>,
        health: HealthState,
    }

    impl Ranked for Entry {
        fn id(&self) -> CredentialId {
            self.id
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

    fn id(n: u128) -> CredentialId {
        CredentialId(Uuid::from_u128(n))
    }

    fn at(minute: u32) -> Option<DateTime<Utc>> {
        Some(Utc.with_ymd_and_hms(2026, 1, 1, 0, minute, 0).unwrap())
    }

    fn entries() -> Vec<Entry> {
        vec![
            Entry {
                id: id(1),
                priority: 60.0,
                last_used: at(5),
                health: HealthState::Degraded,
            },
            Entry {
                id: id(2),
                priority: 90.0,
                last_used: at(9),
                health: HealthState::Unhealthy,
            },
            Entry {
                id: id(3),
                priority: 60.0,
                last_used: None,
                health: HealthState::Healthy,
            },
            Entry {
                id: id(4),
                priority: 40.0,
                last_used: at(1),
                health: HealthState::Healthy,
            },
        ]
    }

    fn ordered(strategy: RotationStrategy, last: Option<CredentialId>) -> Vec<CredentialId> {
        let mut candidates = entries();
        strategy.order(&mut candidates, last);
        candidates.into_iter().map(|c| c.id).collect()
    }

    #[test]
    fn test_priority_then_recency_then_id() {
        assert_eq!(
            ordered(RotationStrategy::PriorityBased, None),
            vec![id(2), id(3), id(1), id(4)]
        );
    }

    #[test]
    fn test_least_recently_used() {
        assert_eq!(
            ordered(RotationStrategy::LeastRecentlyUsed, None),
            vec![id(3), id(4), id(1), id(2)]
        );
    }

    #[test]
    fn test_health_aware_prefers_better_states() {
        assert_eq!(
            ordered(RotationStrategy::HealthAware, None),
            vec![id(3), id(4), id(1), id(2)]
        );
    }

    #[test]
    fn test_round_robin_continues_after_last_pick() {
        let rr = RotationStrategy::RoundRobin;
        assert_eq!(ordered(rr, None), vec![id(1), id(2), id(3), id(4)]);
        assert_eq!(ordered(rr, Some(id(2))), vec![id(3), id(4), id(1), id(2)]);
        assert_eq!(ordered(rr, Some(id(4))), vec![id(1), id(2), id(3), id(4)]);
    }

    #[test]
    fn test_round_robin_after_last_pick_left_the_pool() {
        let mut candidates: Vec<Entry> = entries().into_iter().filter(|e| e.id != id(2)).collect();
        RotationStrategy::RoundRobin.order(&mut candidates, Some(id(2)));
        let ids: Vec<CredentialId> = candidates.into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![id(3), id(4), id(1)]);
    }

    #[test]
    fn test_round_robin_on_empty_candidates() {
        let mut none: Vec<Entry> = Vec::new();
        RotationStrategy::RoundRobin.order(&mut none, Some(id(1)));
        assert!(none.is_empty());
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("round-robin".parse::<RotationStrategy>().unwrap(), RotationStrategy::RoundRobin);
        assert_eq!(
            " Health_Aware ".parse::<RotationStrategy>().unwrap(),
            RotationStrategy::HealthAware
        );
        assert!("load_balanced".parse::<RotationStrategy>().is_err());
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&RotationStrategy::LeastRecentlyUsed).unwrap();
        assert_eq!(json, "\"least_recently_used\"");
        for strategy in RotationStrategy::ALL {
            let json = serde_json::to_string(&strategy).unwrap();
            assert_eq!(json, format!("\"{}\"", strategy));
        }
    }
}
