//! Time source for window accounting, cooldowns and analytics.
//!
//! Every component reads time through [`Clock`] so that window resets and
//! cooldown expiry can be driven deterministically in tests.

use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Source of the current wall-clock time.
pub trait Clock: Send + Sync {
    /// Current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the system time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Shared clock handle passed between components.
pub type SharedClock = Arc<dyn Clock>;
