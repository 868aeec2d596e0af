//! Test utilities for the credential pool.
//!
//! This module provides:
//! - A manually driven clock for window resets and cooldown expiry
//! - A probe with scripted answers
//! - Fixtures that build pools and registrations
//! - Assertion helpers for admission results
//!
//! ## Usage
//!
//! ```rust,ignore
//! use credpool_lib::test_utils::{test_pool, ManualClock, TestFixtures};
//!
//! let clock = Arc::new(ManualClock::default());
//! let pool = test_pool(clock.clone()).await;
//! let id = pool.register(TestFixtures::credential(Service::Exa, 0)).await?;
//! clock.advance(Duration::from_secs(3600));
//! ```

mod assertions;
mod clock;
mod fixtures;
mod probe;

pub use assertions::{assert_admission_denied, assert_selected};
pub use clock::ManualClock;
pub use fixtures::{test_pool, test_pool_with, TestFixtures};
pub use probe::ScriptedProbe;
