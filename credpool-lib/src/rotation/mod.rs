//! Credential selection.
//!
//! The selector picks the best admissible credential for a service and
//! hands it out with a quota reservation attached.
//!
//! # Ordering
//!
//! Each service has a [`RotationStrategy`]. The default,
//! [`RotationStrategy::PriorityBased`], tries:
//!
//! - Highest `priority_score` first
//! - Least recently used next; never-used credentials before any used one
//! - Credential id last, so equal candidates are always tried in the same order
//!
//! # Example
//!
//! ```ignore
//! use credpool_lib::rotation::RotationSelector;
//!
//! let selector = RotationSelector::new(store, usage, health, clock);
//! match selector.select(Service::Exa) {
//!     Ok(handle) => call_provider(handle.credential()).await,
//!     Err(e) if e.is_backpressure() => queue_for_later(),
//!     Err(e) => return Err(e.into()),
//! }
//! ```

mod handle;
mod selector;
mod strategy;

pub use handle::CredentialHandle;
pub use selector::RotationSelector;
pub use strategy::RotationStrategy;
