//! Prelude module for convenient imports.
//!
//! This module re-exports the most commonly used types and traits for
//! quick setup. Import everything with:
//!
//! ```rust,ignore
//! use credpool_lib::prelude::*;
//! ```
//!
//! ## What's Included
//!
//! - Core types: `CredentialId`, `Service`, `Credential`, `CredentialConfig`
//! - Error types: `CredpoolError`, `CredpoolErrorCode`, `AdmissionError`, `Result`
//! - The pool and its collaborators: `CredentialPool`, `PoolStore`, `HealthProbe`, `Clock`
//! - Request types: `CredentialHandle`, `Outcome`, `HealthState`, `RotationStrategy`

// Core types
pub use crate::store::{Credential, CredentialConfig, ResetPeriod, SecretRef};
pub use crate::{CredentialId, Service};

// Error handling
pub use crate::errors::{AdmissionError, CredpoolError, CredpoolErrorCode};
pub use crate::Result;

// Configuration
pub use crate::config::PoolConfig;

// Pool
pub use crate::pool::{BackgroundTasks, CredentialPool};

// Requests and health
pub use crate::health::{HealthState, Outcome, PerformanceMetrics};
pub use crate::rotation::{CredentialHandle, RotationStrategy};
pub use crate::usage::{LimitStatus, UsageForecast, UsageStatus};

// Analytics
pub use crate::analytics::FleetSnapshot;

// Collaborators
pub use crate::clock::{Clock, SystemClock};
pub use crate::cooldown::{HealthProbe, StaticProbe};
pub use crate::persistence::{JsonFilePoolStore, MemoryPoolStore, PoolStore};
