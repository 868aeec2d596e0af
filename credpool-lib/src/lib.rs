//! Credpool library.
//!
//! A pool of API credentials for rate-limited external services, with
//! quota-safe reservations, per-key health tracking and automatic recovery.
//!
//! # Features
//!
//! - **Quota safety**: every selection takes a provisional reservation that is
//!   later committed or rolled back, so concurrent callers never push a key
//!   past its rate limit
//! - **Health state machine**: keys move between `Healthy`, `Degraded`,
//!   `Unhealthy`, `Failed` and `Cooldown` through a single transition function
//! - **Fair selection**: highest priority score first, least recently used on ties
//! - **Analytics**: fleet snapshots and a human-readable rotation report
//!
//! # Example
//!
//! ```ignore
//! use credpool_lib::prelude::*;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let pool = CredentialPool::open(
//!     PoolConfig::default(),
//!     Arc::new(MemoryPoolStore::new()),
//!     Arc::new(StaticProbe::healthy()),
//!     Arc::new(SystemClock),
//! )
//! .await?;
//!
//! pool.register(CredentialConfig::new(Service::Tavily, "primary", "vault://tavily/1")).await?;
//!
//! let handle = pool.select_credential(Service::Tavily)?;
//! // ... perform the external call with handle.credential().secret_ref ...
//! pool.report_outcome(handle, Outcome::success(Duration::from_millis(120)))?;
//! ```

use serde::{Deserialize, Serialize};

pub mod analytics;
pub mod clock;
pub mod config;
pub mod cooldown;
pub mod errors;
pub mod health;
pub mod persistence;
pub mod pool;
pub mod prelude;
pub mod rotation;
pub mod store;
pub mod usage;

/// Test utilities for pool testing.
///
/// This module is only available with the `test-utils` feature or in test builds.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use errors::{AdmissionError, CredpoolError, CredpoolErrorCode};

/// Common result alias for credential pool operations.
pub type Result<T> = std::result::Result<T, CredpoolError>;

/// Identifier of a registered credential.
///
/// # Example
///
/// ```
/// use credpool_lib::CredentialId;
///
/// let id = CredentialId::new();
/// let parsed: CredentialId = id.to_string().parse().unwrap();
/// assert_eq!(id, parsed);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialId(pub uuid::Uuid);

impl CredentialId {
    /// Generate a fresh random identifier.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// First eight hex characters, used in logs and reports.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for CredentialId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CredentialId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for CredentialId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        uuid::Uuid::parse_str(s).map(Self)
    }
}

/// External providers whose API keys are pooled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Service {
    /// LLM routing.
    OpenRouter,
    /// Search engine results.
    SerpApi,
    /// Embeddings and reader.
    Jina,
    /// Web scraping.
    Firecrawl,
    /// Search for agents.
    Tavily,
    /// Neural search.
    Exa,
}

impl Service {
    /// Every supported service, in declaration order.
    pub const ALL: [Service; 6] = [
        Service::OpenRouter,
        Service::SerpApi,
        Service::Jina,
        Service::Firecrawl,
        Service::Tavily,
        Service::Exa,
    ];

    /// Display name for reports.
    pub fn display_name(&self) -> &'static str {
        match self {
            Service::OpenRouter => "OpenRouter.ai",
            Service::SerpApi => "SerpApi",
            Service::Jina => "Jina AI",
            Service::Firecrawl => "Firecrawl",
            Service::Tavily => "Tavily",
            Service::Exa => "Exa",
        }
    }

    /// Free-tier request limit per reset period.
    pub fn default_rate_limit(&self) -> u32 {
        match self {
            Service::OpenRouter => 50,
            Service::SerpApi => 100,
            Service::Jina => 1000,
            Service::Firecrawl => 500,
            Service::Tavily => 1000,
            Service::Exa => 1000,
        }
    }

    /// Free-tier reset period.
    pub fn default_reset_period(&self) -> store::ResetPeriod {
        match self {
            Service::OpenRouter => store::ResetPeriod::Daily,
            _ => store::ResetPeriod::Monthly,
        }
    }
}

impl std::fmt::Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Service::OpenRouter => "openrouter",
            Service::SerpApi => "serpapi",
            Service::Jina => "jina",
            Service::Firecrawl => "firecrawl",
            Service::Tavily => "tavily",
            Service::Exa => "exa",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for Service {
    type Err = CredpoolError;

    fn from_str(s: &str) -> Result<Self> {
        Service::ALL
            .iter()
            .copied()
            .find(|svc| svc.to_string().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| CredpoolError::invalid_config("service", format!("unknown service '{s}'")))
    }
}
