//! Credential registry.
//!
//! The store owns the static configuration of every credential: which
//! service it belongs to, its opaque secret reference, its rate limit and
//! the length of its accounting window.
//!
//! # Thread Safety
//!
//! All mutations are serialized through an `RwLock`. A poisoned lock is
//! recovered with `into_inner` since every mutation leaves the map consistent.

use crate::clock::SharedClock;
use crate::{CredentialId, CredpoolError, Result, Service};
use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// Opaque reference to secret material held by an external vault.
///
/// The pool never inspects it; `Debug` output is redacted.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretRef(pub String);

impl SecretRef {
    /// Wrap a reference string.
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    /// Raw reference for the collaborator that resolves it.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SecretRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretRef(<redacted>)")
    }
}

impl From<&str> for SecretRef {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Longest custom window (100 years).
const MAX_CUSTOM_SECS: u64 = 100 * 365 * 24 * 3600;

/// Length of a quota accounting window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResetPeriod {
    /// One hour.
    Hourly,
    /// One day.
    Daily,
    /// Seven days.
    Weekly,
    /// One calendar month.
    Monthly,
    /// Arbitrary fixed length.
    Custom {
        /// Window length in seconds.
        secs: u64,
    },
}

impl ResetPeriod {
    /// Window of the given number of seconds.
    pub fn seconds(secs: u64) -> Self {
        Self::Custom { secs }
    }

    /// End of the window that starts at `start`.
    pub fn advance(&self, start: DateTime<Utc>) -> DateTime<Utc> {
        self.boundary(start, 1)
    }

    /// The `n`-th window boundary of the grid anchored at `anchor`.
    ///
    /// Monthly boundaries are computed from the anchor rather than chained,
    /// so a grid anchored on the 31st returns to the 31st whenever the month
    /// has one.
    pub fn boundary(&self, anchor: DateTime<Utc>, n: u32) -> DateTime<Utc> {
        let n = i64::from(n);
        match self {
            Self::Hourly => anchor + chrono::Duration::hours(n),
            Self::Daily => anchor + chrono::Duration::days(n),
            Self::Weekly => anchor + chrono::Duration::weeks(n),
            Self::Monthly => anchor
                .checked_add_months(Months::new(n as u32))
                .unwrap_or_else(|| anchor + chrono::Duration::days(30 * n)),
            Self::Custom { secs } => {
                anchor + chrono::Duration::seconds((*secs).clamp(1, MAX_CUSTOM_SECS) as i64 * n)
            }
        }
    }
}

impl std::fmt::Display for ResetPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hourly => f.write_str("hourly"),
            Self::Daily => f.write_str("daily"),
            Self::Weekly => f.write_str("weekly"),
            Self::Monthly => f.write_str("monthly"),
            Self::Custom { secs } => write!(f, "every {secs}s"),
        }
    }
}

/// Registration request for a new credential.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CredentialConfig {
    /// Target service.
    pub service: Service,
    /// Human-readable label.
    pub name: String,
    /// Reference to the secret material.
    pub secret_ref: SecretRef,
    /// Requests per window; the service default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<u32>,
    /// Window length; the service default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_period: Option<ResetPeriod>,
}

impl CredentialConfig {
    /// Create a registration with the service's default limits.
    pub fn new(service: Service, name: impl Into<String>, secret_ref: impl Into<String>) -> Self {
        Self {
            service,
            name: name.into(),
            secret_ref: SecretRef::new(secret_ref),
            rate_limit: None,
            reset_period: None,
        }
    }

    /// Override the rate limit.
    pub fn with_rate_limit(mut self, rate_limit: u32) -> Self {
        self.rate_limit = Some(rate_limit);
        self
    }

    /// Override the reset period.
    pub fn with_reset_period(mut self, period: ResetPeriod) -> Self {
        self.reset_period = Some(period);
        self
    }
}

/// A registered credential.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    /// Identity.
    pub id: CredentialId,
    /// Target service.
    pub service: Service,
    /// Human-readable label.
    pub name: String,
    /// Reference to the secret material.
    pub secret_ref: SecretRef,
    /// Maximum requests per window.
    pub rate_limit: u32,
    /// Window length.
    pub reset_period: ResetPeriod,
    /// Registration time; anchors the window grid.
    pub created_at: DateTime<Utc>,
    /// Last administrative change.
    pub updated_at: DateTime<Utc>,
    /// Excluded from selection by an operator.
    #[serde(default)]
    pub disabled: bool,
}

impl Credential {
    /// Whether the credential can take part in selection.
    pub fn is_enabled(&self) -> bool {
        !self.disabled
    }
}

/// Registry of credentials.
pub struct CredentialStore {
    credentials: RwLock<HashMap<CredentialId, Credential>>,
    clock: SharedClock,
}

impl CredentialStore {
    /// Create an empty store.
    pub fn new(clock: SharedClock) -> Self {
        Self {
            credentials: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Register a credential.
    ///
    /// # Errors
    ///
    /// `DuplicateCredential` when the same `(service, secret_ref)` pair is
    /// already registered, `InvalidConfig` for a zero rate limit or an empty
    /// secret reference.
    pub fn register(&self, config: CredentialConfig) -> Result<Credential> {
        let rate_limit = config
            .rate_limit
            .unwrap_or_else(|| config.service.default_rate_limit());
        if rate_limit == 0 {
            return Err(CredpoolError::invalid_config(
                "rate_limit",
                "must be positive",
            ));
        }
        if config.secret_ref.expose().trim().is_empty() {
            return Err(CredpoolError::invalid_config(
                "secret_ref",
                "must not be empty",
            ));
        }

        let mut credentials = self.credentials.write().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = credentials
            .values()
            .find(|c| c.service == config.service && c.secret_ref == config.secret_ref)
        {
            return Err(CredpoolError::DuplicateCredential {
                service: config.service,
                existing: existing.id,
            });
        }

        let now = self.clock.now();
        let credential = Credential {
            id: CredentialId::new(),
            service: config.service,
            name: config.name,
            secret_ref: config.secret_ref,
            rate_limit,
            reset_period: config
                .reset_period
                .unwrap_or_else(|| config.service.default_reset_period()),
            created_at: now,
            updated_at: now,
            disabled: false,
        };
        credentials.insert(credential.id, credential.clone());
        Ok(credential)
    }

    /// Re-insert a persisted credential at startup.
    pub fn restore(&self, credential: Credential) {
        let mut credentials = self.credentials.write().unwrap_or_else(|e| e.into_inner());
        credentials.insert(credential.id, credential);
    }

    /// Get a credential by id.
    pub fn get(&self, id: &CredentialId) -> Result<Credential> {
        let credentials = self.credentials.read().unwrap_or_else(|e| e.into_inner());
        credentials
            .get(id)
            .cloned()
            .ok_or(CredpoolError::NotFound(*id))
    }

    /// All credentials for a service, enabled or not, ordered by id.
    pub fn list(&self, service: Service) -> Vec<Credential> {
        let credentials = self.credentials.read().unwrap_or_else(|e| e.into_inner());
        let mut list: Vec<_> = credentials
            .values()
            .filter(|c| c.service == service)
            .cloned()
            .collect();
        list.sort_by_key(|c| c.id);
        list
    }

    /// Every credential, ordered by service then id.
    pub fn list_all(&self) -> Vec<Credential> {
        let credentials = self.credentials.read().unwrap_or_else(|e| e.into_inner());
        let mut list: Vec<_> = credentials.values().cloned().collect();
        list.sort_by_key(|c| (c.service, c.id));
        list
    }

    /// Whether any credential was ever registered for the service.
    pub fn has_service(&self, service: Service) -> bool {
        let credentials = self.credentials.read().unwrap_or_else(|e| e.into_inner());
        credentials.values().any(|c| c.service == service)
    }

    /// Exclude a credential from selection. Idempotent.
    pub fn disable(&self, id: &CredentialId) -> Result<Credential> {
        self.set_disabled(id, true)
    }

    /// Return a credential to selection. Idempotent.
    pub fn enable(&self, id: &CredentialId) -> Result<Credential> {
        self.set_disabled(id, false)
    }

    fn set_disabled(&self, id: &CredentialId, disabled: bool) -> Result<Credential> {
        let now = self.clock.now();
        let mut credentials = self.credentials.write().unwrap_or_else(|e| e.into_inner());
        let credential = credentials
            .get_mut(id)
            .ok_or(CredpoolError::NotFound(*id))?;
        if credential.disabled != disabled {
            credential.disabled = disabled;
            credential.updated_at = now;
        }
        Ok(credential.clone())
    }

    /// Change the rate limit and window length of a credential.
    pub fn update_limits(
        &self,
        id: &CredentialId,
        rate_limit: u32,
        reset_period: ResetPeriod,
    ) -> Result<Credential> {
        if rate_limit == 0 {
            return Err(CredpoolError::invalid_config(
                "rate_limit",
                "must be positive",
            ));
        }
        let now = self.clock.now();
        let mut credentials = self.credentials.write().unwrap_or_else(|e| e.into_inner());
        let credential = credentials
            .get_mut(id)
            .ok_or(CredpoolError::NotFound(*id))?;
        credential.rate_limit = rate_limit;
        credential.reset_period = reset_period;
        credential.updated_at = now;
        Ok(credential.clone())
    }

    /// Delete a credential. Callers check for outstanding reservations first.
    pub fn remove(&self, id: &CredentialId) -> Result<Credential> {
        let mut credentials = self.credentials.write().unwrap_or_else(|e| e.into_inner());
        credentials.remove(id).ok_or(CredpoolError::NotFound(*id))
    }

    /// Number of registered credentials.
    pub fn len(&self) -> usize {
        self.credentials
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
