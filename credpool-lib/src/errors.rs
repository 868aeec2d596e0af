//! Error types for credential pool operations.
//!
//! Quota and health problems are handled inside the pool as state
//! transitions. Only configuration errors and admission backpressure reach
//! callers as values of these types.

use crate::{CredentialId, Service};

/// Error codes for dashboard and FFI integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum CredpoolErrorCode {
    /// Credential with the same service and secret already registered
    DuplicateCredential = 1000,
    /// Credential not found
    NotFound = 1001,
    /// Credential still has in-flight reservations
    ReservationsOutstanding = 1002,
    /// Quota exhausted for a single credential
    QuotaExceeded = 2000,
    /// No credential can serve the request right now
    NoAdmissibleCredential = 3000,
    /// No credential registered for the requested service
    UnknownService = 3001,
    /// Selection halted by an operator
    EmergencyStop = 3002,
    /// Invalid configuration value
    InvalidConfig = 4000,
    /// Persistence collaborator failed
    Persistence = 5000,
    /// Serialization error
    Serialization = 5001,
    /// Health probe failed
    Probe = 6000,
}

/// Reasons a selection request cannot be admitted.
///
/// `NoAdmissibleCredential` and `EmergencyStop` are backpressure: the caller
/// should retry later or queue the work. `UnknownService` is a configuration
/// error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdmissionError {
    /// Every candidate is exhausted, cooling down or failed.
    #[error("no admissible credential for {service}")]
    NoAdmissibleCredential {
        /// Requested service
        service: Service,
    },

    /// No credential has been registered for the service.
    #[error("no credentials registered for {service}")]
    UnknownService {
        /// Requested service
        service: Service,
    },

    /// Selection is halted by the emergency stop switch.
    #[error("emergency stop active, {service} requests blocked")]
    EmergencyStop {
        /// Requested service
        service: Service,
    },
}

impl AdmissionError {
    /// Whether the caller should back off and retry.
    pub fn is_backpressure(&self) -> bool {
        !matches!(self, Self::UnknownService { .. })
    }
}

/// Comprehensive error type for credential pool operations.
#[derive(Debug, thiserror::Error)]
pub enum CredpoolError {
    /// Same `(service, secret_ref)` pair is already registered.
    #[error("credential for {service} with this secret already registered as {existing}")]
    DuplicateCredential {
        /// Service of the rejected registration
        service: Service,
        /// Id of the credential already holding the secret
        existing: CredentialId,
    },

    /// Credential does not exist.
    #[error("credential not found: {0}")]
    NotFound(CredentialId),

    /// Credential cannot be removed while reservations are in flight.
    #[error("credential {id} has {outstanding} outstanding reservations")]
    ReservationsOutstanding {
        /// Credential id
        id: CredentialId,
        /// Number of provisional reservations
        outstanding: u32,
    },

    /// Per-credential quota exhausted for the current window.
    #[error("quota exceeded: using {used} of {limit} allowed")]
    QuotaExceeded {
        /// Committed plus provisional usage
        used: u32,
        /// Rate limit of the credential
        limit: u32,
    },

    /// Selection could not be admitted.
    #[error(transparent)]
    Admission(#[from] AdmissionError),

    /// Invalid configuration value.
    #[error("invalid {field}: {reason}")]
    InvalidConfig {
        /// Field or parameter name
        field: String,
        /// Reason for invalidity
        reason: String,
    },

    /// Persistence collaborator failed.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Health probe failed.
    #[error("probe failed for {id}: {reason}")]
    Probe {
        /// Probed credential
        id: CredentialId,
        /// Failure reason
        reason: String,
    },
}

impl CredpoolError {
    /// Get the error code for dashboard/FFI integration.
    pub fn code(&self) -> CredpoolErrorCode {
        match self {
            Self::DuplicateCredential { .. } => CredpoolErrorCode::DuplicateCredential,
            Self::NotFound(_) => CredpoolErrorCode::NotFound,
            Self::ReservationsOutstanding { .. } => CredpoolErrorCode::ReservationsOutstanding,
            Self::QuotaExceeded { .. } => CredpoolErrorCode::QuotaExceeded,
            Self::Admission(AdmissionError::NoAdmissibleCredential { .. }) => {
                CredpoolErrorCode::NoAdmissibleCredential
            }
            Self::Admission(AdmissionError::UnknownService { .. }) => {
                CredpoolErrorCode::UnknownService
            }
            Self::Admission(AdmissionError::EmergencyStop { .. }) => {
                CredpoolErrorCode::EmergencyStop
            }
            Self::InvalidConfig { .. } => CredpoolErrorCode::InvalidConfig,
            Self::Persistence(_) => CredpoolErrorCode::Persistence,
            Self::Serialization(_) => CredpoolErrorCode::Serialization,
            Self::Probe { .. } => CredpoolErrorCode::Probe,
        }
    }

    /// Returns true if this error is potentially recoverable by retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Admission(err) => err.is_backpressure(),
            Self::QuotaExceeded { .. }
            | Self::ReservationsOutstanding { .. }
            | Self::Persistence(_)
            | Self::Probe { .. } => true,
            _ => false,
        }
    }

    /// Returns a suggested retry delay in milliseconds, if applicable.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Self::Admission(AdmissionError::NoAdmissibleCredential { .. }) => Some(1000),
            Self::Admission(AdmissionError::EmergencyStop { .. }) => Some(30_000),
            Self::ReservationsOutstanding { .. } => Some(1000),
            Self::Persistence(_) => Some(500),
            _ => None,
        }
    }

    /// Create an invalid configuration error.
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a persistence error from any error type.
    pub fn persistence<E: std::fmt::Display>(err: E) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for CredpoolError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for CredpoolError {
    fn from(err: std::io::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}
