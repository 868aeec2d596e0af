//! Health probe collaborator.

use crate::store::Credential;
use crate::{CredpoolError, Result};
use async_trait::async_trait;

/// Checks whether a cooled-down credential works again.
///
/// Implementations typically issue a cheap authenticated request to the
/// provider. Probes run without any pool lock held.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Probe a credential. `Ok` means it can rejoin rotation.
    async fn probe(&self, credential: &Credential) -> Result<()>;
}

/// Probe with a fixed answer.
///
/// The default collaborator when no provider-specific probe is wired: every
/// credential is assumed to recover once its cooldown has elapsed.
#[derive(Clone, Copy, Debug)]
pub struct StaticProbe {
    healthy: bool,
}

impl StaticProbe {
    /// Probe that always succeeds.
    pub fn healthy() -> Self {
        Self { healthy: true }
    }

    /// Probe that always fails.
    pub fn failing() -> Self {
        Self { healthy: false }
    }
}

impl Default for StaticProbe {
    fn default() -> Self {
        Self::healthy()
    }
}

#[async_trait]
impl HealthProbe for StaticProbe {
    async fn probe(&self, credential: &Credential) -> Result<()> {
        if self.healthy {
            Ok(())
        } else {
            Err(CredpoolError::Probe {
                id: credential.id,
                reason: "static probe configured to fail".to_string(),
            })
        }
    }
}
