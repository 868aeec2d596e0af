//! Selected credential with its reservation.

use crate::store::Credential;
use crate::usage::Reservation;
use crate::CredentialId;
use chrono::{DateTime, Utc};

/// A credential handed out by the selector.
///
/// Carries one unit of reserved quota. Pass it back through
/// `CredentialPool::report_outcome` after the call or
/// `CredentialPool::release` if the call was never made. The handle is not
/// `Clone`, so each reservation is resolved at most once.
#[derive(Debug)]
pub struct CredentialHandle {
    credential: Credential,
    reservation: Reservation,
    selected_at: DateTime<Utc>,
}

impl CredentialHandle {
    pub(crate) fn new(
        credential: Credential,
        reservation: Reservation,
        selected_at: DateTime<Utc>,
    ) -> Self {
        Self {
            credential,
            reservation,
            selected_at,
        }
    }

    /// The selected credential.
    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    /// Id of the selected credential.
    pub fn id(&self) -> CredentialId {
        self.credential.id
    }

    /// The quota reservation.
    pub fn reservation(&self) -> &Reservation {
        &self.reservation
    }

    /// When the credential was selected.
    pub fn selected_at(&self) -> DateTime<Utc> {
        self.selected_at
    }

    pub(crate) fn into_parts(self) -> (Credential, Reservation) {
        (self.credential, self.reservation)
    }
}
