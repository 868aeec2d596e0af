//! Assertion helpers for selection results.

use crate::rotation::CredentialHandle;
use crate::{AdmissionError, CredentialId};

/// Assert that a selection handed out `expected` and return the handle.
///
/// # Panics
/// Panics if the selection failed or picked another credential.
pub fn assert_selected(
    result: Result<CredentialHandle, AdmissionError>,
    expected: CredentialId,
) -> CredentialHandle {
    match result {
        Ok(handle) => {
            assert_eq!(
                handle.id(),
                expected,
                "expected credential {} to be selected, got {}",
                expected.short(),
                handle.id().short()
            );
            handle
        }
        Err(e) => panic!("expected credential {} to be selected, got {e}", expected.short()),
    }
}

/// Assert that a selection was denied with `expected`.
///
/// # Panics
/// Panics if a credential was handed out or the denial differs.
pub fn assert_admission_denied(
    result: &Result<CredentialHandle, AdmissionError>,
    expected: &AdmissionError,
) {
    match result {
        Ok(handle) => panic!(
            "expected admission error '{expected}', credential {} was selected",
            handle.id().short()
        ),
        Err(e) => assert_eq!(e, expected, "unexpected admission error"),
    }
}
