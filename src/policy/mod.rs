//! Platform policies. Each `validate` takes claims that have already been
//! authenticated and either yields the enclave identifier or a
//! [`AttestationError::PolicyViolation`] with a stable reason.

use log::warn;

use crate::error::AttestationError;
use crate::types::Platform;

pub mod azure;
pub mod gcp;
pub mod nitro;

pub(crate) fn violation(platform: Platform, reason: impl Into<String>) -> AttestationError {
    let reason = reason.into();
    warn!("{platform} attestation rejected by policy: {reason}");
    AttestationError::policy(reason)
}
