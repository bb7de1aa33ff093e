use base64ct::{Base64, Encoding};

use super::violation;
use crate::error::Result;
use crate::types::nitro::AttestationDocument;
use crate::types::{EnclaveId, Platform};

/// Enforce the Nitro policy and derive `base64(SHA256(PCR0 || PCR1 || PCR2))`.
///
/// A debug-mode enclave reports all-zero PCRs, so a zero PCR0 is rejected.
/// When `expected_public_key` is given it must equal the base64 of the
/// document's `public_key`.
pub fn validate(doc: &AttestationDocument, expected_public_key: Option<&str>) -> Result<EnclaveId> {
    let mut preimage = Vec::with_capacity(3 * 48);
    for index in 0..3 {
        let pcr = doc
            .pcr(index)
            .ok_or_else(|| violation(Platform::Nitro, format!("PCR{index} is missing")))?;
        preimage.extend_from_slice(pcr);
    }

    if doc.pcr(0).is_some_and(|pcr0| pcr0.iter().all(|b| *b == 0)) {
        return Err(violation(Platform::Nitro, "enclave is running in debug mode"));
    }

    if let Some(expected) = expected_public_key {
        let actual = doc.public_key.as_deref().map(Base64::encode_string);
        if actual.as_deref() != Some(expected) {
            return Err(violation(
                Platform::Nitro,
                "enclave public key does not match the expected key",
            ));
        }
    }

    Ok(EnclaveId::digest_of(&preimage))
}
