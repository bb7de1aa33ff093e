use super::violation;
use crate::error::Result;
use crate::types::maa::MaaTokenPayload;
use crate::types::{EnclaveId, Platform};

/// Enforce the confidential container policy on verified MAA claims.
///
/// The identifier is the CCE policy digest exactly as MAA reports it.
pub fn validate(
    payload: &MaaTokenPayload,
    expected_public_key: Option<&str>,
    disallowed_regions: &[String],
) -> Result<EnclaveId> {
    if !payload.is_sev_snp_vm() {
        return Err(violation(
            Platform::Azure,
            format!("attestation type {:?} is not SEV-SNP", payload.attestation_type),
        ));
    }

    if !payload.is_utility_vm_compliant() {
        return Err(violation(
            Platform::Azure,
            format!(
                "compliance status {:?} is not an Azure compliant utility VM",
                payload.compliance_status
            ),
        ));
    }

    if payload.vm_debuggable {
        return Err(violation(Platform::Azure, "VM is debuggable"));
    }

    let location = payload.runtime_data.location.to_lowercase();
    if let Some(region) = disallowed_regions
        .iter()
        .find(|region| location.contains(&region.to_lowercase()))
    {
        return Err(violation(
            Platform::Azure,
            format!(
                "location {:?} is in disallowed region {region:?}",
                payload.runtime_data.location
            ),
        ));
    }

    let Some(expected) = expected_public_key else {
        return Err(violation(Platform::Azure, "no public key to bind the token to"));
    };
    if payload.runtime_data.public_key != expected {
        return Err(violation(
            Platform::Azure,
            "runtime public key does not match the expected key",
        ));
    }

    if payload.cce_policy_digest.is_empty() {
        return Err(violation(Platform::Azure, "CCE policy digest is missing"));
    }

    Ok(EnclaveId::from_platform(payload.cce_policy_digest.clone()))
}
