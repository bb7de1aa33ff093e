use serde::{Deserialize, Serialize};

use crate::constants::{MAA_ATTESTATION_TYPE_SEVSNP, MAA_COMPLIANCE_STATUS_UVM};
use crate::error::{AttestationError, Result};

// https://learn.microsoft.com/en-us/azure/attestation/attestation-token-examples

/// Claims of an MAA token issued for an SEV-SNP confidential container group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaaTokenPayload {
    #[serde(rename = "x-ms-attestation-type", default)]
    pub attestation_type: String,
    #[serde(rename = "x-ms-compliance-status", default)]
    pub compliance_status: String,
    /// Fails closed: a token that does not state the flag counts as debuggable.
    #[serde(rename = "x-ms-sevsnpvm-is-debuggable", default = "debuggable_unless_stated")]
    pub vm_debuggable: bool,
    /// Digest of the CCE policy the container group was launched with.
    #[serde(rename = "x-ms-sevsnpvm-hostdata", default)]
    pub cce_policy_digest: String,
    #[serde(rename = "x-ms-runtime", default)]
    pub runtime_data: RuntimeData,
}

/// Runtime data the workload bound into its attestation request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeData {
    #[serde(default)]
    pub location: String,
    /// Base64 public key of the workload.
    #[serde(rename = "publicKey", default)]
    pub public_key: String,
    #[serde(rename = "attestationUrl", default, skip_serializing_if = "Option::is_none")]
    pub attestation_url: Option<String>,
}

fn debuggable_unless_stated() -> bool {
    true
}

impl MaaTokenPayload {
    /// Map verified token claims onto the payload. Unknown claims are ignored.
    pub fn from_claims(claims: &serde_json::Value) -> Result<Self> {
        Self::deserialize(claims)
            .map_err(|e| AttestationError::bad_format(format!("unexpected MAA claims: {e}")))
    }

    pub fn is_sev_snp_vm(&self) -> bool {
        self.attestation_type == MAA_ATTESTATION_TYPE_SEVSNP
    }

    pub fn is_utility_vm_compliant(&self) -> bool {
        self.compliance_status == MAA_COMPLIANCE_STATUS_UVM
    }
}
