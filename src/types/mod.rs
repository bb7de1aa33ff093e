use std::fmt;

use base64ct::{Base64, Encoding};
use serde::{Deserialize, Serialize};

use self::gcp::WorkloadScope;
use crate::utils::hash::sha256sum;

pub mod gcp;
pub mod jwt;
pub mod maa;
pub mod nitro;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Nitro,
    Azure,
    Gcp,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Platform::Nitro => "nitro",
            Platform::Azure => "azure",
            Platform::Gcp => "gcp",
        })
    }
}

/// Deterministic fingerprint of verified, policy-checked claims. Used for
/// allow-list lookups; carries no secret material.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnclaveId(String);

impl EnclaveId {
    /// Base64 of the SHA-256 digest of `preimage`.
    pub fn digest_of(preimage: &[u8]) -> Self {
        Self(Base64::encode_string(&sha256sum(preimage)))
    }

    /// An identifier the platform already computed, kept verbatim.
    pub fn from_platform(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EnclaveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for EnclaveId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Result of a successful verification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnclaveClaims {
    pub enclave_id: EnclaveId,
    pub platform: Platform,
    /// Verified claims kept for audit; never consulted for authorization.
    pub raw_claims: serde_json::Value,
    /// Environment and identity scope declared by a Confidential Space
    /// workload. Absent on other platforms.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workload: Option<WorkloadScope>,
}
