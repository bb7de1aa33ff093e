use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::{
    GCP_CONFIDENTIAL_SPACE_SWNAME, GCP_DEBUG_DISABLED, GCP_RESTART_POLICY_NEVER,
    GCP_STABLE_ATTRIBUTE,
};
use crate::error::{AttestationError, Result};

// https://cloud.google.com/confidential-computing/confidential-space/docs/reference/token-claims

/// Flattened claims of a Confidential Space attestation token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GcpTokenPayload {
    pub debug_status: String,
    pub software_name: String,
    pub software_version: Option<String>,
    pub supported_attributes: Vec<String>,
    pub workload_image_reference: String,
    pub workload_image_digest: String,
    pub cmd_overrides: Vec<String>,
    pub env_overrides: BTreeMap<String, String>,
    pub restart_policy: String,
    pub zone: Option<String>,
}

impl GcpTokenPayload {
    /// Map verified token claims onto the payload. Unknown claims are ignored.
    pub fn from_claims(claims: &serde_json::Value) -> Result<Self> {
        let claims = TokenClaims::deserialize(claims).map_err(|e| {
            AttestationError::bad_format(format!("unexpected Confidential Space claims: {e}"))
        })?;
        Ok(claims.into())
    }

    /// Anything other than the explicit "disabled since boot" marker is debug.
    pub fn is_debug_mode(&self) -> bool {
        self.debug_status != GCP_DEBUG_DISABLED
    }

    pub fn is_stable_version(&self) -> bool {
        self.supported_attributes
            .iter()
            .any(|attribute| attribute == GCP_STABLE_ATTRIBUTE)
    }

    pub fn is_confidential_space_software(&self) -> bool {
        self.software_name == GCP_CONFIDENTIAL_SPACE_SWNAME
    }

    pub fn is_restart_policy_never(&self) -> bool {
        self.restart_policy == GCP_RESTART_POLICY_NEVER
    }
}

#[derive(Debug, Default, Deserialize)]
struct TokenClaims {
    #[serde(default)]
    dbgstat: String,
    #[serde(default)]
    swname: String,
    #[serde(default)]
    swversion: Option<OneOrMany>,
    #[serde(default)]
    submods: Submods,
}

/// `swversion` is a list in current tokens and a bare string in older ones.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Default, Deserialize)]
struct Submods {
    #[serde(default)]
    confidential_space: Option<ConfidentialSpace>,
    #[serde(default)]
    container: Option<Container>,
    #[serde(default)]
    gce: Option<Gce>,
}

#[derive(Debug, Default, Deserialize)]
struct ConfidentialSpace {
    #[serde(default)]
    support_attributes: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct Container {
    #[serde(default)]
    image_reference: String,
    #[serde(default)]
    image_digest: String,
    #[serde(default)]
    restart_policy: String,
    #[serde(default)]
    cmd_override: Option<Vec<String>>,
    #[serde(default)]
    env_override: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Default, Deserialize)]
struct Gce {
    #[serde(default)]
    zone: Option<String>,
}

impl From<TokenClaims> for GcpTokenPayload {
    fn from(claims: TokenClaims) -> Self {
        let software_version = match claims.swversion {
            Some(OneOrMany::One(version)) => Some(version),
            Some(OneOrMany::Many(versions)) => versions.into_iter().next(),
            None => None,
        };
        let container = claims.submods.container.unwrap_or_default();

        Self {
            debug_status: claims.dbgstat,
            software_name: claims.swname,
            software_version,
            supported_attributes: claims
                .submods
                .confidential_space
                .and_then(|cs| cs.support_attributes)
                .unwrap_or_default(),
            workload_image_reference: container.image_reference,
            workload_image_digest: container.image_digest,
            cmd_overrides: container.cmd_override.unwrap_or_default(),
            env_overrides: container.env_override.unwrap_or_default(),
            restart_policy: container.restart_policy,
            zone: claims.submods.gce.and_then(|gce| gce.zone),
        }
    }
}

/// Deployment environment a workload declares through its env overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Prod,
    Integ,
}

impl FromStr for Environment {
    type Err = AttestationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "prod" => Ok(Self::Prod),
            "integ" => Ok(Self::Integ),
            _ => Err(AttestationError::policy(format!("unknown environment {s:?}"))),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Prod => "prod",
            Self::Integ => "integ",
        })
    }
}

/// Deployment settings of a verified Confidential Space workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadScope {
    pub environment: Environment,
    pub identity_scope: IdentityScope,
}

/// Identity scope the workload operates in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityScope {
    Uid2,
    Euid,
}

impl FromStr for IdentityScope {
    type Err = AttestationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "uid2" => Ok(Self::Uid2),
            "euid" => Ok(Self::Euid),
            _ => Err(AttestationError::policy(format!("unknown identity scope {s:?}"))),
        }
    }
}
