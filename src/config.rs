use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    AWS_NITRO_ROOT_CERT_PEM, ENV_API_TOKEN_SECRET_NAME, ENV_CORE_BASE_URL,
    ENV_DEPLOYMENT_ENVIRONMENT, ENV_IDENTITY_SCOPE, ENV_OPTOUT_BASE_URL, KEY_CACHE_TTL_SECS,
    KEY_REFETCH_MIN_INTERVAL_SECS, MAA_CERTS_PATH,
};
use crate::types::gcp::Environment;

/// Platform selection plus its settings. One engine is built per value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "platform", rename_all = "lowercase")]
pub enum PlatformConfig {
    Nitro(NitroConfig),
    Azure(AzureConfig),
    Gcp(GcpConfig),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NitroConfig {
    /// PEM of the single root every attestation chain must end in.
    #[serde(default = "default_nitro_root")]
    pub root_certificate_pem: String,
}

impl Default for NitroConfig {
    fn default() -> Self {
        Self {
            root_certificate_pem: default_nitro_root(),
        }
    }
}

fn default_nitro_root() -> String {
    AWS_NITRO_ROOT_CERT_PEM.to_string()
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AzureConfig {
    /// MAA instance URL, e.g. `https://sharedeus.eus.attest.azure.net`.
    pub maa_endpoint: String,

    /// Case-insensitive substrings a workload location must not contain.
    #[serde(default = "default_disallowed_regions")]
    pub disallowed_regions: Vec<String>,
}

impl AzureConfig {
    pub fn new(maa_endpoint: impl Into<String>) -> Self {
        Self {
            maa_endpoint: maa_endpoint.into(),
            disallowed_regions: default_disallowed_regions(),
        }
    }

    /// The endpoint without a trailing slash; also the expected token issuer.
    pub fn issuer(&self) -> &str {
        self.maa_endpoint.trim_end_matches('/')
    }

    pub fn certs_url(&self) -> String {
        format!("{}{MAA_CERTS_PATH}", self.issuer())
    }
}

fn default_disallowed_regions() -> Vec<String> {
    vec!["china".to_string(), "europe".to_string()]
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcpConfig {
    #[serde(default)]
    pub policy: GcpEnvPolicy,
}

/// Which container env overrides an operator workload may carry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcpEnvPolicy {
    /// Keys that must always be present.
    pub required: BTreeSet<String>,
    /// Extra keys tolerated per environment.
    #[serde(default)]
    pub optional: BTreeMap<Environment, BTreeSet<String>>,
}

impl GcpEnvPolicy {
    pub fn optional_for(&self, environment: Environment) -> impl Iterator<Item = &str> {
        self.optional
            .get(&environment)
            .into_iter()
            .flatten()
            .map(String::as_str)
    }
}

impl Default for GcpEnvPolicy {
    fn default() -> Self {
        Self {
            required: [
                ENV_DEPLOYMENT_ENVIRONMENT,
                ENV_IDENTITY_SCOPE,
                ENV_API_TOKEN_SECRET_NAME,
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            optional: BTreeMap::from([(
                Environment::Integ,
                [ENV_CORE_BASE_URL, ENV_OPTOUT_BASE_URL]
                    .into_iter()
                    .map(String::from)
                    .collect(),
            )]),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyCacheConfig {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// Unknown kids only trigger a refetch once the cached set is this old.
    #[serde(default = "default_min_refetch_secs")]
    pub min_refetch_secs: u64,
}

impl KeyCacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn min_refetch_interval(&self) -> Duration {
        Duration::from_secs(self.min_refetch_secs)
    }
}

impl Default for KeyCacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            min_refetch_secs: default_min_refetch_secs(),
        }
    }
}

fn default_ttl_secs() -> u64 {
    KEY_CACHE_TTL_SECS
}

fn default_min_refetch_secs() -> u64 {
    KEY_REFETCH_MIN_INTERVAL_SECS
}
