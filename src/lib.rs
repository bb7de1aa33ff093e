pub mod config;
pub mod constants;
pub mod error;
pub mod key_cache;
pub mod policy;
pub mod trust_store;
pub mod types;
pub mod utils;
pub mod verifier;

#[cfg(test)]
mod test_utils;

use std::sync::Arc;
use std::time::SystemTime;

use anyhow::Context;

pub use config::{
    AzureConfig, GcpConfig, GcpEnvPolicy, KeyCacheConfig, NitroConfig, PlatformConfig,
};
pub use error::{AttestationError, ErrorKind, Result};
pub use key_cache::{HttpKeySetSource, KeySetSource, PublicKeyCache};
pub use types::gcp::{Environment, IdentityScope, WorkloadScope};
pub use types::{EnclaveClaims, EnclaveId, Platform};
pub use verifier::{AzureVerifier, GcpVerifier, NitroVerifier};

/// Verifies attestation evidence of one configured platform.
///
/// Apart from the shared key cache there is no mutable state, so one engine
/// can serve concurrent calls.
pub enum AttestationEngine {
    Nitro(NitroVerifier),
    Azure(AzureVerifier),
    Gcp(GcpVerifier),
}

impl AttestationEngine {
    pub fn new(config: &PlatformConfig, keys: Arc<PublicKeyCache>) -> anyhow::Result<Self> {
        Ok(match config {
            PlatformConfig::Nitro(config) => Self::Nitro(
                NitroVerifier::new(config).context("failed to set up Nitro verification")?,
            ),
            PlatformConfig::Azure(config) => Self::Azure(AzureVerifier::new(config.clone(), keys)),
            PlatformConfig::Gcp(config) => Self::Gcp(GcpVerifier::new(config.clone(), keys)),
        })
    }

    pub fn platform(&self) -> Platform {
        match self {
            Self::Nitro(_) => Platform::Nitro,
            Self::Azure(_) => Platform::Azure,
            Self::Gcp(_) => Platform::Gcp,
        }
    }

    /// Verify `evidence` and derive its enclave identifier.
    ///
    /// `public_key` is the base64 key the workload claims to hold. Nitro checks
    /// it when given, Azure requires it, Confidential Space tokens carry no
    /// key binding and ignore it.
    pub fn verify(
        &self,
        evidence: &[u8],
        public_key: Option<&str>,
        current_time: SystemTime,
    ) -> Result<EnclaveClaims> {
        match self {
            Self::Nitro(verifier) => verifier.verify(evidence, public_key, current_time),
            Self::Azure(verifier) => verifier.verify(evidence, public_key, current_time),
            Self::Gcp(verifier) => verifier.verify(evidence, current_time),
        }
    }
}

/// Verify a Nitro attestation document (raw CBOR or base64) against the AWS
/// Nitro Enclaves root.
pub fn verify_nitro_attestation(
    current_time: SystemTime,
    evidence: &[u8],
    expected_public_key: Option<&str>,
) -> Result<EnclaveClaims> {
    let verifier = NitroVerifier::new(&NitroConfig::default())
        .map_err(|e| AttestationError::CertChainInvalid(format!("{e:#}")))?;
    verifier.verify(evidence, expected_public_key, current_time)
}

/// Verify an MAA token issued by `config.maa_endpoint`.
pub fn verify_maa_token(
    current_time: SystemTime,
    keys: Arc<PublicKeyCache>,
    config: &AzureConfig,
    token: &str,
    expected_public_key: &str,
) -> Result<EnclaveClaims> {
    AzureVerifier::new(config.clone(), keys).verify(
        token.as_bytes(),
        Some(expected_public_key),
        current_time,
    )
}

/// Verify a Confidential Space attestation token.
pub fn verify_gcp_token(
    current_time: SystemTime,
    keys: Arc<PublicKeyCache>,
    config: &GcpConfig,
    token: &str,
) -> Result<EnclaveClaims> {
    GcpVerifier::new(config.clone(), keys).verify(token.as_bytes(), current_time)
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::{Duration, UNIX_EPOCH};

    use serde_json::json;

    use super::*;
    use crate::test_utils::{StaticKeySetSource, TestSigner};

    const NITRO_FIXTURE: &str = include_str!("../data/nitro_attestation.b64");
    const NOW: u64 = 1_700_000_000;

    fn nitro_time() -> SystemTime {
        // timestamp of the fixture document
        UNIX_EPOCH + Duration::from_millis(1_721_159_587_239)
    }

    #[test]
    fn engine_is_built_from_tagged_config() {
        let keys = Arc::new(PublicKeyCache::new(Arc::new(StaticKeySetSource::failing())));
        let configs = [
            (r#"{"platform": "nitro"}"#, Platform::Nitro),
            (
                r#"{"platform": "azure", "maa_endpoint": "https://sharedeus.eus.attest.azure.net"}"#,
                Platform::Azure,
            ),
            (r#"{"platform": "gcp"}"#, Platform::Gcp),
        ];
        for (json, platform) in configs {
            let config: PlatformConfig = serde_json::from_str(json).unwrap();
            let engine = AttestationEngine::new(&config, keys.clone()).unwrap();
            assert_eq!(engine.platform(), platform);
        }

        let broken = PlatformConfig::Nitro(NitroConfig {
            root_certificate_pem: "garbage".into(),
        });
        assert!(AttestationEngine::new(&broken, keys).is_err());
    }

    #[test]
    fn nitro_engine_matches_free_function() {
        let keys = Arc::new(PublicKeyCache::new(Arc::new(StaticKeySetSource::failing())));
        let engine =
            AttestationEngine::new(&PlatformConfig::Nitro(NitroConfig::default()), keys).unwrap();

        let from_engine = engine
            .verify(NITRO_FIXTURE.as_bytes(), None, nitro_time())
            .unwrap();
        let from_fn =
            verify_nitro_attestation(nitro_time(), NITRO_FIXTURE.as_bytes(), None).unwrap();
        assert_eq!(from_engine, from_fn);
    }

    #[test]
    fn engine_verifies_concurrently_with_one_key_set() {
        let signer = TestSigner::new("maa");
        let source = Arc::new(StaticKeySetSource::new(signer.jwks()));
        let keys = Arc::new(PublicKeyCache::new(source.clone()));
        let endpoint = "https://sharedeus.eus.attest.azure.net";
        let engine = Arc::new(
            AttestationEngine::new(&PlatformConfig::Azure(AzureConfig::new(endpoint)), keys)
                .unwrap(),
        );

        let token = signer.sign(&json!({
            "iss": endpoint,
            "exp": NOW + 3600,
            "x-ms-attestation-type": "sevsnpvm",
            "x-ms-compliance-status": "azure-compliant-uvm",
            "x-ms-sevsnpvm-is-debuggable": false,
            "x-ms-sevsnpvm-hostdata": "digest",
            "x-ms-runtime": { "location": "eastus", "publicKey": "a2V5" }
        }));
        let at = UNIX_EPOCH + Duration::from_secs(NOW);

        // warm the cache so the threads below share one entry
        engine.verify(token.as_bytes(), Some("a2V5"), at).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let engine = engine.clone();
                let token = token.clone();
                thread::spawn(move || engine.verify(token.as_bytes(), Some("a2V5"), at))
            })
            .collect();
        for handle in handles {
            let claims = handle.join().unwrap().unwrap();
            assert_eq!(claims.enclave_id.as_str(), "digest");
        }
        assert_eq!(source.fetch_count(), 1);
    }

    #[test]
    fn gcp_engine_ignores_public_key() {
        let signer = TestSigner::new("cs");
        let keys = Arc::new(PublicKeyCache::new(Arc::new(StaticKeySetSource::new(
            signer.jwks(),
        ))));
        let token = signer.sign(&json!({
            "iss": constants::GCP_ISSUER,
            "aud": constants::GCP_AUDIENCE,
            "exp": NOW + 3600,
            "dbgstat": "disabled-since-boot",
            "swname": "CONFIDENTIAL_SPACE",
            "submods": {
                "confidential_space": { "support_attributes": ["STABLE"] },
                "container": {
                    "image_digest": "sha256:abc",
                    "restart_policy": "Never",
                    "env_override": {
                        "DEPLOYMENT_ENVIRONMENT": "integ",
                        "IDENTITY_SCOPE": "euid",
                        "API_TOKEN_SECRET_NAME": "k",
                        "CORE_BASE_URL": "https://core.integ.example"
                    }
                }
            }
        }));
        let at = UNIX_EPOCH + Duration::from_secs(NOW);

        let config = PlatformConfig::Gcp(GcpConfig::default());
        let engine = AttestationEngine::new(&config, keys.clone()).unwrap();
        let with_key = engine.verify(token.as_bytes(), Some("ignored"), at).unwrap();
        let via_fn = verify_gcp_token(at, keys, &GcpConfig::default(), &token).unwrap();
        assert_eq!(with_key.enclave_id, via_fn.enclave_id);
    }
}
