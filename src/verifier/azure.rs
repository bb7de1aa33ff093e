use std::sync::Arc;
use std::time::SystemTime;

use log::{debug, info};

use super::jwt::{verify_token, TokenExpectations};
use crate::config::AzureConfig;
use crate::error::Result;
use crate::key_cache::PublicKeyCache;
use crate::policy;
use crate::types::jwt::JwtEvidence;
use crate::types::maa::MaaTokenPayload;
use crate::types::{EnclaveClaims, Platform};

/// Verifies MAA tokens issued by one configured attestation provider.
pub struct AzureVerifier {
    config: AzureConfig,
    keys: Arc<PublicKeyCache>,
}

impl AzureVerifier {
    pub fn new(config: AzureConfig, keys: Arc<PublicKeyCache>) -> Self {
        Self { config, keys }
    }

    pub fn config(&self) -> &AzureConfig {
        &self.config
    }

    pub fn verify(
        &self,
        evidence: &[u8],
        expected_public_key: Option<&str>,
        current_time: SystemTime,
    ) -> Result<EnclaveClaims> {
        let token = JwtEvidence::from_bytes(evidence)?;
        debug!("decoded MAA token with key id {:?}", token.header.kid);

        let certs_url = self.config.certs_url();
        let expected = TokenExpectations {
            keys_url: &certs_url,
            issuer: self.config.issuer(),
            audience: None,
        };
        let claims = verify_token(&self.keys, &token, &expected, current_time)?;

        let payload = MaaTokenPayload::from_claims(&claims)?;
        let enclave_id = policy::azure::validate(
            &payload,
            expected_public_key,
            &self.config.disallowed_regions,
        )?;
        info!(
            "verified azure confidential container {enclave_id} in {}",
            payload.runtime_data.location
        );

        Ok(EnclaveClaims {
            enclave_id,
            platform: Platform::Azure,
            raw_claims: claims,
            workload: None,
        })
    }
}
