use std::sync::Arc;
use std::time::SystemTime;

use log::{debug, info};

use super::jwt::{verify_token, TokenExpectations};
use crate::config::GcpConfig;
use crate::constants::{GCP_AUDIENCE, GCP_ISSUER, GCP_JWKS_URL};
use crate::error::Result;
use crate::key_cache::PublicKeyCache;
use crate::policy;
use crate::types::gcp::GcpTokenPayload;
use crate::types::jwt::JwtEvidence;
use crate::types::{EnclaveClaims, Platform};

/// Verifies Confidential Space attestation tokens. Issuer, audience and key
/// listing are fixed by the platform.
pub struct GcpVerifier {
    config: GcpConfig,
    keys: Arc<PublicKeyCache>,
}

impl GcpVerifier {
    pub fn new(config: GcpConfig, keys: Arc<PublicKeyCache>) -> Self {
        Self { config, keys }
    }

    /// Confidential Space tokens are not bound to a caller key, so there is no
    /// `expected_public_key` here.
    pub fn verify(&self, evidence: &[u8], current_time: SystemTime) -> Result<EnclaveClaims> {
        let token = JwtEvidence::from_bytes(evidence)?;
        debug!("decoded Confidential Space token with key id {:?}", token.header.kid);

        let expected = TokenExpectations {
            keys_url: GCP_JWKS_URL,
            issuer: GCP_ISSUER,
            audience: Some(GCP_AUDIENCE),
        };
        let claims = verify_token(&self.keys, &token, &expected, current_time)?;

        let payload = GcpTokenPayload::from_claims(&claims)?;
        let outcome = policy::gcp::validate(&payload, &self.config.policy)?;
        info!(
            "verified confidential space workload {} ({}, debug: {}, env: {}, scope: {:?})",
            outcome.enclave_id,
            payload.workload_image_reference,
            payload.is_debug_mode(),
            outcome.scope.environment,
            outcome.scope.identity_scope
        );

        Ok(EnclaveClaims {
            enclave_id: outcome.enclave_id,
            platform: Platform::Gcp,
            raw_claims: claims,
            workload: Some(outcome.scope),
        })
    }
}
