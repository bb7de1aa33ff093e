use std::time::SystemTime;

use anyhow::Context;
use log::{debug, info};
use x509_cert::certificate::CertificateInner;

use crate::config::NitroConfig;
use crate::error::{AttestationError, Result};
use crate::policy;
use crate::trust_store::TrustStore;
use crate::types::nitro::AttestationRequest;
use crate::types::{EnclaveClaims, Platform};
use crate::utils::cert::{cert_der_from_pem, parse_der, subject_public_key};
use crate::utils::crypto::verify_raw_ecdsa_signature;

/// Verifies Nitro Secure Module attestation documents against a pinned root.
pub struct NitroVerifier {
    root: CertificateInner,
}

impl NitroVerifier {
    pub fn new(config: &NitroConfig) -> anyhow::Result<Self> {
        let der = cert_der_from_pem(&config.root_certificate_pem).context("invalid Nitro root")?;
        let root = parse_der(&der).context("invalid Nitro root")?;
        Ok(Self { root })
    }

    pub fn verify(
        &self,
        evidence: &[u8],
        expected_public_key: Option<&str>,
        current_time: SystemTime,
    ) -> Result<EnclaveClaims> {
        // 1. Decode the COSE_Sign1 envelope and its attestation document.
        let request = AttestationRequest::decode(evidence)?;
        debug!(
            "decoded Nitro attestation from module {}",
            request.document.module_id
        );

        // 2. Verify the certificate path from the document's leaf to the pinned root.
        let leaf = self.verify_chain(&request, current_time)?;

        // 3. Verify the envelope signature with the leaf key.
        verify_signature(&request, &leaf)?;
        debug!("Nitro attestation signature verified");

        // 4. Only now may the document be trusted.
        let enclave_id = policy::nitro::validate(&request.document, expected_public_key)?;
        info!("verified nitro enclave {enclave_id}");

        Ok(EnclaveClaims {
            enclave_id,
            platform: Platform::Nitro,
            raw_claims: request.document.audit_claims(),
            workload: None,
        })
    }

    fn verify_chain(
        &self,
        request: &AttestationRequest,
        current_time: SystemTime,
    ) -> Result<CertificateInner> {
        let chain = request
            .document
            .chain_leaf_first()
            .map(parse_der)
            .collect::<anyhow::Result<Vec<_>>>()
            .map_err(|e| AttestationError::bad_format(format!("{e:#}")))?;

        let trust_store = TrustStore::new(current_time, vec![self.root.clone()])
            .map_err(|e| AttestationError::CertChainInvalid(format!("{e:#}")))?;
        let leaf = trust_store
            .verify_chain_leaf(&chain)
            .context("failed to verify attestation certificate chain")
            .map_err(|e| AttestationError::CertChainInvalid(format!("{e:#}")))?;
        debug!(
            "certificate chain verified for {}",
            leaf.cert.tbs_certificate.subject
        );
        Ok(leaf.cert)
    }
}

fn verify_signature(request: &AttestationRequest, leaf: &CertificateInner) -> Result<()> {
    let public_key = subject_public_key(leaf)
        .map_err(|e| AttestationError::SignatureInvalid(format!("{e:#}")))?;
    let message = request.signed_message()?;
    verify_raw_ecdsa_signature(public_key, &message, &request.signature)
        .map_err(|e| AttestationError::SignatureInvalid(format!("{e:#}")))
}
