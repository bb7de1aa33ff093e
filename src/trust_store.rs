use std::{collections::BTreeMap, time::SystemTime};

use anyhow::bail;
use x509_cert::certificate::CertificateInner;
use x509_verify::VerifyingKey;

use crate::utils::{cert::is_ca, Expireable};

/// TrustStore anchors certificate path validation for Nitro attestation documents.
/// It holds the pinned roots and walks an untrusted chain from its root end down to
/// the leaf, checking validity windows, CA constraints and every issuer signature.
///
/// Revocation is NOT checked. The Nitro PKI publishes CRLs, but evidence
/// verification here stays self-contained and offline. This is an accepted
/// risk, see DESIGN.md.
pub struct TrustStore {
    /// Trusted CAs (Certificate Authorities)
    pub trusted: BTreeMap<String, TrustedIdentity>,
    /// Current time for validity checks
    pub current_time: SystemTime,
}

/// Wrapper for pre-parse trusted identity for verification.
pub struct TrustedIdentity {
    pub cert: CertificateInner,
    pub pk: VerifyingKey,
}

impl TrustStore {
    /// Creates a new trust store with the given root certificates
    ///
    /// # Parameters
    /// * `current_time` - Time reference for validity checks
    /// * `trusted_certs` - Initial set of trusted root certificates
    ///
    /// # Security Considerations
    /// * The provided roots establish the foundation of trust
    /// * Current_time must come from a secure source on production systems
    pub fn new(
        current_time: SystemTime,
        trusted_certs: Vec<CertificateInner>,
    ) -> anyhow::Result<Self> {
        let mut trusted = BTreeMap::new();

        for cert in trusted_certs {
            if !cert.valid_at(current_time) {
                bail!("trusted root certificate is not valid at the verification time");
            }

            let pk = (&cert)
                .try_into()
                .map_err(|e| anyhow::anyhow!("failed to decode key from certificate: {}", e))?;

            trusted.insert(
                cert.tbs_certificate.subject.to_string(),
                TrustedIdentity { cert, pk },
            );
        }

        Ok(Self {
            trusted,
            current_time,
        })
    }

    /// Verify the leaf node in a certificate chain is rooted in the trust store.
    ///
    /// # Parameters
    /// * `chain` - The certificate chain to verify, ordered leaf first.
    ///
    pub fn verify_chain_leaf(&self, chain: &[CertificateInner]) -> anyhow::Result<TrustedIdentity> {
        // If the chain is empty, it is not valid
        if chain.is_empty() {
            bail!("certificate chain is empty");
        }

        // If the chain is expired, it is not valid
        if !chain.valid_at(self.current_time) {
            bail!("certificate chain is expired or not yet valid");
        }

        // Work through the certificate chain from the root (last) certificate.
        let mut chain = chain.iter().rev().peekable();
        let mut intermediary = BTreeMap::new();

        while let Some(cert) = chain.next() {
            let issuer = cert.tbs_certificate.issuer.to_string();
            let subject = cert.tbs_certificate.subject.to_string();

            let signer = self.find_issuer(&issuer, &intermediary)?;

            // Validate issuer signature.
            signer
                .pk
                .verify_strict(cert)
                .map_err(|e| anyhow::anyhow!("failed to verify signature of {subject}: {e}"))?;

            let pk = cert
                .try_into()
                .map_err(|e| anyhow::anyhow!("failed to decode key from certificate: {}", e))?;

            let identity = TrustedIdentity {
                cert: cert.clone(),
                pk,
            };

            if chain.peek().is_none() {
                // If we are at the leaf node of the chain, discard intermediary identities.
                // and return the verified identity.
                return Ok(identity);
            }

            // Anything that signs the next certificate down must be a CA.
            if !is_ca(cert)? {
                bail!("intermediate certificate {subject} is not a CA");
            }
            intermediary.insert(subject, identity);
        }

        bail!("certificate chain is empty")
    }

    /// Find an issuer in the trusted or intermediary stores
    fn find_issuer<'a>(
        &'a self,
        issuer: &str,
        intermediary: &'a BTreeMap<String, TrustedIdentity>,
    ) -> anyhow::Result<&'a TrustedIdentity> {
        if let Some(signer) = self.trusted.get(issuer) {
            return Ok(signer);
        }
        if let Some(signer) = intermediary.get(issuer) {
            return Ok(signer);
        }
        bail!("failed to find trusted issuer {issuer}")
    }
}
