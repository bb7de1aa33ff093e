use anyhow::anyhow;
use p384::ecdsa::signature::Verifier;
use p384::ecdsa::{Signature, VerifyingKey};

/// Re-encode a raw P-384 signature (`R || S`, each a 48 byte big-endian
/// unsigned integer) as a DER `SEQUENCE { INTEGER r, INTEGER s }`.
///
/// Each integer has its leading zero bytes stripped, and a single zero byte
/// put back when the first remaining byte has its high bit set. Components
/// outside `1..n` are rejected.
pub fn raw_signature_to_der(raw: &[u8]) -> anyhow::Result<Vec<u8>> {
    let signature = Signature::from_slice(raw)
        .map_err(|e| anyhow!("invalid raw P-384 signature ({} bytes): {e}", raw.len()))?;
    Ok(signature.to_der().as_bytes().to_vec())
}

/// Verify a DER encoded ECDSA P-384 signature over `message`, hashed with
/// SHA-384.
pub fn verify_ecdsa_der(
    public_key_sec1: &[u8],
    message: &[u8],
    der_signature: &[u8],
) -> anyhow::Result<()> {
    let key = VerifyingKey::from_sec1_bytes(public_key_sec1)
        .map_err(|e| anyhow!("invalid P-384 public key: {e}"))?;
    let signature = Signature::from_der(der_signature)
        .map_err(|e| anyhow!("invalid P-384 signature encoding: {e}"))?;
    key.verify(message, &signature)
        .map_err(|e| anyhow!("P-384 signature verification failed: {e}"))
}

/// Verify a fixed-width `R || S` signature, going through the DER form.
pub fn verify_raw_ecdsa_signature(
    public_key_sec1: &[u8],
    message: &[u8],
    raw_signature: &[u8],
) -> anyhow::Result<()> {
    let der = raw_signature_to_der(raw_signature)?;
    verify_ecdsa_der(public_key_sec1, message, &der)
}
