use std::str::FromStr;

use anyhow::{bail, Context};
use pem::Pem;
use x509_cert::der::{asn1::ObjectIdentifier, Decode};
use x509_cert::ext::pkix::BasicConstraints;
use x509_cert::Certificate;

const RSA_ENCRYPTION_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");
const EC_PUBLIC_KEY_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");

/// Key family of a certificate's subject public key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFamily {
    Rsa,
    Ec,
}

/// Extract a DER encoded certificate from a PEM encoded one.
pub fn cert_der_from_pem(pem: &str) -> anyhow::Result<Vec<u8>> {
    let pem = Pem::from_str(pem).context("invalid PEM")?;
    if pem.tag() != "CERTIFICATE" {
        bail!("expected a CERTIFICATE PEM block, found {}", pem.tag());
    }
    Ok(pem.into_contents())
}

pub fn parse_der(raw_bytes: &[u8]) -> anyhow::Result<Certificate> {
    Certificate::from_der(raw_bytes).context("invalid DER certificate")
}

/// The raw subject public key: a SEC1 point for EC keys, a PKCS#1
/// `RSAPublicKey` for RSA keys.
pub fn subject_public_key(cert: &Certificate) -> anyhow::Result<&[u8]> {
    cert.tbs_certificate
        .subject_public_key_info
        .subject_public_key
        .as_bytes()
        .context("subject public key has unused bits")
}

pub fn key_family(cert: &Certificate) -> anyhow::Result<KeyFamily> {
    let oid = cert.tbs_certificate.subject_public_key_info.algorithm.oid;
    if oid == RSA_ENCRYPTION_OID {
        Ok(KeyFamily::Rsa)
    } else if oid == EC_PUBLIC_KEY_OID {
        Ok(KeyFamily::Ec)
    } else {
        bail!("unsupported subject public key algorithm {oid}")
    }
}

/// Whether the certificate carries basicConstraints with `cA` set.
pub fn is_ca(cert: &Certificate) -> anyhow::Result<bool> {
    let constraints = cert
        .tbs_certificate
        .get::<BasicConstraints>()
        .context("malformed basicConstraints extension")?;
    Ok(matches!(constraints, Some((_, bc)) if bc.ca))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::AWS_NITRO_ROOT_CERT_PEM;

    #[test]
    fn parses_embedded_nitro_root() {
        let der = cert_der_from_pem(AWS_NITRO_ROOT_CERT_PEM).unwrap();
        let cert = parse_der(&der).unwrap();

        assert!(is_ca(&cert).unwrap());
        assert_eq!(key_family(&cert).unwrap(), KeyFamily::Ec);
        // uncompressed P-384 point
        let key = subject_public_key(&cert).unwrap();
        assert_eq!(key.len(), 97);
        assert_eq!(key[0], 0x04);
        assert_eq!(
            cert.tbs_certificate.subject.to_string(),
            cert.tbs_certificate.issuer.to_string()
        );
    }

    #[test]
    fn rejects_non_certificate_pem() {
        let pem = "-----BEGIN PUBLIC KEY-----\nAAAA\n-----END PUBLIC KEY-----\n";
        assert!(cert_der_from_pem(pem).is_err());
        assert!(parse_der(b"not a certificate").is_err());
    }
}
