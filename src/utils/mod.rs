use std::time::SystemTime;

use x509_cert::certificate::CertificateInner;

pub mod cert;
pub mod crypto;
pub mod hash;

pub trait Expireable {
    fn valid_at(&self, timestamp: SystemTime) -> bool;
}

impl Expireable for CertificateInner {
    /// Validate a single certificate not_before/not_after
    fn valid_at(&self, timestamp: SystemTime) -> bool {
        let nb = self.tbs_certificate.validity.not_before.to_system_time();
        let na = self.tbs_certificate.validity.not_after.to_system_time();
        !(timestamp < nb || na < timestamp)
    }
}

impl Expireable for &[CertificateInner] {
    fn valid_at(&self, timestamp: SystemTime) -> bool {
        self.iter().all(|cert| cert.valid_at(timestamp))
    }
}

impl Expireable for Vec<CertificateInner> {
    fn valid_at(&self, timestamp: SystemTime) -> bool {
        self.as_slice().valid_at(timestamp)
    }
}
