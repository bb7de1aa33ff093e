use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::anyhow;
use base64ct::{Base64UrlUnpadded, Encoding};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::pkcs8::EncodePrivateKey;
use p256::SecretKey;

use crate::key_cache::KeySetSource;

/// In-memory key set source that counts its fetches.
pub struct StaticKeySetSource {
    document: Option<String>,
    fetches: AtomicUsize,
}

impl StaticKeySetSource {
    pub fn new(document: String) -> Self {
        Self {
            document: Some(document),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            document: None,
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl KeySetSource for StaticKeySetSource {
    fn fetch(&self, url: &str) -> anyhow::Result<String> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.document
            .clone()
            .ok_or_else(|| anyhow!("connection refused: {url}"))
    }
}

/// Ephemeral ES256 token signer publishing its key as a one-entry JWKS.
pub struct TestSigner {
    pub kid: String,
    secret: SecretKey,
}

impl TestSigner {
    pub fn new(kid: &str) -> Self {
        Self {
            kid: kid.to_string(),
            secret: SecretKey::random(&mut rand::rngs::OsRng),
        }
    }

    pub fn jwks(&self) -> String {
        let point = self.secret.public_key().to_encoded_point(false);
        let coordinate = |c: Option<&p256::FieldBytes>| {
            Base64UrlUnpadded::encode_string(c.expect("uncompressed point"))
        };
        serde_json::json!({
            "keys": [{
                "kty": "EC",
                "crv": "P-256",
                "use": "sig",
                "alg": "ES256",
                "kid": self.kid,
                "x": coordinate(point.x()),
                "y": coordinate(point.y()),
            }]
        })
        .to_string()
    }

    pub fn sign(&self, claims: &serde_json::Value) -> String {
        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some(self.kid.clone());
        self.sign_with_header(&header, claims)
    }

    pub fn sign_with_header(&self, header: &Header, claims: &serde_json::Value) -> String {
        let der = self.secret.to_pkcs8_der().unwrap();
        let key = EncodingKey::from_ec_der(der.as_bytes());
        jsonwebtoken::encode(header, claims, &key).unwrap()
    }
}
