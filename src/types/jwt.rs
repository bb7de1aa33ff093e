use base64ct::{Base64UrlUnpadded, Encoding};
use jsonwebtoken::Header;

use crate::error::{AttestationError, Result};

/// A compact JWT that is structurally sound but NOT yet verified.
///
/// Only the header is kept. Claims are handed out by the verification step and
/// never by this type.
#[derive(Debug, Clone)]
pub struct JwtEvidence<'a> {
    pub token: &'a str,
    pub header: Header,
}

impl<'a> JwtEvidence<'a> {
    pub fn parse(token: &'a str) -> Result<Self> {
        let token = token.trim();

        let segments: Vec<&str> = token.split('.').collect();
        let [header, payload, signature] = segments.as_slice() else {
            return Err(AttestationError::bad_format(
                "token must have three dot-separated segments",
            ));
        };
        if signature.is_empty() {
            return Err(AttestationError::bad_format("token is unsigned"));
        }
        let segments = [("header", header), ("payload", payload), ("signature", signature)];
        for (name, segment) in segments {
            Base64UrlUnpadded::decode_vec(segment).map_err(|_| {
                AttestationError::bad_format(format!("token {name} is not base64url"))
            })?;
        }

        let payload = Base64UrlUnpadded::decode_vec(payload)
            .map_err(|_| AttestationError::bad_format("token payload is not base64url"))?;
        serde_json::from_slice::<serde_json::Map<String, serde_json::Value>>(&payload)
            .map_err(|_| AttestationError::bad_format("token payload is not a claims object"))?;

        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| AttestationError::bad_format(format!("invalid token header: {e}")))?;

        Ok(Self { token, header })
    }

    pub fn from_bytes(evidence: &'a [u8]) -> Result<Self> {
        let token = std::str::from_utf8(evidence)
            .map_err(|_| AttestationError::bad_format("token is not UTF-8"))?;
        Self::parse(token)
    }

    pub fn kid(&self) -> Result<&str> {
        self.header
            .kid
            .as_deref()
            .ok_or_else(|| AttestationError::bad_format("token header has no kid"))
    }
}
