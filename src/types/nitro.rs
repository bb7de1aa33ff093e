use std::collections::BTreeMap;

use base64ct::{Base64, Encoding};
use chrono::{DateTime, Utc};
use ciborium::value::{Integer, Value};

use crate::constants::{
    COSE_ALG_ES384, COSE_SIGN1_TAG, COSE_SIGNATURE1_CONTEXT, NITRO_DIGEST_SHA384,
    NITRO_MAX_CERT_CHAIN_LEN, NITRO_MAX_CERT_LEN, NITRO_MAX_NONCE_LEN, NITRO_MAX_PCRS,
    NITRO_MAX_PUBLIC_KEY_LEN, NITRO_MAX_USER_DATA_LEN, P384_FIELD_LEN,
};
use crate::error::{AttestationError, Result};

// https://github.com/aws/aws-nitro-enclaves-nsm-api/blob/main/docs/attestation_process.md

// high level evidence structure (COSE_Sign1, optionally wrapped in CBOR tag 18)
// [protected header: bstr] [unprotected header: map] [payload: bstr] [signature: bstr(96)]

/// The outer signed envelope of a Nitro attestation.
///
/// `payload` keeps the exact bytes that came over the wire: the signed message
/// is rebuilt from them, never from a re-serialized [`AttestationDocument`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestationRequest {
    pub protected_header: Vec<u8>,
    pub payload: Vec<u8>,
    pub document: AttestationDocument,
    /// Raw `R || S`, 48 bytes each.
    pub signature: Vec<u8>,
}

/// Attestation document produced by the Nitro Secure Module. Nothing in here
/// is trustworthy until the envelope signature and certificate chain verify.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestationDocument {
    /// Issuing NSM ID
    pub module_id: String,
    /// Digest function used for calculating the register values
    pub digest: String,
    /// UTC time when the document was created, in milliseconds since the epoch
    pub timestamp_ms: u64,
    /// Platform configuration registers by index
    pub pcrs: BTreeMap<u16, Vec<u8>>,
    /// DER encoded leaf certificate whose key signed the envelope
    pub certificate: Vec<u8>,
    /// DER encoded issuing chain, root first
    pub cabundle: Vec<Vec<u8>>,
    pub public_key: Option<Vec<u8>>,
    pub user_data: Option<Vec<u8>>,
    pub nonce: Option<Vec<u8>>,
}

impl AttestationRequest {
    /// Decode evidence that is either raw CBOR or base64 text of it.
    pub fn decode(evidence: &[u8]) -> Result<Self> {
        match evidence.first() {
            // definite-length array of 4, or the COSE_Sign1 tag
            Some(0x84) | Some(0xd2) => Self::from_cbor(evidence),
            Some(_) => {
                const NEITHER: &str = "evidence is neither CBOR nor base64";
                let text = std::str::from_utf8(evidence)
                    .map_err(|_| AttestationError::bad_format(NEITHER))?;
                let raw = Base64::decode_vec(text.trim())
                    .map_err(|_| AttestationError::bad_format(NEITHER))?;
                Self::from_cbor(&raw)
            }
            None => Err(AttestationError::bad_format("empty evidence")),
        }
    }

    pub fn from_cbor(bytes: &[u8]) -> Result<Self> {
        let value: Value = ciborium::de::from_reader(bytes)
            .map_err(|e| AttestationError::bad_format(format!("invalid CBOR: {e}")))?;

        let value = match value {
            Value::Tag(COSE_SIGN1_TAG, inner) => *inner,
            Value::Tag(tag, _) => {
                return Err(AttestationError::bad_format(format!(
                    "unexpected CBOR tag {tag}"
                )))
            }
            other => other,
        };

        let items = match value {
            Value::Array(items) if items.len() == 4 => items,
            _ => return Err(AttestationError::bad_format("COSE_Sign1 must be a 4-element array")),
        };
        let [protected, _unprotected, payload, signature]: [Value; 4] = items
            .try_into()
            .map_err(|_| AttestationError::bad_format("COSE_Sign1 must be a 4-element array"))?;

        let protected_header = into_bytes(protected, "protected header")?;
        let payload = into_bytes(payload, "payload")?;
        let signature = into_bytes(signature, "signature")?;

        check_protected_header(&protected_header)?;
        if signature.len() != 2 * P384_FIELD_LEN {
            return Err(AttestationError::bad_format(format!(
                "signature must be {} bytes, got {}",
                2 * P384_FIELD_LEN,
                signature.len()
            )));
        }

        let document = AttestationDocument::from_cbor(&payload)?;

        Ok(Self {
            protected_header,
            payload,
            document,
            signature,
        })
    }

    /// The COSE `Sig_structure` the signature commits to:
    /// `["Signature1", protected, b"", payload]`.
    pub fn signed_message(&self) -> Result<Vec<u8>> {
        let value = Value::Array(vec![
            Value::Text(COSE_SIGNATURE1_CONTEXT.to_string()),
            Value::Bytes(self.protected_header.clone()),
            Value::Bytes(vec![]),
            Value::Bytes(self.payload.clone()),
        ]);
        // 17 for extra metadata bytes
        let mut bytes = Vec::with_capacity(self.protected_header.len() + self.payload.len() + 17);
        ciborium::ser::into_writer(&value, &mut bytes).map_err(|e| {
            AttestationError::bad_format(format!("cannot encode signed message: {e}"))
        })?;
        Ok(bytes)
    }
}

impl AttestationDocument {
    pub fn from_cbor(payload: &[u8]) -> Result<Self> {
        let value: Value = ciborium::de::from_reader(payload)
            .map_err(|e| AttestationError::bad_format(format!("cannot parse payload CBOR: {e}")))?;

        let entries = match value {
            Value::Map(entries) => entries,
            _ => return Err(AttestationError::bad_format("payload must be a map")),
        };

        let mut fields = BTreeMap::new();
        for (key, value) in entries {
            let key = match key {
                Value::Text(key) => key,
                _ => return Err(AttestationError::bad_format("payload keys must be text")),
            };
            if fields.insert(key.clone(), value).is_some() {
                return Err(AttestationError::bad_format(format!("duplicate field {key}")));
            }
        }

        let module_id = match take(&mut fields, "module_id")? {
            Value::Text(s) => s,
            _ => return Err(wrong_type("module_id")),
        };
        let digest = match take(&mut fields, "digest")? {
            Value::Text(s) => s,
            _ => return Err(wrong_type("digest")),
        };
        let timestamp_ms = match take(&mut fields, "timestamp")? {
            Value::Integer(i) => u64::try_from(i).map_err(|_| wrong_type("timestamp"))?,
            _ => return Err(wrong_type("timestamp")),
        };
        let pcrs = match take(&mut fields, "pcrs")? {
            Value::Map(pairs) => decode_pcrs(pairs)?,
            _ => return Err(wrong_type("pcrs")),
        };
        let certificate = into_bytes(take(&mut fields, "certificate")?, "certificate")?;
        let cabundle = match take(&mut fields, "cabundle")? {
            Value::Array(certs) => certs
                .into_iter()
                .map(|cert| into_bytes(cert, "cabundle entry"))
                .collect::<Result<Vec<_>>>()?,
            _ => return Err(wrong_type("cabundle")),
        };

        let doc = Self {
            module_id,
            digest,
            timestamp_ms,
            pcrs,
            certificate,
            cabundle,
            public_key: optional_bytes(fields.remove("public_key"), "public_key")?,
            user_data: optional_bytes(fields.remove("user_data"), "user_data")?,
            nonce: optional_bytes(fields.remove("nonce"), "nonce")?,
        };
        doc.validate_syntax()?;
        Ok(doc)
    }

    /// Field constraints from the NSM attestation document specification.
    fn validate_syntax(&self) -> Result<()> {
        if self.module_id.is_empty() {
            return Err(AttestationError::bad_format("module_id is empty"));
        }
        if self.digest != NITRO_DIGEST_SHA384 {
            return Err(AttestationError::bad_format(format!(
                "unsupported digest {}",
                self.digest
            )));
        }
        if self.timestamp_ms == 0 {
            return Err(AttestationError::bad_format("timestamp is zero"));
        }
        if self.pcrs.is_empty() || self.pcrs.len() > NITRO_MAX_PCRS {
            return Err(AttestationError::bad_format("invalid number of PCRs"));
        }
        for (index, value) in &self.pcrs {
            if usize::from(*index) >= NITRO_MAX_PCRS || ![32, 48, 64].contains(&value.len()) {
                return Err(AttestationError::bad_format(format!("invalid PCR{index}")));
            }
        }
        if !(1..=NITRO_MAX_CERT_LEN).contains(&self.certificate.len()) {
            return Err(AttestationError::bad_format("invalid certificate length"));
        }
        if self.cabundle.is_empty() || self.cabundle.len() > NITRO_MAX_CERT_CHAIN_LEN {
            return Err(AttestationError::bad_format("invalid cabundle length"));
        }
        if self
            .cabundle
            .iter()
            .any(|cert| !(1..=NITRO_MAX_CERT_LEN).contains(&cert.len()))
        {
            return Err(AttestationError::bad_format("invalid cabundle entry length"));
        }
        if let Some(key) = &self.public_key {
            if !(1..=NITRO_MAX_PUBLIC_KEY_LEN).contains(&key.len()) {
                return Err(AttestationError::bad_format("invalid public_key length"));
            }
        }
        if self.user_data.as_ref().is_some_and(|d| d.len() > NITRO_MAX_USER_DATA_LEN) {
            return Err(AttestationError::bad_format("user_data too long"));
        }
        if self.nonce.as_ref().is_some_and(|n| n.len() > NITRO_MAX_NONCE_LEN) {
            return Err(AttestationError::bad_format("nonce too long"));
        }
        Ok(())
    }

    pub fn pcr(&self, index: u16) -> Option<&[u8]> {
        self.pcrs.get(&index).map(Vec::as_slice)
    }

    /// The certificate chain ordered leaf first, root last.
    pub fn chain_leaf_first(&self) -> impl Iterator<Item = &[u8]> {
        std::iter::once(self.certificate.as_slice())
            .chain(self.cabundle.iter().rev().map(Vec::as_slice))
    }

    /// Claims worth keeping for audit.
    pub fn audit_claims(&self) -> serde_json::Value {
        let timestamp = i64::try_from(self.timestamp_ms)
            .ok()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .map(|t| t.to_rfc3339());
        let pcrs: BTreeMap<String, String> = self
            .pcrs
            .iter()
            .map(|(index, value)| (index.to_string(), hex::encode(value)))
            .collect();

        serde_json::json!({
            "module_id": self.module_id,
            "digest": self.digest,
            "timestamp": timestamp,
            "pcrs": pcrs,
            "public_key": self.public_key.as_deref().map(Base64::encode_string),
            "user_data": self.user_data.as_deref().map(Base64::encode_string),
            "nonce": self.nonce.as_deref().map(Base64::encode_string),
        })
    }
}

// Check protected header: https://docs.aws.amazon.com/enclaves/latest/user/verify-root.html#COSE-CBOR
// {1: -35} is {algorithm: ECDSA w/ SHA-384}
fn check_protected_header(bytes: &[u8]) -> Result<()> {
    let value: Value = ciborium::de::from_reader(bytes)
        .map_err(|e| AttestationError::bad_format(format!("invalid protected header: {e}")))?;
    match value {
        Value::Map(entries) => match entries.as_slice() {
            [(Value::Integer(key), Value::Integer(alg))]
                if *key == Integer::from(1) && *alg == Integer::from(COSE_ALG_ES384) =>
            {
                Ok(())
            }
            _ => Err(AttestationError::bad_format(
                "protected header must declare ES384 only",
            )),
        },
        _ => Err(AttestationError::bad_format("protected header must be a map")),
    }
}

fn decode_pcrs(pairs: Vec<(Value, Value)>) -> Result<BTreeMap<u16, Vec<u8>>> {
    let mut pcrs = BTreeMap::new();
    for (index, value) in pairs {
        let index = match index {
            Value::Integer(i) => u16::try_from(i).map_err(|_| wrong_type("pcrs index"))?,
            _ => return Err(wrong_type("pcrs index")),
        };
        let value = into_bytes(value, "pcrs value")?;
        if pcrs.insert(index, value).is_some() {
            return Err(AttestationError::bad_format(format!("duplicate PCR{index}")));
        }
    }
    Ok(pcrs)
}

fn take(fields: &mut BTreeMap<String, Value>, name: &str) -> Result<Value> {
    fields
        .remove(name)
        .ok_or_else(|| AttestationError::bad_format(format!("missing field {name}")))
}

fn into_bytes(value: Value, name: &str) -> Result<Vec<u8>> {
    match value {
        Value::Bytes(bytes) => Ok(bytes),
        _ => Err(wrong_type(name)),
    }
}

fn optional_bytes(value: Option<Value>, name: &str) -> Result<Option<Vec<u8>>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bytes(bytes)) => Ok(Some(bytes)),
        Some(_) => Err(wrong_type(name)),
    }
}

fn wrong_type(name: &str) -> AttestationError {
    AttestationError::bad_format(format!("field {name} has the wrong type"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    const FIXTURE: &str = include_str!("../../data/nitro_attestation.b64");

    fn fixture_bytes() -> Vec<u8> {
        Base64::decode_vec(FIXTURE.trim()).unwrap()
    }

    fn encode(value: &Value) -> Vec<u8> {
        let mut out = Vec::new();
        ciborium::ser::into_writer(value, &mut out).unwrap();
        out
    }

    #[test]
    fn decodes_fixture_from_base64_and_raw() {
        let from_text = AttestationRequest::decode(FIXTURE.as_bytes()).unwrap();
        let from_raw = AttestationRequest::decode(&fixture_bytes()).unwrap();
        assert_eq!(from_text, from_raw);

        let doc = &from_raw.document;
        assert_eq!(doc.module_id, "i-059e862454f4a8d8f-enc0190a2f1964172e6");
        assert_eq!(doc.digest, "SHA384");
        assert_eq!(doc.timestamp_ms, 1_721_159_587_239);
        assert_eq!(doc.pcrs.len(), 16);
        assert_eq!(doc.pcr(0).map(<[u8]>::len), Some(48));
        assert_eq!(doc.cabundle.len(), 4);
        assert_eq!(doc.user_data.as_ref().map(Vec::len), Some(32));
        assert!(doc.public_key.is_some());
        assert!(doc.nonce.is_none());
        assert_eq!(from_raw.signature.len(), 96);
    }

    #[test]
    fn signed_message_uses_original_payload_bytes() {
        let request = AttestationRequest::decode(&fixture_bytes()).unwrap();
        let message = request.signed_message().unwrap();

        let decoded: Value = ciborium::de::from_reader(message.as_slice()).unwrap();
        let items = decoded.as_array().unwrap();
        assert_eq!(items[0], Value::Text("Signature1".into()));
        assert_eq!(items[1], Value::Bytes(request.protected_header.clone()));
        assert_eq!(items[2], Value::Bytes(vec![]));
        assert_eq!(items[3], Value::Bytes(request.payload.clone()));
    }

    #[test]
    fn accepts_tagged_envelope() {
        let raw = fixture_bytes();
        let value: Value = ciborium::de::from_reader(raw.as_slice()).unwrap();
        let tagged = encode(&Value::Tag(18, Box::new(value.clone())));
        assert_eq!(
            AttestationRequest::decode(&tagged).unwrap(),
            AttestationRequest::decode(&raw).unwrap()
        );

        let wrong_tag = encode(&Value::Tag(17, Box::new(value)));
        assert_eq!(
            AttestationRequest::from_cbor(&wrong_tag).unwrap_err().kind(),
            ErrorKind::BadFormat
        );
    }

    #[test]
    fn rejects_malformed_envelopes() {
        let three = encode(&Value::Array(vec![
            Value::Bytes(vec![]),
            Value::Map(vec![]),
            Value::Bytes(vec![]),
        ]));
        for evidence in [
            &b""[..],
            &b"\x84"[..],
            &b"!!not base64!!"[..],
            three.as_slice(),
        ] {
            assert_eq!(
                AttestationRequest::decode(evidence).unwrap_err().kind(),
                ErrorKind::BadFormat
            );
        }
    }

    #[test]
    fn missing_or_mistyped_required_field_is_bad_format() {
        let raw = fixture_bytes();
        let request = AttestationRequest::decode(&raw).unwrap();
        let payload: Value = ciborium::de::from_reader(request.payload.as_slice()).unwrap();
        let entries = payload.as_map().unwrap().clone();

        for name in ["module_id", "digest", "timestamp", "pcrs", "certificate", "cabundle"] {
            let without: Vec<_> = entries
                .iter()
                .filter(|(k, _)| k.as_text() != Some(name))
                .cloned()
                .collect();
            let err = AttestationDocument::from_cbor(&encode(&Value::Map(without))).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::BadFormat, "{name}");

            let mistyped: Vec<_> = entries
                .iter()
                .map(|(k, v)| {
                    if k.as_text() == Some(name) {
                        (k.clone(), Value::Bool(true))
                    } else {
                        (k.clone(), v.clone())
                    }
                })
                .collect();
            let err = AttestationDocument::from_cbor(&encode(&Value::Map(mistyped))).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::BadFormat, "{name}");
        }
    }

    #[test]
    fn optional_fields_may_be_absent() {
        let raw = fixture_bytes();
        let request = AttestationRequest::decode(&raw).unwrap();
        let payload: Value = ciborium::de::from_reader(request.payload.as_slice()).unwrap();
        let trimmed: Vec<_> = payload
            .as_map()
            .unwrap()
            .iter()
            .filter(|(k, _)| !matches!(k.as_text(), Some("public_key" | "user_data" | "nonce")))
            .cloned()
            .collect();

        let doc = AttestationDocument::from_cbor(&encode(&Value::Map(trimmed))).unwrap();
        assert!(doc.public_key.is_none());
        assert!(doc.user_data.is_none());
        assert!(doc.nonce.is_none());
    }

    #[test]
    fn rejects_foreign_protected_header() {
        // {1: -7} is ES256
        let algorithm = |alg: i64| {
            encode(&Value::Map(vec![(
                Value::Integer(1.into()),
                Value::Integer(alg.into()),
            )]))
        };
        assert!(check_protected_header(&algorithm(-7)).is_err());
        assert!(check_protected_header(&algorithm(-35)).is_ok());
    }

    #[test]
    fn audit_claims_render_timestamp_and_pcrs() {
        let request = AttestationRequest::decode(&fixture_bytes()).unwrap();
        let claims = request.document.audit_claims();
        assert_eq!(claims["timestamp"], "2024-07-16T19:53:07.239+00:00");
        assert_eq!(claims["pcrs"]["5"], "0".repeat(96));
        assert!(claims["nonce"].is_null());
    }
}
