use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::Validation;
use log::debug;
use serde_json::Value;

use crate::constants::JWT_LEEWAY_SECS;
use crate::error::{AttestationError, Result};
use crate::key_cache::PublicKeyCache;
use crate::types::jwt::JwtEvidence;

/// Expected identity of a token.
pub(crate) struct TokenExpectations<'a> {
    /// Where the issuer publishes its signing keys.
    pub keys_url: &'a str,
    pub issuer: &'a str,
    /// `None` skips the audience check.
    pub audience: Option<&'a str>,
}

/// Verify signature, issuer, audience and lifetime of `token`, returning its
/// claims. Nothing may read the claims of a token that did not pass here.
pub(crate) fn verify_token(
    keys: &PublicKeyCache,
    token: &JwtEvidence<'_>,
    expected: &TokenExpectations<'_>,
    current_time: SystemTime,
) -> Result<Value> {
    let kid = token.kid()?;
    let key = keys.resolve(expected.keys_url, kid, current_time)?;

    let mut validation = Validation::new(token.header.alg);
    validation.algorithms = key.algorithms.clone();
    validation.leeway = JWT_LEEWAY_SECS;
    validation.set_issuer(&[expected.issuer]);
    match expected.audience {
        Some(audience) => {
            validation.set_audience(&[audience]);
            validation.set_required_spec_claims(&["exp", "iss", "aud"]);
        }
        None => {
            validation.validate_aud = false;
            validation.set_required_spec_claims(&["exp", "iss"]);
        }
    }
    // Lifetime is checked below against the caller's clock.
    validation.validate_exp = false;
    validation.validate_nbf = false;

    let claims = jsonwebtoken::decode::<Value>(token.token, &key.key, &validation)?.claims;
    check_lifetime(&claims, current_time)?;

    debug!("verified token from {} signed by key {kid}", expected.issuer);
    Ok(claims)
}

fn check_lifetime(claims: &Value, current_time: SystemTime) -> Result<()> {
    let now = current_time
        .duration_since(UNIX_EPOCH)
        .map_err(|_| AttestationError::bad_format("verification time is before the epoch"))?
        .as_secs();

    let exp = numeric_date(claims, "exp")?
        .ok_or_else(|| AttestationError::bad_format("token has no exp claim"))?;
    if exp.saturating_add(JWT_LEEWAY_SECS) < now {
        return Err(AttestationError::TokenExpired);
    }

    if let Some(nbf) = numeric_date(claims, "nbf")? {
        if nbf > now.saturating_add(JWT_LEEWAY_SECS) {
            return Err(AttestationError::TokenNotYetValid);
        }
    }
    Ok(())
}

fn numeric_date(claims: &Value, name: &str) -> Result<Option<u64>> {
    match claims.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_u64()
            // NumericDate may carry a fraction
            .or_else(|| value.as_f64().filter(|v| *v >= 0.0).map(|v| v as u64))
            .map(Some)
            .ok_or_else(|| AttestationError::bad_format(format!("{name} is not a NumericDate"))),
    }
}
