use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, SystemTime};

use anyhow::{anyhow, bail, Context};
use base64ct::{Base64, Encoding};
use jsonwebtoken::jwk::{AlgorithmParameters, Jwk};
use jsonwebtoken::{Algorithm, DecodingKey};
use log::{debug, warn};
use serde::Deserialize;

use crate::config::KeyCacheConfig;
use crate::constants::{KEY_CACHE_TTL_SECS, KEY_REFETCH_MIN_INTERVAL_SECS};
use crate::error::{AttestationError, Result};
use crate::utils::cert::{key_family, parse_der, subject_public_key, KeyFamily};

const RSA_ALGORITHMS: &[Algorithm] = &[
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
];
const EC_ALGORITHMS: &[Algorithm] = &[Algorithm::ES256, Algorithm::ES384];

/// Where signer key sets come from. The only network seam of the crate.
pub trait KeySetSource: Send + Sync {
    /// Fetch the key set document published at `url`.
    fn fetch(&self, url: &str) -> anyhow::Result<String>;
}

/// Fetches key sets over HTTPS. Timeouts are whatever the client was built
/// with; there is no retry.
pub struct HttpKeySetSource {
    client: reqwest::blocking::Client,
}

impl HttpKeySetSource {
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::blocking::Client) -> Self {
        Self { client }
    }
}

impl KeySetSource for HttpKeySetSource {
    fn fetch(&self, url: &str) -> anyhow::Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .with_context(|| format!("error connecting to {url}"))?
            .error_for_status()
            .with_context(|| format!("key set request to {url} failed"))?;
        response.text().context("error reading key set body")
    }
}

/// A public key together with the JWS algorithms its key family admits.
#[derive(Clone)]
pub struct VerificationKey {
    pub key: DecodingKey,
    pub algorithms: Vec<Algorithm>,
}

impl fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationKey")
            .field("algorithms", &self.algorithms)
            .finish_non_exhaustive()
    }
}

struct CachedKeySet {
    keys: HashMap<String, VerificationKey>,
    fetched_at: SystemTime,
}

/// Process-wide cache of signer key sets, keyed by the URL they were fetched
/// from. Entries are only ever replaced whole, so readers see either the old
/// or the new set. Fetch failures are not cached.
pub struct PublicKeyCache {
    source: Arc<dyn KeySetSource>,
    ttl: Duration,
    min_refetch_interval: Duration,
    entries: RwLock<HashMap<String, Arc<CachedKeySet>>>,
}

impl PublicKeyCache {
    pub fn new(source: Arc<dyn KeySetSource>) -> Self {
        Self::with_ttl(source, Duration::from_secs(KEY_CACHE_TTL_SECS))
    }

    pub fn with_ttl(source: Arc<dyn KeySetSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            min_refetch_interval: Duration::from_secs(KEY_REFETCH_MIN_INTERVAL_SECS),
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_config(source: Arc<dyn KeySetSource>, config: &KeyCacheConfig) -> Self {
        Self {
            min_refetch_interval: config.min_refetch_interval(),
            ..Self::with_ttl(source, config.ttl())
        }
    }

    /// Cache backed by [`HttpKeySetSource`] with default client settings.
    pub fn http(config: &KeyCacheConfig) -> anyhow::Result<Self> {
        Ok(Self::with_config(Arc::new(HttpKeySetSource::new()?), config))
    }

    /// Resolve the key `kid` published at `url`. A stale entry triggers one
    /// refetch. So does a missing kid, but only once the cached set is older
    /// than the minimum refetch interval: kids come from unverified token
    /// headers and must not drive outbound requests.
    pub fn resolve(
        &self,
        url: &str,
        kid: &str,
        current_time: SystemTime,
    ) -> Result<VerificationKey> {
        if let Some((entry, age)) = self.fresh_entry(url, current_time) {
            if let Some(key) = entry.keys.get(kid) {
                return Ok(key.clone());
            }
            if age < self.min_refetch_interval {
                debug!("kid {kid} is not in the key set of {url} fetched {age:?} ago");
                return Err(unknown_kid(url, kid));
            }
            debug!("kid {kid} is not in the cached key set of {url}, refreshing");
        }

        let entry = self.refresh(url, current_time)?;
        entry
            .keys
            .get(kid)
            .cloned()
            .ok_or_else(|| unknown_kid(url, kid))
    }

    fn fresh_entry(
        &self,
        url: &str,
        current_time: SystemTime,
    ) -> Option<(Arc<CachedKeySet>, Duration)> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let entry = entries.get(url)?;
        // An error here means the clock went backwards: treat as stale.
        match current_time.duration_since(entry.fetched_at) {
            Ok(age) if age < self.ttl => Some((Arc::clone(entry), age)),
            _ => None,
        }
    }

    fn refresh(&self, url: &str, current_time: SystemTime) -> Result<Arc<CachedKeySet>> {
        let keys = self
            .source
            .fetch(url)
            .and_then(|document| parse_key_set(&document))
            .map_err(|e| {
                warn!("failed to fetch key set from {url}: {e:#}");
                AttestationError::KeyFetchError(format!("{url}: {e:#}"))
            })?;
        if keys.is_empty() {
            warn!("key set at {url} has no usable keys");
            return Err(AttestationError::KeyFetchError(format!(
                "{url} publishes no usable keys"
            )));
        }
        debug!("fetched {} signing keys from {url}", keys.len());

        let entry = Arc::new(CachedKeySet {
            keys,
            fetched_at: current_time,
        });
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.to_string(), Arc::clone(&entry));
        Ok(entry)
    }
}

fn unknown_kid(url: &str, kid: &str) -> AttestationError {
    AttestationError::KeyFetchError(format!("{url} publishes no key with id {kid}"))
}

#[derive(Deserialize)]
struct KeySetDocument {
    keys: Vec<serde_json::Value>,
}

/// Parse a JWKS document into `kid -> key`. Keys that cannot be used are
/// skipped.
pub fn parse_key_set(document: &str) -> anyhow::Result<HashMap<String, VerificationKey>> {
    let document: KeySetDocument =
        serde_json::from_str(document).context("key set is not a JWKS document")?;

    let mut keys = HashMap::new();
    for raw in document.keys {
        match parse_key(raw) {
            Ok((kid, key)) => {
                keys.insert(kid, key);
            }
            Err(e) => warn!("skipping unusable signing key: {e:#}"),
        }
    }
    Ok(keys)
}

// MAA lists its signers as self-signed certificates in `x5c`, Google as bare
// RSA JWKs. The certificate is only a key carrier: trust comes from fetching
// the set over TLS from the configured endpoint.
fn parse_key(raw: serde_json::Value) -> anyhow::Result<(String, VerificationKey)> {
    let kid = raw
        .get("kid")
        .and_then(serde_json::Value::as_str)
        .context("key has no kid")?
        .to_string();

    if let Some(chain) = raw.get("x5c").and_then(serde_json::Value::as_array) {
        let leaf = chain
            .first()
            .and_then(serde_json::Value::as_str)
            .with_context(|| format!("key {kid} has an empty x5c"))?;
        let der = Base64::decode_vec(leaf)
            .map_err(|e| anyhow!("key {kid}: x5c is not base64: {e}"))?;
        let cert = parse_der(&der).with_context(|| format!("key {kid}"))?;
        let public_key = subject_public_key(&cert)?;
        let key = match key_family(&cert)? {
            KeyFamily::Rsa => VerificationKey {
                key: DecodingKey::from_rsa_der(public_key),
                algorithms: RSA_ALGORITHMS.to_vec(),
            },
            KeyFamily::Ec => VerificationKey {
                key: DecodingKey::from_ec_der(public_key),
                algorithms: EC_ALGORITHMS.to_vec(),
            },
        };
        return Ok((kid, key));
    }

    let jwk: Jwk = serde_json::from_value(raw).with_context(|| format!("key {kid} is not a JWK"))?;
    let algorithms = match &jwk.algorithm {
        AlgorithmParameters::RSA(_) => RSA_ALGORITHMS,
        AlgorithmParameters::EllipticCurve(_) => EC_ALGORITHMS,
        _ => bail!("key {kid} has an unsupported key type"),
    };
    let key = DecodingKey::from_jwk(&jwk).with_context(|| format!("key {kid} is unusable"))?;
    Ok((
        kid,
        VerificationKey {
            key,
            algorithms: algorithms.to_vec(),
        },
    ))
}
