//! # DID Resolver
//!
//! Maps a DID (optionally qualified with a verification-method key
//! fragment) to an ES256 public key. Two implementations are provided: an
//! in-memory registry for tests and trusted peers, and a `did:web` resolver
//! that performs a blocking HTTPS GET and parses the returned DID document.
//! Both can be wrapped in [`CachedResolver`] for TTL-based caching with
//! per-key single-flight coalescing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use base64ct::{Base64UrlUnpadded, Encoding};
use p256::EncodedPoint;
use p256::ecdsa::VerifyingKey;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// An ES256 public key in JWK form, `{"kty":"EC","crv":"P-256","x":
/// "...","y":"..."}`.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct PublicKeyJwk {
    /// Key type. Always `"EC"` for the keys this engine verifies.
    pub kty: String,
    /// Curve name. Always `"P-256"`.
    pub crv: String,
    /// Base64url-encoded (unpadded) x coordinate.
    pub x: String,
    /// Base64url-encoded (unpadded) y coordinate.
    pub y: String,
}

impl PublicKeyJwk {
    /// Builds a JWK from a P-256 verifying key.
    #[must_use]
    pub fn from_verifying_key(key: &VerifyingKey) -> Self {
        let point = key.to_encoded_point(false);
        Self {
            kty: "EC".to_string(),
            crv: "P-256".to_string(),
            x: Base64UrlUnpadded::encode_string(point.x().expect("uncompressed point has x")),
            y: Base64UrlUnpadded::encode_string(point.y().expect("uncompressed point has y")),
        }
    }

    /// Converts this JWK into a verifying key usable by [`crate::jose`].
    ///
    /// # Errors
    ///
    /// Returns an error if the key type/curve is unsupported or the
    /// coordinates do not decode to a valid P-256 point.
    pub fn to_verifying_key(&self) -> Result<VerifyingKey> {
        if self.kty != "EC" || self.crv != "P-256" {
            return Err(Error::DidQueryFailed(format!(
                "unsupported key type/curve: {}/{}",
                self.kty, self.crv
            )));
        }
        let x = Base64UrlUnpadded::decode_vec(&self.x)
            .map_err(|e| Error::DidQueryFailed(format!("bad JWK x coordinate: {e}")))?;
        let y = Base64UrlUnpadded::decode_vec(&self.y)
            .map_err(|e| Error::DidQueryFailed(format!("bad JWK y coordinate: {e}")))?;
        let point = EncodedPoint::from_affine_coordinates(
            x.as_slice().into(),
            y.as_slice().into(),
            false,
        );
        VerifyingKey::from_encoded_point(&point)
            .map_err(|e| Error::DidQueryFailed(format!("invalid P-256 point: {e}")))
    }
}

/// Resolves a DID (optionally with a `kid` key fragment) to a public key.
///
/// Implementations must be cheap to clone (an `Arc`-backed handle) since the
/// orchestrator resolves a key per credential on a worker thread.
pub trait DidResolver: Send + Sync {
    /// Resolve `did`, selecting the verification method matching `kid` when
    /// given, or the first assertion method otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DidQueryFailed`] (verifier side) if the DID cannot
    /// be resolved or contains no usable verification method.
    fn resolve(&self, did: &str, kid: Option<&str>) -> Result<PublicKeyJwk>;
}

/// An in-memory DID registry for tests and trusted peers.
#[derive(Clone, Default)]
pub struct LocalResolver {
    keys: Arc<RwLock<HashMap<String, PublicKeyJwk>>>,
}

impl LocalResolver {
    /// A resolver with no registered keys.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a key for `did`, optionally under a specific `kid`
    /// fragment (`did#kid`). Subsequent `resolve(did, None)` calls return
    /// the most recently registered key with no fragment.
    pub fn register_local_key(&self, did: &str, kid: Option<&str>, jwk: PublicKeyJwk) {
        let key = match kid {
            Some(kid) => format!("{did}#{kid}"),
            None => did.to_string(),
        };
        let mut keys = self.keys.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        keys.insert(key, jwk);
    }
}

impl DidResolver for LocalResolver {
    fn resolve(&self, did: &str, kid: Option<&str>) -> Result<PublicKeyJwk> {
        let keys = self.keys.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(kid) = kid
            && let Some(jwk) = keys.get(&format!("{did}#{kid}"))
        {
            return Ok(jwk.clone());
        }
        keys.get(did)
            .cloned()
            .ok_or_else(|| Error::DidQueryFailed(format!("no local key registered for {did}")))
    }
}

/// Minimal subset of a `did:web` DID document: the verification methods and
/// the assertion-method references into them.
#[derive(Debug, Deserialize)]
struct DidDocument {
    #[serde(rename = "verificationMethod", default)]
    verification_method: Vec<VerificationMethod>,
    #[serde(rename = "assertionMethod", default)]
    assertion_method: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct VerificationMethod {
    id: String,
    #[serde(rename = "publicKeyJwk")]
    public_key_jwk: Option<PublicKeyJwk>,
}

/// Resolves `did:web` identifiers via a blocking HTTPS GET of the DID
/// document, per <https://w3c-ccg.github.io/did-method-web/>.
pub struct HttpResolver {
    client: reqwest::blocking::Client,
    timeout: Duration,
}

impl HttpResolver {
    /// Builds a resolver whose outbound GET carries `timeout` as its
    /// deadline. `spec.md` §5 treats a missing deadline as a configuration
    /// error, so there is no `Default` impl — callers must choose one.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { client: reqwest::blocking::Client::new(), timeout }
    }

    fn document_url(did: &str) -> Result<String> {
        let rest = did
            .strip_prefix("did:web:")
            .ok_or_else(|| Error::DidQueryFailed(format!("unsupported DID method: {did}")))?;
        let mut segments = rest.split(':').map(|s| {
            percent_encoding::percent_decode_str(s).decode_utf8_lossy().into_owned()
        });
        let host = segments.next().ok_or_else(|| {
            Error::DidQueryFailed(format!("did:web identifier missing host: {did}"))
        })?;
        let path_segments: Vec<String> = segments.collect();
        if path_segments.is_empty() {
            Ok(format!("https://{host}/.well-known/did.json"))
        } else {
            Ok(format!("https://{host}/{}/did.json", path_segments.join("/")))
        }
    }
}

impl DidResolver for HttpResolver {
    fn resolve(&self, did: &str, kid: Option<&str>) -> Result<PublicKeyJwk> {
        let url = Self::document_url(did)?;
        debug!(did, %url, "resolving did:web document");

        let resp = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .map_err(|e| Error::DidQueryFailed(format!("fetching DID document: {e}")))?;
        if !resp.status().is_success() {
            return Err(Error::DidQueryFailed(format!(
                "DID document fetch returned {}",
                resp.status()
            )));
        }
        let doc: DidDocument = resp
            .json()
            .map_err(|e| Error::DidQueryFailed(format!("parsing DID document: {e}")))?;

        let wanted_id = kid.map(|k| format!("{did}#{k}"));
        let method = if let Some(wanted) = &wanted_id {
            doc.verification_method.iter().find(|m| &m.id == wanted)
        } else {
            doc.assertion_method
                .first()
                .and_then(|id| doc.verification_method.iter().find(|m| &m.id == id))
                .or_else(|| doc.verification_method.first())
        };

        method
            .and_then(|m| m.public_key_jwk.clone())
            .ok_or_else(|| Error::DidQueryFailed(format!("no verification method for {did}")))
    }
}

struct CacheEntry {
    jwk: PublicKeyJwk,
    expires_at: Instant,
}

/// Wraps a [`DidResolver`] with a TTL cache keyed by `(did, kid)`. Misses
/// for distinct keys never block each other; concurrent misses for the
/// *same* key share one upstream resolution via a per-key lock held only
/// for the duration of the underlying resolve call.
pub struct CachedResolver<R> {
    inner: R,
    ttl: Duration,
    cache: Mutex<HashMap<String, CacheEntry>>,
    inflight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl<R: DidResolver> CachedResolver<R> {
    /// Wraps `inner`, caching successful resolutions for `ttl`.
    #[must_use]
    pub fn new(inner: R, ttl: Duration) -> Self {
        Self { inner, ttl, cache: Mutex::new(HashMap::new()), inflight: Mutex::new(HashMap::new()) }
    }

    fn cache_key(did: &str, kid: Option<&str>) -> String {
        match kid {
            Some(kid) => format!("{did}#{kid}"),
            None => did.to_string(),
        }
    }

    fn cached(&self, key: &str) -> Option<PublicKeyJwk> {
        let cache = self.cache.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        cache.get(key).filter(|e| e.expires_at > Instant::now()).map(|e| e.jwk.clone())
    }
}

impl<R: DidResolver> DidResolver for CachedResolver<R> {
    fn resolve(&self, did: &str, kid: Option<&str>) -> Result<PublicKeyJwk> {
        let key = Self::cache_key(did, kid);
        if let Some(jwk) = self.cached(&key) {
            return Ok(jwk);
        }

        // Held across the upstream resolve call so concurrent misses for
        // the same key queue behind the first caller instead of each
        // issuing their own resolution.
        let lock = {
            let mut inflight = self.inflight.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            inflight.entry(key.clone()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
        };
        let _guard = lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        if let Some(jwk) = self.cached(&key) {
            self.inflight.lock().unwrap_or_else(std::sync::PoisonError::into_inner).remove(&key);
            return Ok(jwk);
        }

        let result = self.inner.resolve(did, kid);
        if let Ok(jwk) = &result {
            let mut cache = self.cache.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            cache.insert(key.clone(), CacheEntry { jwk: jwk.clone(), expires_at: Instant::now() + self.ttl });
        }
        self.inflight.lock().unwrap_or_else(std::sync::PoisonError::into_inner).remove(&key);
        result
    }
}

/// A [`DidResolver`] wrapped in a reference-counted handle, the shape every
/// engine component accepts so a single resolver instance can be shared
/// across worker threads.
pub type SharedResolver = Arc<dyn DidResolver>;

impl DidResolver for SharedResolver {
    fn resolve(&self, did: &str, kid: Option<&str>) -> Result<PublicKeyJwk> {
        warn!("resolving via trait-object indirection");
        (**self).resolve(did, kid)
    }
}
