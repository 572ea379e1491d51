//! Read side: fetches a status-list credential, verifies it, and reads the
//! two-bit status at a given index. Results are cached per URL with a short
//! TTL; concurrent requests for the same URL coalesce behind a per-URL lock
//! so only one upstream fetch happens at a time.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use base64ct::{Base64UrlUnpadded, Encoding};
use bitvec::order::Lsb0;
use bitvec::view::BitView;
use tracing::debug;

use crate::did::DidResolver;
use crate::error::{Error, Result};
use crate::jose;
use crate::model::CredentialStatus;

use super::bitstring::CredentialState;

/// Decodes the status at bit offset `2 * index` from a base64url/gzip
/// encoded bitstring.
///
/// # Errors
///
/// Returns [`Error::StatusIndexOutOfRange`] if the index falls outside the
/// decompressed list, or [`Error::StatusListEncodingFailed`] if the payload
/// does not decode/decompress, or hits the reserved `10` pattern.
pub(crate) fn decode_bit(encoded: &str, index: usize) -> Result<CredentialState> {
    let compressed = Base64UrlUnpadded::decode_vec(encoded)
        .map_err(|e| Error::StatusListEncodingFailed(format!("bad base64url: {e}")))?;
    let mut raw = Vec::new();
    std::io::Read::read_to_end(&mut flate2::read::GzDecoder::new(compressed.as_slice()), &mut raw)
        .map_err(|e| Error::StatusListEncodingFailed(format!("gzip decompression failed: {e}")))?;

    let bits = raw.view_bits::<Lsb0>();
    let offset = 2 * index;
    if offset + 1 >= bits.len() {
        return Err(Error::StatusIndexOutOfRange(format!("index {index} outside decoded list")));
    }
    CredentialState::from_bits(bits[offset], bits[offset + 1])
}

struct CacheEntry {
    state: CredentialState,
    expires_at: Instant,
}

/// Fetches, verifies and caches status-list lookups.
pub struct StatusListClient {
    http: reqwest::blocking::Client,
    ttl: Duration,
    timeout: Duration,
    cache: Mutex<HashMap<String, CacheEntry>>,
    inflight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl StatusListClient {
    /// Builds a client caching lookups for `ttl` and bounding each upstream
    /// fetch by `timeout`.
    #[must_use]
    pub fn new(ttl: Duration, timeout: Duration) -> Self {
        Self {
            http: reqwest::blocking::Client::new(),
            ttl,
            timeout,
            cache: Mutex::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    fn cached(&self, key: &str) -> Option<CredentialState> {
        let cache = self.cache.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        cache.get(key).filter(|e| e.expires_at > Instant::now()).map(|e| e.state)
    }

    /// Resolves the lifecycle state `entry` currently points at.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StatusListFetchFailed`] if the credential cannot be
    /// retrieved, [`Error::StatusListSignatureInvalid`] if its signature
    /// does not verify, or [`Error::StatusIndexOutOfRange`] /
    /// [`Error::StatusListEncodingFailed`] on a malformed payload.
    pub fn check(
        &self,
        entry: &CredentialStatus,
        resolver: &dyn DidResolver,
        skew: Duration,
    ) -> Result<CredentialState> {
        let cache_key = entry.status_list_credential.clone();
        if let Some(state) = self.cached(&cache_key) {
            return Ok(state);
        }

        // Hold a per-URL lock across the fetch so concurrent misses for the
        // same key block behind the first caller instead of each issuing
        // their own upstream request.
        let lock = {
            let mut inflight = self.inflight.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            inflight.entry(cache_key.clone()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
        };
        let _guard = lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        if let Some(state) = self.cached(&cache_key) {
            self.inflight.lock().unwrap_or_else(std::sync::PoisonError::into_inner).remove(&cache_key);
            return Ok(state);
        }

        let result = self.fetch_and_decode(&cache_key, entry, resolver, skew);
        self.inflight.lock().unwrap_or_else(std::sync::PoisonError::into_inner).remove(&cache_key);
        result
    }

    fn fetch_and_decode(
        &self,
        cache_key: &str,
        entry: &CredentialStatus,
        resolver: &dyn DidResolver,
        skew: Duration,
    ) -> Result<CredentialState> {
        let compact = self.fetch(&entry.status_list_credential)?;
        let claims = jose::verify_vc(&compact, resolver, skew)
            .map_err(|e| Error::StatusListSignatureInvalid(e.to_string()))?;

        let encoded_list = claims
            .vc
            .credential_subject
            .as_slice()
            .first()
            .and_then(|s| s.claims.get("encodedList"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                Error::StatusListSignatureInvalid("status list credential missing encodedList".to_string())
            })?;
        let state = decode_bit(encoded_list, entry.status_list_index)?;

        let mut cache = self.cache.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        cache.insert(cache_key.to_string(), CacheEntry { state, expires_at: Instant::now() + self.ttl });
        Ok(state)
    }

    fn fetch(&self, url: &str) -> Result<String> {
        debug!(url, "fetching status list credential");
        let resp = self
            .http
            .get(url)
            .timeout(self.timeout)
            .send()
            .map_err(|e| Error::StatusListFetchFailed(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(Error::StatusListFetchFailed(format!("HTTP {}", resp.status())));
        }
        resp.text().map_err(|e| Error::StatusListFetchFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_bit_rejects_out_of_range_index() {
        let encoded = super::super::bitstring::encode_bitstring(&[CredentialState::Active]).unwrap();
        let err = decode_bit(&encoded, 1_000_000).unwrap_err();
        assert_eq!(err.code(), 62_001);
    }
}
