//! # JWS Envelope (ES256)
//!
//! Compact JWS signing and verification for [`crate::model::VcClaims`] and
//! [`crate::model::VpClaims`]. Only `ES256` (P-256 / SHA-256) is supported,
//! per `spec.md`'s Non-goals on other JOSE algorithms.

use std::time::Duration;

use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Utc};
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::did::DidResolver;
use crate::error::{Error, Result};
use crate::model::{VcClaims, VpClaims};

/// The JWS protected header this engine emits and accepts. Any other `alg`
/// is rejected before the signature is even checked.
#[derive(Clone, Debug, Deserialize, Serialize)]
struct JwsHeader {
    alg: String,
    typ: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    kid: Option<String>,
}

/// Signs `claims` as a compact JWS using `signing_key`, with `kid` carried
/// in the protected header so the holder/verifier can look up the matching
/// verification method.
///
/// # Errors
///
/// Returns [`Error::IssuerSigningFailed`] if claims serialization fails
/// (the signature step itself, over `p256`, cannot fail).
pub fn encode<T: Serialize>(claims: &T, signing_key: &SigningKey, kid: &str) -> Result<String> {
    let header = JwsHeader { alg: "ES256".to_string(), typ: "JWT".to_string(), kid: Some(kid.to_string()) };
    let header_json = serde_json::to_vec(&header)
        .map_err(|e| Error::IssuerSigningFailed(format!("encoding header: {e}")))?;
    let claims_json = serde_json::to_vec(claims)
        .map_err(|e| Error::IssuerSigningFailed(format!("encoding claims: {e}")))?;

    let signing_input =
        format!("{}.{}", Base64UrlUnpadded::encode_string(&header_json), Base64UrlUnpadded::encode_string(&claims_json));
    let signature: Signature = signing_key.sign(signing_input.as_bytes());

    Ok(format!("{signing_input}.{}", Base64UrlUnpadded::encode_string(&signature.to_bytes())))
}

/// The three base64url parts of a compact JWS, parsed but not yet verified.
struct Parts<'a> {
    header: JwsHeader,
    claims_b64: &'a str,
    signing_input: String,
    signature: Signature,
}

fn split(compact: &str) -> Result<Parts<'_>> {
    let mut segments = compact.split('.');
    let (Some(header_b64), Some(claims_b64), Some(sig_b64), None) =
        (segments.next(), segments.next(), segments.next(), segments.next())
    else {
        return Err(Error::UnrecognisedPresentationFormat(
            "expected a three-segment compact JWS".to_string(),
        ));
    };

    let header_json = Base64UrlUnpadded::decode_vec(header_b64)
        .map_err(|e| Error::UnrecognisedPresentationFormat(format!("bad JWS header: {e}")))?;
    let header: JwsHeader = serde_json::from_slice(&header_json)
        .map_err(|e| Error::UnrecognisedPresentationFormat(format!("bad JWS header: {e}")))?;
    if header.alg != "ES256" {
        return Err(Error::VpProofError(format!("unsupported JWS alg: {}", header.alg)));
    }

    let sig_bytes = Base64UrlUnpadded::decode_vec(sig_b64)
        .map_err(|e| Error::VpProofError(format!("bad JWS signature encoding: {e}")))?;
    let signature = Signature::from_slice(&sig_bytes)
        .map_err(|e| Error::VpProofError(format!("malformed ES256 signature: {e}")))?;

    Ok(Parts { header, claims_b64, signing_input: format!("{header_b64}.{claims_b64}"), signature })
}

fn verify_signature(parts: &Parts<'_>, key: &VerifyingKey) -> Result<()> {
    key.verify(parts.signing_input.as_bytes(), &parts.signature)
        .map_err(|e| Error::VpProofError(format!("signature verification failed: {e}")))
}

fn decode_claims<T: DeserializeOwned>(parts: &Parts<'_>) -> Result<T> {
    let claims_json = Base64UrlUnpadded::decode_vec(parts.claims_b64)
        .map_err(|e| Error::VcClaimMalformed(format!("bad JWS claims encoding: {e}")))?;
    serde_json::from_slice(&claims_json)
        .map_err(|e| Error::VcClaimMalformed(format!("claims do not match expected shape: {e}")))
}

/// Checks `iat <= now + skew` and `exp >= now - skew`, the temporal window
/// every envelope this engine issues or accepts must satisfy.
fn check_temporal(iat: DateTime<Utc>, exp: DateTime<Utc>, skew: Duration) -> Result<()> {
    let now = Utc::now();
    let skew = chrono::Duration::from_std(skew).unwrap_or(chrono::Duration::zero());
    if iat > now + skew {
        return Err(Error::VpProofError(format!("iat {iat} is in the future")));
    }
    if exp < now - skew {
        return Err(Error::VpProofError(format!("envelope expired at {exp}")));
    }
    Ok(())
}

/// Signs a [`VpClaims`] envelope. The holder's signing key must correspond
/// to the verification method named by `kid`.
///
/// # Errors
///
/// See [`encode`].
pub fn sign_vp(claims: &VpClaims, signing_key: &SigningKey, kid: &str) -> Result<String> {
    encode(claims, signing_key, kid)
}

/// Signs a [`VcClaims`] envelope using the issuer's signing key.
///
/// # Errors
///
/// See [`encode`].
pub fn sign_vc(claims: &VcClaims, signing_key: &SigningKey, kid: &str) -> Result<String> {
    encode(claims, signing_key, kid)
}

/// Verifies a compact JWS VP envelope: resolves `iss`'s key via `resolver`,
/// checks the ES256 signature, and checks `iat`/`exp` against `skew`.
///
/// # Errors
///
/// Returns [`Error::VpProofError`] on a signature or temporal failure, or a
/// DID-query error if `iss` cannot be resolved.
pub fn verify_vp(compact: &str, resolver: &dyn DidResolver, skew: Duration) -> Result<VpClaims> {
    let parts = split(compact)?;
    let claims: VpClaims = decode_claims(&parts)?;

    debug!(iss = %claims.iss, aud = %claims.aud, "verifying VP envelope");
    let jwk = resolver.resolve(&claims.iss, parts.header.kid.as_deref())?;
    let key = jwk.to_verifying_key()?;
    verify_signature(&parts, &key)?;
    check_temporal(claims.iat, claims.exp, skew)?;

    if let Some(holder) = claims.vp.holder.as_deref() {
        if claims.sub != holder {
            warn!(sub = %claims.sub, "VP claims subject does not match embedded holder");
            return Err(Error::HolderPublicKeyInconsistent(
                "vp.holder does not match envelope sub".to_string(),
            ));
        }
    }
    Ok(claims)
}

/// Verifies a compact JWS VC envelope. `exp` is optional on VCs (a VC may
/// be bound only by `valid_until` inside the credential body), so the
/// temporal check is skipped when absent.
///
/// # Errors
///
/// Returns [`Error::VcProofError`] on a signature failure, or a DID-query
/// error if `iss` cannot be resolved.
pub fn verify_vc(compact: &str, resolver: &dyn DidResolver, skew: Duration) -> Result<VcClaims> {
    let parts = split(compact)?;
    let claims: VcClaims = decode_claims(&parts)?;

    let jwk = resolver
        .resolve(&claims.iss, parts.header.kid.as_deref())
        .map_err(|e| Error::VcProofError(format!("resolving issuer key: {e}")))?;
    let key = jwk.to_verifying_key().map_err(|e| Error::VcProofError(e.to_string()))?;
    verify_signature(&parts, &key).map_err(|e| Error::VcProofError(e.to_string()))?;

    if let Some(exp) = claims.exp {
        check_temporal(claims.iat, exp, skew).map_err(|e| Error::VcProofError(e.to_string()))?;
    }
    Ok(claims)
}

/// Hashes `data` with SHA-256, used for mDL digest and status-list integrity
/// checks that live outside the JWS envelope.
#[must_use]
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use std::time::Duration as StdDuration;

    use chrono::TimeZone;

    use super::*;
    use crate::did::{LocalResolver, PublicKeyJwk};
    use crate::model::VerifiablePresentation;

    fn keypair() -> (SigningKey, PublicKeyJwk) {
        let signing = SigningKey::random(&mut rand_core::OsRng);
        let jwk = PublicKeyJwk::from_verifying_key(signing.verifying_key());
        (signing, jwk)
    }

    fn sample_vp_claims() -> VpClaims {
        let vp = VerifiablePresentation::builder()
            .add_context(crate::core::Kind::String(
                "https://www.w3.org/2018/credentials/examples/v1".into(),
            ))
            .holder("did:example:holder456")
            .build()
            .expect("builds");
        VpClaims {
            iss: "did:example:holder456".to_string(),
            sub: "did:example:holder456".to_string(),
            aud: "did:example:verifier789".to_string(),
            jti: "nonce-67890".to_string(),
            iat: Utc::now(),
            exp: Utc::now() + chrono::Duration::minutes(5),
            vp,
        }
    }

    #[test]
    fn sign_and_verify_vp_roundtrips() {
        let (signing_key, jwk) = keypair();
        let resolver = LocalResolver::new();
        resolver.register_local_key("did:example:holder456", None, jwk);

        let claims = sample_vp_claims();
        let compact = sign_vp(&claims, &signing_key, "key-1").expect("signs");
        let verified = verify_vp(&compact, &resolver, StdDuration::from_secs(30)).expect("verifies");
        assert_eq!(verified.jti, "nonce-67890");
    }

    #[test]
    fn verify_vp_rejects_wrong_key() {
        let (_, jwk) = keypair();
        let (wrong_signing_key, _) = keypair();
        let resolver = LocalResolver::new();
        resolver.register_local_key("did:example:holder456", None, jwk);

        let claims = sample_vp_claims();
        let compact = sign_vp(&claims, &wrong_signing_key, "key-1").expect("signs");
        let err = verify_vp(&compact, &resolver, StdDuration::from_secs(30)).unwrap_err();
        assert_eq!(err.code(), 71_003);
    }

    #[test]
    fn verify_vp_rejects_expired_envelope() {
        let (signing_key, jwk) = keypair();
        let resolver = LocalResolver::new();
        resolver.register_local_key("did:example:holder456", None, jwk);

        let mut claims = sample_vp_claims();
        claims.iat = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        claims.exp = Utc.with_ymd_and_hms(2020, 1, 1, 0, 5, 0).unwrap();
        let compact = sign_vp(&claims, &signing_key, "key-1").expect("signs");
        let err = verify_vp(&compact, &resolver, StdDuration::from_secs(30)).unwrap_err();
        assert_eq!(err.code(), 71_003);
    }

    #[test]
    fn rejects_non_es256_header() {
        let header = serde_json::json!({"alg": "HS256", "typ": "JWT"});
        let compact = format!(
            "{}.{}.sig",
            Base64UrlUnpadded::encode_string(header.to_string().as_bytes()),
            Base64UrlUnpadded::encode_string(b"{}")
        );
        let resolver = LocalResolver::new();
        let err = verify_vp(&compact, &resolver, StdDuration::from_secs(30)).unwrap_err();
        assert_eq!(err.code(), 71_003);
    }
}
