//! COSE_Sign1 parsing and ES256 verification helpers shared by the issuer
//! and device signature checks.

use ciborium::Value;
use coset::{CborSerializable, CoseSign1, Label};
use p256::ecdsa::signature::Verifier;
use p256::ecdsa::{Signature, VerifyingKey};

use crate::error::{Error, Result};

/// The COSE header label carrying the X.509 certificate chain, per
/// RFC 9360 (`x5chain`).
const X5CHAIN_LABEL: i64 = 33;

/// Parses a CBOR-encoded COSE_Sign1 structure.
///
/// # Errors
///
/// Returns [`Error::MdlCertChainInvalid`] if `bytes` is not a well-formed
/// COSE_Sign1.
pub fn parse_sign1(bytes: &[u8]) -> Result<CoseSign1> {
    CoseSign1::from_slice(bytes)
        .map_err(|e| Error::MdlCertChainInvalid(format!("parsing COSE_Sign1: {e}")))
}

/// Extracts the `x5chain` header value (present in either the protected or
/// unprotected header) as an ordered, leaf-first list of DER certificates.
///
/// # Errors
///
/// Returns [`Error::MdlCertChainInvalid`] if no `x5chain` entry is present
/// or it is not a byte string / array of byte strings.
pub fn extract_x5chain(sign1: &CoseSign1) -> Result<Vec<Vec<u8>>> {
    let label = Label::Int(X5CHAIN_LABEL);
    let found = sign1
        .unprotected
        .rest
        .iter()
        .chain(sign1.protected.header.rest.iter())
        .find(|(l, _)| *l == label)
        .map(|(_, v)| v.clone());

    let value = found
        .ok_or_else(|| Error::MdlCertChainInvalid("issuerAuth carries no x5chain header".to_string()))?;

    match value {
        Value::Bytes(der) => Ok(vec![der]),
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Bytes(der) => Ok(der),
                _ => Err(Error::MdlCertChainInvalid("x5chain entry is not a byte string".to_string())),
            })
            .collect(),
        _ => Err(Error::MdlCertChainInvalid("x5chain header has unexpected shape".to_string())),
    }
}

/// Verifies `sign1`'s signature over its `Sig_structure` (with the given
/// additional authenticated data, empty for the issuer-auth check) using
/// `key`. `on_failure` builds the [`Error`] variant appropriate to the
/// calling pipeline stage, since a COSE_Sign1 failure means something
/// different at `MSO_VERIFIED` (issuer signature) than at
/// `DEVICE_VERIFIED` (device-binding signature).
///
/// # Errors
///
/// Returns `on_failure(..)` if the signature does not verify.
pub fn verify_sign1(
    sign1: &CoseSign1,
    key: &VerifyingKey,
    aad: &[u8],
    on_failure: impl FnOnce(String) -> Error,
) -> Result<()> {
    sign1
        .verify_signature(aad, |sig_bytes, data| {
            let signature = Signature::from_slice(sig_bytes)
                .map_err(|e| format!("malformed ES256 signature: {e}"))?;
            key.verify(data, &signature).map_err(|e| format!("signature mismatch: {e}"))
        })
        .map_err(|e| on_failure(e.to_string()))
}
