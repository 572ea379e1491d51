//! # ISO/IEC 18013-5 mDL Verifier
//!
//! Verifies a CBOR-encoded mobile driving licence document through the
//! seven-state pipeline of `spec.md` §4.D: certificate-chain trust, issuer
//! signature over the Mobile Security Object, per-item digest integrity,
//! device-binding signature, and validity window. Trust roots are fixed at
//! construction; this module never fetches a root over the network.

mod cert;
mod cose;

use std::collections::BTreeMap;

use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Utc};
use ciborium::Value;
use ciborium::value::Integer;
use p256::ecdsa::VerifyingKey;
use serde_json::json;
use tracing::{debug, warn};
use x509_cert::Certificate;

use crate::error::{Error, Result};
use crate::jose::sha256;

/// Flattened disclosed claims, keyed `"{namespace}/{elementIdentifier}"`.
pub type MdlClaims = BTreeMap<String, serde_json::Value>;

/// The mDL document type this engine accepts. Any other `docType` fails
/// parsing.
pub const SUPPORTED_DOC_TYPE: &str = "org.iso.18013.5.1.mDL";

/// Marks progress through the seven-state verification pipeline, useful for
/// attributing a failure to the exact step that produced it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MdlState {
    /// CBOR decoded, `docType` recognised.
    Parsed,
    /// COSE_Sign1 structure and its `x5chain` extracted.
    IssuerCoseParsed,
    /// Certificate chain anchors to a trust root.
    CertValidated,
    /// Issuer signature over the MSO verified.
    MsoVerified,
    /// Every disclosed item's digest matches the MSO.
    DigestsVerified,
    /// Device-binding signature verified.
    DeviceVerified,
    /// `validityInfo` window covers now.
    TemporalValidated,
}

fn map_get<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    value.as_map()?.iter().find_map(|(k, v)| (k.as_text() == Some(key)).then_some(v))
}

fn require<'a>(value: &'a Value, key: &str, context: &str) -> Result<&'a Value> {
    map_get(value, key)
        .ok_or_else(|| Error::InvalidPresentationValidationRequest(format!("{context} missing `{key}`")))
}

fn encode_cbor(value: &Value) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf)
        .map_err(|e| Error::MdlDigestMismatch(format!("re-encoding CBOR item: {e}")))?;
    Ok(buf)
}

fn cbor_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => json!(b),
        Value::Integer(i) => json!(i128::from(*i)),
        Value::Float(f) => json!(f),
        Value::Text(s) => json!(s),
        Value::Bytes(b) => json!(Base64UrlUnpadded::encode_string(b)),
        Value::Array(items) => serde_json::Value::Array(items.iter().map(cbor_to_json).collect()),
        Value::Map(entries) => {
            let mut map = serde_json::Map::new();
            for (k, v) in entries {
                let key = k.as_text().map(ToString::to_string).unwrap_or_else(|| format!("{k:?}"));
                map.insert(key, cbor_to_json(v));
            }
            serde_json::Value::Object(map)
        }
        other => json!(format!("{other:?}")),
    }
}

/// Verifies mDL documents against a fixed set of trust-root certificates.
pub struct MdlVerifier {
    trust_roots: Vec<Certificate>,
}

impl MdlVerifier {
    /// Builds a verifier trusting exactly `trust_roots`.
    #[must_use]
    pub fn new(trust_roots: Vec<Certificate>) -> Self {
        Self { trust_roots }
    }

    /// Runs the full seven-state pipeline over `document_cbor` (the raw
    /// bytes of a `MobileDocument`) and `device_authentication_bytes` (the
    /// detached payload the device signed — a collaborator concern to
    /// construct; this engine only verifies the signature over it).
    ///
    /// # Errors
    ///
    /// Returns the `Mdl*` family of [`Error`] variants, one per pipeline
    /// stage, matching `spec.md`'s state-machine ordering.
    pub fn verify(
        &self,
        document_cbor: &[u8],
        device_authentication_bytes: &[u8],
    ) -> Result<(MdlState, MdlClaims)> {
        // 1. PARSED
        let doc: Value = ciborium::de::from_reader(document_cbor)
            .map_err(|e| Error::UnrecognisedPresentationFormat(format!("malformed mDL CBOR: {e}")))?;
        let doc_type = require(&doc, "docType", "document")?
            .as_text()
            .ok_or_else(|| Error::UnrecognisedPresentationFormat("docType not a string".to_string()))?;
        if doc_type != SUPPORTED_DOC_TYPE {
            return Err(Error::UnrecognisedPresentationFormat(format!("unsupported docType: {doc_type}")));
        }
        debug!(doc_type, "mDL parsed");

        let issuer_signed = require(&doc, "issuerSigned", "document")?;
        let name_spaces = require(issuer_signed, "nameSpaces", "issuerSigned")?
            .as_map()
            .ok_or_else(|| Error::InvalidPresentationValidationRequest("nameSpaces not a map".to_string()))?;
        let issuer_auth_value = require(issuer_signed, "issuerAuth", "issuerSigned")?;

        // 2. ISSUER_COSE_PARSED
        let issuer_auth_bytes = encode_cbor(issuer_auth_value)?;
        let issuer_sign1 = cose::parse_sign1(&issuer_auth_bytes)?;
        let x5chain = cose::extract_x5chain(&issuer_sign1)?;
        let chain = cert::parse_chain(&x5chain)?;
        debug!(chain_len = chain.len(), "issuer COSE_Sign1 parsed");

        // 3. CERT_VALIDATED
        let now = Utc::now();
        let issuer_key = cert::validate_chain(&chain, &self.trust_roots, now)?;

        // 4. MSO_VERIFIED
        cose::verify_sign1(&issuer_sign1, &issuer_key, &[], Error::MdlCertChainInvalid)?;
        let payload = issuer_sign1
            .payload
            .as_ref()
            .ok_or_else(|| Error::MdlCertChainInvalid("issuerAuth carries a detached payload".to_string()))?;
        let mso: Value = ciborium::de::from_reader(payload.as_slice())
            .map_err(|e| Error::MdlCertChainInvalid(format!("malformed MSO: {e}")))?;

        let digest_algorithm = require(&mso, "digestAlgorithm", "MSO")?
            .as_text()
            .unwrap_or_default();
        if digest_algorithm != "SHA-256" {
            return Err(Error::MdlCertChainInvalid(format!(
                "unsupported MSO digestAlgorithm: {digest_algorithm}"
            )));
        }
        let value_digests =
            require(&mso, "valueDigests", "MSO")?.as_map().ok_or_else(|| {
                Error::MdlCertChainInvalid("MSO valueDigests not a map".to_string())
            })?;

        // 5. DIGESTS_VERIFIED
        let mut claims = MdlClaims::new();
        for (ns_key, items) in name_spaces {
            let Some(namespace) = ns_key.as_text() else { continue };
            let digests_for_ns = value_digests
                .iter()
                .find_map(|(k, v)| (k.as_text() == Some(namespace)).then_some(v))
                .and_then(Value::as_map)
                .ok_or_else(|| {
                    Error::MdlDigestMismatch(format!("MSO has no digests for namespace {namespace}"))
                })?;

            for item in items.as_array().into_iter().flatten() {
                let digest_id = require(item, "digestID", "IssuerSignedItem")?
                    .as_integer()
                    .ok_or_else(|| Error::MdlDigestMismatch("digestID not an integer".to_string()))?;
                let element_identifier = require(item, "elementIdentifier", "IssuerSignedItem")?
                    .as_text()
                    .unwrap_or_default()
                    .to_string();
                let element_value = require(item, "elementValue", "IssuerSignedItem")?;

                let expected = digests_for_ns
                    .iter()
                    .find_map(|(k, v)| (k.as_integer() == Some(digest_id)).then_some(v))
                    .and_then(Value::as_bytes)
                    .ok_or_else(|| {
                        Error::MdlDigestMismatch(format!(
                            "no MSO digest recorded for {namespace}/{element_identifier}"
                        ))
                    })?;

                let actual = sha256(&encode_cbor(item)?);
                if actual.as_slice() != expected.as_slice() {
                    warn!(namespace, element_identifier, "mDL digest mismatch");
                    return Err(Error::MdlDigestMismatch(format!("{namespace}/{element_identifier}")));
                }
                claims.insert(format!("{namespace}/{element_identifier}"), cbor_to_json(element_value));
            }
        }

        // 6. DEVICE_VERIFIED
        let device_key_info = require(&mso, "deviceKeyInfo", "MSO")?;
        let device_key_value = require(device_key_info, "deviceKey", "deviceKeyInfo")?;
        let device_key = device_cose_key_to_verifying_key(device_key_value)?;

        let device_signed = require(&doc, "deviceSigned", "document")?;
        let device_auth = require(device_signed, "deviceAuth", "deviceSigned")?;
        let device_signature_value = require(device_auth, "deviceSignature", "deviceAuth")?;
        let device_sign1_bytes = encode_cbor(device_signature_value)?;
        let device_sign1 = cose::parse_sign1(&device_sign1_bytes)?;
        cose::verify_sign1(
            &device_sign1,
            &device_key,
            device_authentication_bytes,
            Error::MdlDeviceSignatureInvalid,
        )?;

        // 7. TEMPORAL_VALIDATED
        let validity_info = require(&mso, "validityInfo", "MSO")?;
        let valid_from = parse_cbor_datetime(require(validity_info, "validFrom", "validityInfo")?)?;
        let valid_until = parse_cbor_datetime(require(validity_info, "validUntil", "validityInfo")?)?;
        if now < valid_from || now > valid_until {
            return Err(Error::MdlTemporalInvalid(format!(
                "now {now} outside validity window {valid_from}..{valid_until}"
            )));
        }

        Ok((MdlState::TemporalValidated, claims))
    }
}

fn device_cose_key_to_verifying_key(cose_key: &Value) -> Result<VerifyingKey> {
    let map = cose_key
        .as_map()
        .ok_or_else(|| Error::MdlDeviceSignatureInvalid("deviceKey not a COSE_Key map".to_string()))?;
    let x = map
        .iter()
        .find_map(|(k, v)| (k.as_integer() == Some(Integer::from(-2))).then_some(v))
        .and_then(Value::as_bytes)
        .ok_or_else(|| Error::MdlDeviceSignatureInvalid("deviceKey missing x coordinate".to_string()))?;
    let y = map
        .iter()
        .find_map(|(k, v)| (k.as_integer() == Some(Integer::from(-3))).then_some(v))
        .and_then(Value::as_bytes)
        .ok_or_else(|| Error::MdlDeviceSignatureInvalid("deviceKey missing y coordinate".to_string()))?;

    let point = p256::EncodedPoint::from_affine_coordinates(x.as_slice().into(), y.as_slice().into(), false);
    VerifyingKey::from_encoded_point(&point)
        .map_err(|e| Error::MdlDeviceSignatureInvalid(format!("invalid device key point: {e}")))
}

fn parse_cbor_datetime(value: &Value) -> Result<DateTime<Utc>> {
    let text = value
        .as_text()
        .ok_or_else(|| Error::MdlTemporalInvalid("validityInfo date not a string".to_string()))?;
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::MdlTemporalInvalid(format!("unparseable date {text}: {e}")))
}
