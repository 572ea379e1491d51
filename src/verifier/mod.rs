//! # VP Validation Orchestrator
//!
//! The top-level dispatcher: enforces input-size limits, detects each
//! presentation's envelope format, validates the VP envelope and every
//! embedded VC, checks holder binding and credential status, and produces a
//! uniform [`PresentationValidationResponse`] per input string.

use base64ct::{Base64UrlUnpadded, Base64Url, Encoding};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{EngineConfig, MAX_AGGREGATE_BYTES, MAX_PRESENTATIONS_PER_CALL, MAX_PRESENTATION_BYTES};
use crate::core::{CancellationSignal, Kind};
use crate::did::DidResolver;
use crate::error::{Error, ErrorBody, Result};
use crate::jose;
use crate::mdl::MdlVerifier;
use crate::status::{CredentialState, StatusListClient};

/// The envelope format detected for one presentation string.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Format {
    Jwt,
    Cbor,
}

fn detect_format(presentation: &str) -> Result<Format> {
    if presentation.starts_with("eyJ") {
        return Ok(Format::Jwt);
    }
    let bytes = Base64UrlUnpadded::decode_vec(presentation)
        .or_else(|_| Base64Url::decode_vec(presentation))
        .map_err(|_| Error::UnrecognisedPresentationFormat("neither JWT nor base64 CBOR".to_string()))?;
    match bytes.first() {
        Some(b @ 0xA0..=0xBF | b @ 0xC0..=0xDF) => {
            let _ = b;
            Ok(Format::Cbor)
        }
        _ => Err(Error::UnrecognisedPresentationFormat(
            "decoded bytes do not begin with a CBOR map/tag marker".to_string(),
        )),
    }
}

/// Result of validating a single embedded VC, reported at
/// `$.vp.verifiableCredential[i]` per `spec.md`'s path convention.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VcEntry {
    /// Result-reporting path of this entry within the presentation.
    pub path: String,
    /// Whether this credential passed every check.
    pub valid: bool,
    /// Flattened claims (JWT: `credentialSubject`; mDL: namespace/element
    /// pairs), present only when `valid`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claims: Option<serde_json::Value>,
    /// The error that rejected this credential, present only when
    /// `!valid`. A VC failure never fails the enclosing presentation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

/// Uniform result of validating one presentation string.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PresentationValidationResponse {
    /// Index-based path of this presentation within the submitted batch,
    /// e.g. `"$[0]"`.
    pub path: String,
    /// Whether the presentation envelope itself verified. `false` means the
    /// whole presentation is rejected; individual VC failures do not affect
    /// this field.
    pub valid: bool,
    /// Holder DID, present when the envelope verified.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub holder_did: Option<String>,
    /// Per-credential results, in presentation order.
    pub credentials: Vec<VcEntry>,
    /// The error that rejected the presentation envelope, present only
    /// when `!valid`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl PresentationValidationResponse {
    fn rejected(path: String, error: &Error) -> Self {
        Self { path, valid: false, holder_did: None, credentials: Vec::new(), error: Some(error.body()) }
    }
}

/// Orchestrates presentation validation against a fixed set of
/// collaborators.
pub struct PresentationValidator<'a> {
    resolver: &'a dyn DidResolver,
    status_client: &'a StatusListClient,
    mdl_verifier: &'a MdlVerifier,
    config: &'a EngineConfig,
}

impl<'a> PresentationValidator<'a> {
    /// Builds an orchestrator over borrowed collaborators, all of which
    /// outlive a single validation call.
    #[must_use]
    pub fn new(
        resolver: &'a dyn DidResolver,
        status_client: &'a StatusListClient,
        mdl_verifier: &'a MdlVerifier,
        config: &'a EngineConfig,
    ) -> Self {
        Self { resolver, status_client, mdl_verifier, config }
    }

    /// Validates a batch of presentation strings, per `spec.md` §4.F.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPresentationValidationRequest`] if the batch
    /// violates the count/size limits (checked before any parsing), or
    /// [`Error::Cancelled`] if `cancel` fires mid-batch.
    pub fn validate(
        &self,
        presentations: &[String],
        cancel: &CancellationSignal,
    ) -> Result<Vec<PresentationValidationResponse>> {
        if presentations.len() > MAX_PRESENTATIONS_PER_CALL {
            return Err(Error::InvalidPresentationValidationRequest(format!(
                "{} presentations exceeds the {MAX_PRESENTATIONS_PER_CALL}-per-call limit",
                presentations.len()
            )));
        }
        let mut aggregate = 0usize;
        for p in presentations {
            if p.len() > MAX_PRESENTATION_BYTES {
                return Err(Error::InvalidPresentationValidationRequest(format!(
                    "a presentation of {} bytes exceeds the {MAX_PRESENTATION_BYTES}-byte limit",
                    p.len()
                )));
            }
            aggregate += p.len();
        }
        if aggregate > MAX_AGGREGATE_BYTES {
            return Err(Error::InvalidPresentationValidationRequest(format!(
                "aggregate payload of {aggregate} bytes exceeds the {MAX_AGGREGATE_BYTES}-byte limit"
            )));
        }

        let mut responses = Vec::with_capacity(presentations.len());
        for (i, raw) in presentations.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let path = format!("$[{i}]");
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                continue;
            }
            responses.push(self.validate_one(&path, trimmed, cancel)?);
        }
        Ok(responses)
    }

    fn validate_one(
        &self,
        path: &str,
        presentation: &str,
        cancel: &CancellationSignal,
    ) -> Result<PresentationValidationResponse> {
        match detect_format(presentation) {
            Ok(Format::Jwt) => Ok(self.validate_jwt(path, presentation, cancel)),
            Ok(Format::Cbor) => Ok(self.validate_mdl(path, presentation)),
            Err(e) => Ok(PresentationValidationResponse::rejected(path.to_string(), &e)),
        }
    }

    fn validate_jwt(
        &self,
        path: &str,
        presentation: &str,
        cancel: &CancellationSignal,
    ) -> PresentationValidationResponse {
        let vp_claims = match jose::verify_vp(presentation, self.resolver, self.config.temporal_skew) {
            Ok(c) => c,
            Err(e) => return PresentationValidationResponse::rejected(path.to_string(), &e),
        };
        let holder_did = if vp_claims.sub.is_empty() {
            vp_claims.vp.holder.clone().unwrap_or_default()
        } else {
            vp_claims.sub.clone()
        };
        debug!(holder_did, "VP envelope verified");

        let mut credentials = Vec::new();
        let embedded = vp_claims.vp.verifiable_credential.unwrap_or_default();
        for (i, vc_entry) in embedded.iter().enumerate() {
            if cancel.is_cancelled() {
                warn!("presentation validation cancelled mid-batch");
                return PresentationValidationResponse::rejected(path.to_string(), &Error::Cancelled);
            }
            let vc_path = format!("$.vp.verifiableCredential[{i}]");
            let compact = match vc_entry {
                Kind::String(jws) => jws.as_str(),
                Kind::Object(_) => {
                    credentials.push(VcEntry {
                        path: vc_path,
                        valid: false,
                        claims: None,
                        error: Some(
                            Error::VcClaimMalformed("embedded Data Integrity VCs are not supported".into())
                                .body(),
                        ),
                    });
                    continue;
                }
            };
            credentials.push(self.validate_embedded_vc(&vc_path, compact, &holder_did));
        }

        PresentationValidationResponse {
            path: path.to_string(),
            valid: true,
            holder_did: Some(holder_did),
            credentials,
            error: None,
        }
    }

    fn validate_embedded_vc(&self, path: &str, compact: &str, holder_did: &str) -> VcEntry {
        let claims = match jose::verify_vc(compact, self.resolver, self.config.temporal_skew) {
            Ok(c) => c,
            Err(e) => return VcEntry { path: path.to_string(), valid: false, claims: None, error: Some(e.body()) },
        };

        if claims.sub != holder_did {
            let e = Error::VcSubjectMismatch(format!("vc.sub {} != vp holder {holder_did}", claims.sub));
            return VcEntry { path: path.to_string(), valid: false, claims: None, error: Some(e.body()) };
        }

        if let Some(status_entries) = &claims.vc.credential_status {
            for entry in status_entries.as_slice() {
                match self.status_client.check(entry, self.resolver, self.config.temporal_skew) {
                    Ok(CredentialState::Active) => {}
                    Ok(_) => {
                        let e = Error::VcStatusError(format!("{} is not ACTIVE", entry.status_list_credential));
                        return VcEntry { path: path.to_string(), valid: false, claims: None, error: Some(e.body()) };
                    }
                    Err(e) => {
                        let e = Error::VcStatusError(e.to_string());
                        return VcEntry { path: path.to_string(), valid: false, claims: None, error: Some(e.body()) };
                    }
                }
            }
        }

        let subject_claims = claims
            .vc
            .credential_subject
            .as_slice()
            .first()
            .map(|s| serde_json::Value::Object(s.claims.clone()))
            .unwrap_or(serde_json::Value::Null);
        VcEntry { path: path.to_string(), valid: true, claims: Some(subject_claims), error: None }
    }

    fn validate_mdl(&self, path: &str, presentation: &str) -> PresentationValidationResponse {
        let bytes = Base64UrlUnpadded::decode_vec(presentation)
            .or_else(|_| Base64Url::decode_vec(presentation))
            .unwrap_or_default();
        match self.mdl_verifier.verify(&bytes, &[]) {
            Ok((_, claims)) => {
                let credentials = vec![VcEntry {
                    path: format!("{path}.mdl"),
                    valid: true,
                    claims: Some(serde_json::to_value(claims).unwrap_or(serde_json::Value::Null)),
                    error: None,
                }];
                PresentationValidationResponse {
                    path: path.to_string(),
                    valid: true,
                    holder_did: None,
                    credentials,
                    error: None,
                }
            }
            Err(e) => PresentationValidationResponse::rejected(path.to_string(), &e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_jwt_by_prefix() {
        assert_eq!(detect_format("eyJhbGciOiJFUzI1NiJ9.x.y").unwrap(), Format::Jwt);
    }

    #[test]
    fn rejects_unrecognisable_format() {
        let err = detect_format("not a presentation").unwrap_err();
        assert_eq!(err.code(), 71_002);
    }
}
