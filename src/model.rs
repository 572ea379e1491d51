//! # W3C Verifiable Credential / Presentation Data Model
//!
//! A pragmatic implementation of the claims the trust engine needs from the
//! W3C Verifiable Credentials Data Model v1.1 and its enveloping JWT/JWS
//! securing mechanism. Fields not consulted by any verification or issuance
//! rule in this crate (`evidence`, `refreshService`, `relatedResource`,
//! `termsOfUse`, ...) are intentionally not modelled; see `DESIGN.md`.

use chrono::serde::{ts_seconds, ts_seconds_option};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::{Kind, OneMany};

/// A naive implementation of the W3C Verifiable Credential data model v1.1.
/// See <https://www.w3.org/TR/vc-data-model>.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct VerifiableCredential {
    /// Maps property URIs into short-form aliases. The first item is
    /// conventionally `"https://www.w3.org/2018/credentials/v1"`.
    #[serde(rename = "@context")]
    pub context: Vec<Kind<Value>>,

    /// Optional URI naming this credential.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Unordered set of type terms or URIs. Must include
    /// `"VerifiableCredential"`.
    #[serde(rename = "type")]
    pub type_: OneMany<String>,

    /// URI (or object with an `id`) identifying the issuer.
    pub issuer: Kind<Issuer>,

    /// One or more objects containing claims about the subject(s).
    pub credential_subject: OneMany<CredentialSubject>,

    /// The date-time the credential becomes valid. Not necessarily the
    /// issuance date.
    pub valid_from: Option<DateTime<Utc>>,

    /// The date-time the credential ceases to be valid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<DateTime<Utc>>,

    /// Pointer(s) to the status-list entry/entries used to determine
    /// whether this credential is suspended or revoked.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential_status: Option<OneMany<CredentialStatus>>,

    /// Embedded Data Integrity proof(s). The trust engine verifies VCs
    /// enveloped as compact JWS (see `crate::jose`); an embedded proof is
    /// carried through but not itself evaluated — see `spec.md`'s
    /// Non-goals on BBS+/Data Integrity suites.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proof: Option<OneMany<Proof>>,
}

impl VerifiableCredential {
    /// A new, empty credential with `type` set to `VerifiableCredential`
    /// and the base VC-DM context populated.
    #[must_use]
    pub fn new() -> Self {
        Self {
            context: vec![Kind::String("https://www.w3.org/2018/credentials/v1".into())],
            type_: OneMany::One("VerifiableCredential".to_string()),
            ..Self::default()
        }
    }
}

/// Identifies the issuer of a credential.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Issuer {
    /// The issuer's DID or URI.
    pub id: String,

    /// Issuer-specific extra fields.
    #[serde(flatten)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<Map<String, Value>>,
}

/// Claims about the subject(s) of a credential.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CredentialSubject {
    /// URI identifying the subject. For credentials bound to a holder,
    /// this is the holder's DID.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Arbitrary claims about the subject.
    #[serde(flatten)]
    pub claims: Map<String, Value>,
}

/// Points at an entry in an issuer-signed status list.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct CredentialStatus {
    /// Optional URI naming this status entry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// The `BitstringStatusListEntry` status method. Only method
    /// supported (see `spec.md` Non-goals on accumulator schemes).
    #[serde(rename = "type")]
    pub type_: String,

    /// Bit position within the referenced status list.
    pub status_list_index: usize,

    /// URL of the status-list credential; dereferencing it yields a JWT
    /// whose payload carries the compressed bitstring.
    pub status_list_credential: String,
}

/// Embedded Data Integrity proof. Carried through the model but not
/// evaluated by this engine (see module docs).
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct Proof {
    /// Proof suite identifier, e.g. `"DataIntegrityProof"`.
    #[serde(rename = "type")]
    pub type_: String,

    /// Verification method URI (typically a DID URL with key fragment).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_method: Option<String>,

    /// Purpose of the proof, e.g. `"assertionMethod"` or
    /// `"authentication"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proof_purpose: Option<String>,

    /// Anti-replay challenge supplied by the relying party.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub challenge: Option<String>,
}

/// A Verifiable Presentation combines and presents credentials to a
/// Verifier.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct VerifiablePresentation {
    /// Maps property URIs into short-form aliases.
    #[serde(rename = "@context")]
    pub context: Vec<Kind<Value>>,

    /// Optional URI naming this presentation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Unordered set of type terms. Must include
    /// `"VerifiablePresentation"`.
    #[serde(rename = "type")]
    pub type_: OneMany<String>,

    /// The enclosed credentials, each either an embedded object or a
    /// compact JWS string.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verifiable_credential: Option<Vec<Kind<VerifiableCredential>>>,

    /// URI for the entity generating the presentation (the holder).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub holder: Option<String>,
}

impl VerifiablePresentation {
    /// Returns a new [`VpBuilder`].
    #[must_use]
    pub fn builder() -> VpBuilder {
        VpBuilder::new()
    }
}

/// Builds a [`VerifiablePresentation`], checking the mandatory fields on
/// `build()`.
#[derive(Clone, Default)]
pub struct VpBuilder {
    vp: VerifiablePresentation,
}

impl VpBuilder {
    /// A new builder with the base VC-DM context and
    /// `"VerifiablePresentation"` type pre-populated.
    #[must_use]
    pub fn new() -> Self {
        let mut builder = Self::default();
        builder.vp.context.push(Kind::String("https://www.w3.org/2018/credentials/v1".into()));
        builder.vp.type_ = OneMany::One("VerifiablePresentation".to_string());
        builder
    }

    /// Appends a `@context` entry.
    #[must_use]
    pub fn add_context(mut self, context: Kind<Value>) -> Self {
        self.vp.context.push(context);
        self
    }

    /// Appends a credential (embedded object or compact JWS string).
    #[must_use]
    pub fn add_credential(mut self, vc: Kind<VerifiableCredential>) -> Self {
        self.vp.verifiable_credential.get_or_insert_with(Vec::new).push(vc);
        self
    }

    /// Sets the `holder` property.
    #[must_use]
    pub fn holder(mut self, holder: impl Into<String>) -> Self {
        self.vp.holder = Some(holder.into());
        self
    }

    /// Turns this builder into a [`VerifiablePresentation`].
    ///
    /// # Errors
    ///
    /// Fails if `@context` or `holder` were never set.
    pub fn build(self) -> anyhow::Result<VerifiablePresentation> {
        if self.vp.context.len() < 2 {
            anyhow::bail!("@context is required");
        }
        if self.vp.holder.is_none() {
            anyhow::bail!("holder is required");
        }
        Ok(self.vp)
    }
}

/// JWS envelope claims for a Verifiable Presentation (`spec.md` §3
/// `VPClaims`).
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct VpClaims {
    /// Issuer of the envelope — conventionally the holder's DID, mirrored
    /// in `vp.holder`.
    pub iss: String,

    /// Holder DID. Invariant: equals `vp.holder` when both are present.
    pub sub: String,

    /// The verifier's `client_id` from its Authorization Request.
    pub aud: String,

    /// The nonce supplied by the verifier; doubles as the envelope's
    /// unique identifier.
    pub jti: String,

    /// Issued-at time.
    #[serde(with = "ts_seconds")]
    pub iat: DateTime<Utc>,

    /// Expiry time.
    #[serde(with = "ts_seconds")]
    pub exp: DateTime<Utc>,

    /// The Verifiable Presentation body.
    pub vp: VerifiablePresentation,
}

/// JWS envelope claims for a Verifiable Credential (`spec.md` §3
/// `VCClaims`).
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct VcClaims {
    /// Issuer DID.
    pub iss: String,

    /// Holder (subject) DID.
    pub sub: String,

    /// Issued-at time.
    #[serde(with = "ts_seconds")]
    pub iat: DateTime<Utc>,

    /// Credential ID.
    pub jti: String,

    /// Expiry time.
    #[serde(with = "ts_seconds_option")]
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub exp: Option<DateTime<Utc>>,

    /// The Verifiable Credential body.
    pub vc: VerifiableCredential,
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;

    fn sample_vc() -> VerifiableCredential {
        let mut vc = VerifiableCredential::new();
        vc.type_.add("NationalIDCredential".to_string());
        vc.issuer = Kind::String("did:example:issuer123".to_string());
        vc.id = Some("vc-12345".to_string());
        vc.credential_subject = OneMany::One(CredentialSubject {
            id: Some("did:example:holder456".to_string()),
            claims: json!({"nationalID": "A123456789", "name": "Test User"})
                .as_object()
                .cloned()
                .unwrap_or_default(),
        });
        vc.valid_until = Some(Utc.with_ymd_and_hms(2033, 1, 1, 0, 0, 0).unwrap());
        vc
    }

    #[test]
    fn vc_roundtrips_through_json() {
        let vc = sample_vc();
        let json = serde_json::to_value(&vc).expect("serializes");
        assert_eq!(json["type"], json!(["VerifiableCredential", "NationalIDCredential"]));
        assert_eq!(json["credentialSubject"]["nationalID"], json!("A123456789"));

        let back: VerifiableCredential = serde_json::from_value(json).expect("deserializes");
        assert_eq!(back, vc);
    }

    #[test]
    fn vp_builder_requires_holder() {
        let err = VerifiablePresentation::builder()
            .add_context(Kind::String("https://www.w3.org/2018/credentials/examples/v1".into()))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("holder"));
    }

    #[test]
    fn vp_builder_builds_with_embedded_vc() {
        let vc = sample_vc();
        let vp = VerifiablePresentation::builder()
            .add_context(Kind::String("https://www.w3.org/2018/credentials/examples/v1".into()))
            .holder("did:example:holder456")
            .add_credential(Kind::String("eyJ.fake.jws".to_string()))
            .build()
            .expect("builds");
        assert_eq!(vp.holder.as_deref(), Some("did:example:holder456"));
        assert_eq!(vp.verifiable_credential.unwrap().len(), 1);
        let _ = vc;
    }
}
