//! # Issuer Credential Service
//!
//! Issues, queries and transitions the lifecycle of credentials, keeping
//! the in-memory status-list bitstring in lock-step with each record's
//! `status`. See `spec.md` §4.H.
//!
//! A single advisory lock (the store's own [`Mutex`]) serialises bit
//! mutation and list re-signing, matching §5's "a single advisory lock per
//! `statusListCredential` serialises bit-mutation publication; credential
//! generation uses an atomic counter for index allocation."

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use p256::ecdsa::SigningKey;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::{MAX_SUBJECT_KEYS, MAX_SUBJECT_NESTING, MAX_SUBJECT_STRING_BYTES};
use crate::core::{Kind, OneMany};
use crate::error::{Error, Result};
use crate::jose;
use crate::model::{CredentialStatus, CredentialSubject, VcClaims, VerifiableCredential};
use crate::status::bitstring::MIN_LIST_ENTRIES;
use crate::status::{CredentialState, build_status_list_credential, encode_bitstring};

/// Lifecycle status of an issued credential, per `spec.md` §3
/// `IssuerCredentialRecord`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordStatus {
    /// Usable; the default state on issuance.
    Active,
    /// Temporarily unusable; reversible via `Recover`.
    Suspended,
    /// Permanently unusable. Terminal.
    Revoked,
}

impl From<RecordStatus> for CredentialState {
    fn from(value: RecordStatus) -> Self {
        match value {
            RecordStatus::Active => Self::Active,
            RecordStatus::Suspended => Self::Suspended,
            RecordStatus::Revoked => Self::Revoked,
        }
    }
}

/// A request to [`IssuerCredentialService::generate`].
#[derive(Clone, Debug, Deserialize)]
pub struct GenerateRequest {
    /// The issuer's DID; must match the service's configured `issuer_did`.
    pub issuer_did: String,
    /// The holder's DID, placed in `credentialSubject.id` and `vc.sub`.
    pub holder_did: String,
    /// Additional `type` entries beyond `"VerifiableCredential"`.
    pub credential_type: String,
    /// Claims about the subject.
    pub credential_subject: Map<String, Value>,
    /// Optional expiry; a `None` credential never expires.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// The result of a successful [`IssuerCredentialService::generate`] call.
#[derive(Clone, Debug, Serialize)]
pub struct GenerateResponse {
    /// The record's unique identifier.
    pub cid: String,
    /// The compact JWS `VerifiableCredential`.
    pub credential: String,
    /// The nonce this record is also indexed by (equal to `jti`).
    pub nonce: String,
}

/// `spec.md` §3 `IssuerCredentialRecord`.
#[derive(Clone, Debug, Serialize)]
pub struct IssuerCredentialRecord {
    /// Unique identifier.
    pub cid: String,
    /// Issuer DID.
    pub issuer_did: String,
    /// Holder DID.
    pub holder_did: String,
    /// The credential's domain-specific type term.
    pub credential_type: String,
    /// The compact JWS this record was issued as.
    pub issued_jwt: String,
    /// Nonce; equal to the JWS's `jti`.
    pub nonce: String,
    /// Bit position within `status_list_credential`.
    pub status_list_index: usize,
    /// URL of the status-list credential covering this record.
    pub status_list_credential: String,
    /// Current lifecycle state.
    pub status: RecordStatus,
    /// When the credential was issued.
    pub issued_at: DateTime<Utc>,
    /// When the credential expires, if ever.
    pub expires_at: Option<DateTime<Utc>>,
}

/// One status list's in-memory bit vector and its published URL.
struct StatusList {
    url: String,
    states: Vec<CredentialState>,
}

/// In-memory store backing the issuer credential service: records indexed
/// by `cid` and `nonce`, plus the status lists their bits live in.
///
/// A production deployment swaps this for a durable store; the locking
/// discipline here (single mutex, bit mutation followed by re-signing
/// before the in-memory cache is considered authoritative) is what a
/// durable implementation must preserve.
struct IssuerStore {
    records: HashMap<String, IssuerCredentialRecord>,
    nonce_index: HashMap<String, String>,
    lists: Vec<StatusList>,
}

impl IssuerStore {
    fn new() -> Self {
        Self { records: HashMap::new(), nonce_index: HashMap::new(), lists: Vec::new() }
    }
}

/// Issues credentials, tracks their lifecycle, and keeps their status-list
/// bits in sync. See module docs.
pub struct IssuerCredentialService {
    issuer_did: String,
    signing_key: SigningKey,
    kid: String,
    list_base_url: String,
    list_capacity: usize,
    store: Mutex<IssuerStore>,
    next_global_index: AtomicUsize,
}

impl IssuerCredentialService {
    /// Builds a service that signs with `signing_key` under `kid`, issuing
    /// `issuer_did`-attributed credentials and publishing status lists at
    /// `{list_base_url}/{n}`. `list_capacity` bounds entries per list before
    /// rollover to a fresh one (capped at [`MIN_LIST_ENTRIES`], the
    /// Bitstring Status List spec's own minimum).
    #[must_use]
    pub fn new(issuer_did: String, signing_key: SigningKey, kid: String, list_base_url: String, list_capacity: usize) -> Self {
        Self {
            issuer_did,
            signing_key,
            kid,
            list_base_url,
            list_capacity: list_capacity.min(MIN_LIST_ENTRIES),
            store: Mutex::new(IssuerStore::new()),
            next_global_index: AtomicUsize::new(0),
        }
    }

    /// Issues a new credential per `spec.md` §4.H `Generate`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidIssuanceRequest`] if `issuerDID`,
    /// `credentialType` or `credentialSubject` is missing/empty,
    /// [`Error::CredentialSubjectTooLarge`] if the subject exceeds the key
    /// count, string length or nesting limits, and
    /// [`Error::IssuerSigningFailed`] if signing or list publication fails.
    pub fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse> {
        if request.issuer_did.is_empty() || request.issuer_did != self.issuer_did {
            return Err(Error::InvalidIssuanceRequest("issuerDID is missing or unknown".to_string()));
        }
        if request.credential_type.is_empty() {
            return Err(Error::InvalidIssuanceRequest("credentialType is required".to_string()));
        }
        if request.credential_subject.is_empty() {
            return Err(Error::InvalidIssuanceRequest("credentialSubject must be non-empty".to_string()));
        }
        check_subject_limits(&request.credential_subject)?;

        let cid = Uuid::new_v4().to_string();
        let jti = Uuid::new_v4().to_string();
        let now = Utc::now();

        let (list_url, status_list_index) = self.allocate_index();

        let vc = VerifiableCredential {
            id: Some(format!("urn:uuid:{cid}")),
            type_: OneMany::Many(vec!["VerifiableCredential".to_string(), request.credential_type.clone()]),
            issuer: Kind::String(self.issuer_did.clone()),
            credential_subject: OneMany::One(CredentialSubject {
                id: Some(request.holder_did.clone()),
                claims: request.credential_subject.clone(),
            }),
            valid_until: request.expires_at,
            credential_status: Some(OneMany::One(CredentialStatus {
                id: None,
                type_: "BitstringStatusListEntry".to_string(),
                status_list_index,
                status_list_credential: list_url.clone(),
            })),
            ..VerifiableCredential::new()
        };

        let claims = VcClaims {
            iss: self.issuer_did.clone(),
            sub: request.holder_did.clone(),
            iat: now,
            jti: jti.clone(),
            exp: request.expires_at,
            vc,
        };
        let issued_jwt =
            jose::sign_vc(&claims, &self.signing_key, &self.kid).map_err(|e| Error::IssuerSigningFailed(e.to_string()))?;

        let record = IssuerCredentialRecord {
            cid: cid.clone(),
            issuer_did: self.issuer_did.clone(),
            holder_did: request.holder_did.clone(),
            credential_type: request.credential_type.clone(),
            issued_jwt: issued_jwt.clone(),
            nonce: jti.clone(),
            status_list_index,
            status_list_credential: list_url,
            status: RecordStatus::Active,
            issued_at: now,
            expires_at: request.expires_at,
        };

        let mut store = self.store.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        store.nonce_index.insert(jti.clone(), cid.clone());
        store.records.insert(cid.clone(), record);
        debug!(cid, nonce = jti, "issued credential");

        Ok(GenerateResponse { cid, credential: issued_jwt, nonce: jti })
    }

    /// Exact-match fetch by `cid`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CredentialNotFound`] if no record exists.
    pub fn query(&self, cid: &str) -> Result<IssuerCredentialRecord> {
        let store = self.store.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        store.records.get(cid).cloned().ok_or_else(|| Error::CredentialNotFound(cid.to_string()))
    }

    /// Exact-match fetch by `nonce`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CredentialNotFound`] if no record was issued under
    /// that nonce.
    pub fn query_by_nonce(&self, nonce: &str) -> Result<IssuerCredentialRecord> {
        let store = self.store.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let cid = store.nonce_index.get(nonce).ok_or_else(|| Error::CredentialNotFound(nonce.to_string()))?;
        store.records.get(cid).cloned().ok_or_else(|| Error::CredentialNotFound(nonce.to_string()))
    }

    /// Transitions `cid` to `REVOKED`. Idempotent; forbidden only from a
    /// state that is not `REVOKED` and not `ACTIVE`/`SUSPENDED` (there is
    /// none — every non-`REVOKED` state may revoke).
    ///
    /// # Errors
    ///
    /// Returns [`Error::CredentialNotFound`] if `cid` is unknown, or
    /// [`Error::IssuerSigningFailed`] if re-signing the status list fails.
    pub fn revoke(&self, cid: &str) -> Result<()> {
        self.transition(cid, RecordStatus::Revoked, &[RecordStatus::Active, RecordStatus::Suspended, RecordStatus::Revoked])
    }

    /// Transitions `cid` from `ACTIVE` to `SUSPENDED`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CredentialNotFound`] if `cid` is unknown, or
    /// [`Error::IllegalStatusTransition`] if the record is `REVOKED`.
    pub fn suspend(&self, cid: &str) -> Result<()> {
        self.transition(cid, RecordStatus::Suspended, &[RecordStatus::Active, RecordStatus::Suspended])
    }

    /// Transitions `cid` from `SUSPENDED` back to `ACTIVE`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CredentialNotFound`] if `cid` is unknown, or
    /// [`Error::IllegalStatusTransition`] if the record is `REVOKED`.
    pub fn recover(&self, cid: &str) -> Result<()> {
        self.transition(cid, RecordStatus::Active, &[RecordStatus::Active, RecordStatus::Suspended])
    }

    fn transition(&self, cid: &str, to: RecordStatus, allowed_from: &[RecordStatus]) -> Result<()> {
        let mut store = self.store.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let record = store.records.get(cid).ok_or_else(|| Error::CredentialNotFound(cid.to_string()))?;

        if record.status == to {
            return Ok(());
        }
        if !allowed_from.contains(&record.status) {
            return Err(Error::IllegalStatusTransition(format!(
                "cannot move {cid} from {:?} to {to:?}",
                record.status
            )));
        }

        let list_url = record.status_list_credential.clone();
        let index = record.status_list_index;
        let list = store
            .lists
            .iter_mut()
            .find(|l| l.url == list_url)
            .ok_or_else(|| Error::IssuerSystemError(format!("no in-memory list for {list_url}")))?;
        list.states[index] = to.into();
        let encoded = encode_bitstring(&list.states)?;
        let signed = build_status_list_credential(&self.issuer_did, &list_url, &encoded, &self.signing_key, &self.kid)?;
        // The re-signed list is the durable artifact; only after producing it
        // do we flip the in-memory record, per spec.md §4.H's atomicity note.
        publish(&list_url, &signed)?;

        let record = store.records.get_mut(cid).expect("checked above");
        record.status = to;
        debug!(cid, ?to, "credential status transitioned");
        Ok(())
    }

    fn allocate_index(&self) -> (String, usize) {
        let mut store = self.store.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if store.lists.last().is_none_or(|l| l.states.len() >= self.list_capacity) {
            let n = store.lists.len();
            store.lists.push(StatusList { url: format!("{}/{n}", self.list_base_url), states: Vec::new() });
            debug!(list = n, "opened new status list");
        }
        let list = store.lists.last_mut().expect("just ensured non-empty");
        let index = list.states.len();
        list.states.push(CredentialState::Active);
        self.next_global_index.fetch_add(1, Ordering::SeqCst);
        (list.url.clone(), index)
    }
}

/// Publishes a freshly signed status list at its well-known URL.
///
/// This in-memory engine has no outbound publication target; a deployment
/// wires this to the blob store or HTTP endpoint named in `spec.md` §6.
/// Kept as its own function so that seam is easy to find and replace.
fn publish(list_url: &str, _signed_list_jwt: &str) -> Result<()> {
    if list_url.is_empty() {
        return Err(Error::StatusListPublishFailed("empty list URL".to_string()));
    }
    Ok(())
}

fn check_subject_limits(subject: &Map<String, Value>) -> Result<()> {
    if subject.len() > MAX_SUBJECT_KEYS {
        return Err(Error::CredentialSubjectTooLarge(format!(
            "{} keys exceeds the {MAX_SUBJECT_KEYS}-key limit",
            subject.len()
        )));
    }
    for value in subject.values() {
        check_value_limits(value, 1)?;
    }
    Ok(())
}

fn check_value_limits(value: &Value, depth: usize) -> Result<()> {
    if depth > MAX_SUBJECT_NESTING {
        return Err(Error::CredentialSubjectTooLarge(format!("nesting exceeds {MAX_SUBJECT_NESTING} levels")));
    }
    match value {
        Value::String(s) if s.len() > MAX_SUBJECT_STRING_BYTES => {
            warn!(bytes = s.len(), "credentialSubject string value too large");
            Err(Error::CredentialSubjectTooLarge(format!(
                "string value of {} bytes exceeds the {MAX_SUBJECT_STRING_BYTES}-byte limit",
                s.len()
            )))
        }
        Value::Array(items) => items.iter().try_for_each(|v| check_value_limits(v, depth + 1)),
        Value::Object(map) => {
            if map.len() > MAX_SUBJECT_KEYS {
                return Err(Error::CredentialSubjectTooLarge(format!(
                    "{} keys exceeds the {MAX_SUBJECT_KEYS}-key limit",
                    map.len()
                )));
            }
            map.values().try_for_each(|v| check_value_limits(v, depth + 1))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn service() -> IssuerCredentialService {
        let signing_key = SigningKey::random(&mut rand_core::OsRng);
        IssuerCredentialService::new(
            "did:example:issuer123".to_string(),
            signing_key,
            "key-1".to_string(),
            "https://issuer.example/status".to_string(),
            4,
        )
    }

    fn sample_request() -> GenerateRequest {
        GenerateRequest {
            issuer_did: "did:example:issuer123".to_string(),
            holder_did: "did:example:holder456".to_string(),
            credential_type: "NationalIDCredential".to_string(),
            credential_subject: json!({"nationalID": "A123456789"}).as_object().cloned().unwrap_or_default(),
            expires_at: None,
        }
    }

    #[test]
    fn generate_rejects_missing_issuer_did() {
        let svc = service();
        let mut req = sample_request();
        req.issuer_did = String::new();
        let err = svc.generate(&req).unwrap_err();
        assert_eq!(err.code(), 61_001);
    }

    #[test]
    fn generate_rejects_empty_subject() {
        let svc = service();
        let mut req = sample_request();
        req.credential_subject = Map::new();
        let err = svc.generate(&req).unwrap_err();
        assert_eq!(err.code(), 61_001);
    }

    #[test]
    fn generate_rejects_oversized_subject() {
        let svc = service();
        let mut req = sample_request();
        req.credential_subject = json!({"bio": "x".repeat(MAX_SUBJECT_STRING_BYTES + 1)})
            .as_object()
            .cloned()
            .unwrap_or_default();
        let err = svc.generate(&req).unwrap_err();
        assert_eq!(err.code(), 61_002);
    }

    #[test]
    fn generate_then_query_round_trips() {
        let svc = service();
        let resp = svc.generate(&sample_request()).expect("issues");
        let record = svc.query(&resp.cid).expect("found");
        assert_eq!(record.status, RecordStatus::Active);
        let by_nonce = svc.query_by_nonce(&resp.nonce).expect("found");
        assert_eq!(by_nonce.cid, resp.cid);
    }

    #[test]
    fn query_unknown_cid_errors() {
        let svc = service();
        let err = svc.query("no-such-cid").unwrap_err();
        assert_eq!(err.code(), 61_010);
    }

    #[test]
    fn list_rolls_over_at_capacity() {
        let svc = service();
        let mut urls = Vec::new();
        for _ in 0..5 {
            let resp = svc.generate(&sample_request()).expect("issues");
            let record = svc.query(&resp.cid).expect("found");
            urls.push(record.status_list_credential);
        }
        assert_ne!(urls[0], urls[4], "fifth credential should land in a rolled-over list");
    }

    #[test]
    fn revoke_then_suspend_is_illegal() {
        let svc = service();
        let resp = svc.generate(&sample_request()).expect("issues");
        svc.revoke(&resp.cid).expect("revokes");
        let err = svc.suspend(&resp.cid).unwrap_err();
        assert_eq!(err.code(), 61_020);
    }

    #[test]
    fn revoke_is_idempotent() {
        let svc = service();
        let resp = svc.generate(&sample_request()).expect("issues");
        svc.revoke(&resp.cid).expect("revokes");
        svc.revoke(&resp.cid).expect("re-revocation is idempotent");
    }

    #[test]
    fn suspend_then_recover_round_trips() {
        let svc = service();
        let resp = svc.generate(&sample_request()).expect("issues");
        svc.suspend(&resp.cid).expect("suspends");
        assert_eq!(svc.query(&resp.cid).unwrap().status, RecordStatus::Suspended);
        svc.recover(&resp.cid).expect("recovers");
        assert_eq!(svc.query(&resp.cid).unwrap().status, RecordStatus::Active);
    }
}
