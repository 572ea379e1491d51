//! End-to-end OID4VP verifier scenarios, covering spec.md §8's S6 scenario
//! and the session-state invariants from §4.G.

use std::time::Duration;

use chrono::Utc;
use p256::ecdsa::SigningKey;
use serde_json::json;
use trustvc::config::EngineConfig;
use trustvc::core::{CancellationSignal, Kind, OneMany};
use trustvc::did::{LocalResolver, PublicKeyJwk};
use trustvc::jose::{sign_vc, sign_vp};
use trustvc::mdl::MdlVerifier;
use trustvc::model::{CredentialSubject, VcClaims, VerifiableCredential, VerifiablePresentation, VpClaims};
use trustvc::oid4vp::{AuthorizationResponse, ModifyMode, Oid4VpState, Oid4VpVerifier};
use trustvc::status::StatusListClient;
use trustvc::verifier::PresentationValidator;

const ISSUER_DID: &str = "did:example:issuer123";
const HOLDER_DID: &str = "did:example:holder456";

fn keypair() -> (SigningKey, PublicKeyJwk) {
    let signing = SigningKey::random(&mut rand_core::OsRng);
    let jwk = PublicKeyJwk::from_verifying_key(signing.verifying_key());
    (signing, jwk)
}

fn sign_test_vc(holder_did: &str, exp: chrono::DateTime<Utc>, issuer_key: &SigningKey) -> String {
    let vc = VerifiableCredential {
        id: Some("vc-12345".to_string()),
        type_: OneMany::Many(vec!["VerifiableCredential".to_string(), "NationalIDCredential".to_string()]),
        issuer: Kind::String(ISSUER_DID.to_string()),
        credential_subject: OneMany::One(CredentialSubject {
            id: Some(holder_did.to_string()),
            claims: json!({"nationalID": "A123456789"}).as_object().cloned().unwrap_or_default(),
        }),
        valid_until: Some(exp),
        ..VerifiableCredential::new()
    };
    let claims = VcClaims { iss: ISSUER_DID.to_string(), sub: holder_did.to_string(), iat: Utc::now(), jti: "vc-12345".to_string(), exp: Some(exp), vc };
    sign_vc(&claims, issuer_key, "issuer-key-1").expect("signs VC")
}

/// Signs a VP whose envelope `jti`/`aud` line up with the `(client_id,
/// nonce)` pair an OID4VP session is keyed on.
fn sign_test_vp(holder_did: &str, holder_key: &SigningKey, client_id: &str, nonce: &str, vcs: Vec<String>) -> String {
    let vp = VerifiablePresentation::builder()
        .holder(holder_did)
        .add_context(Kind::String("https://www.w3.org/2018/credentials/examples/v1".into()))
        .build()
        .expect("builds");
    let mut vp = vp;
    vp.verifiable_credential = Some(vcs.into_iter().map(Kind::String).collect());
    let claims = VpClaims {
        iss: holder_did.to_string(),
        sub: holder_did.to_string(),
        aud: client_id.to_string(),
        jti: nonce.to_string(),
        iat: Utc::now(),
        exp: Utc::now() + chrono::Duration::hours(1),
        vp,
    };
    sign_vp(&claims, holder_key, "holder-key-1").expect("signs VP")
}

#[test]
fn get_result_before_any_save_is_illegal_argument() {
    let verifier = Oid4VpVerifier::new(Duration::from_secs(600));
    let err = verifier.get_verify_result("C1", "N1").unwrap_err();
    assert_eq!(err.code(), 70_001);
}

#[test]
fn save_without_a_response_yet_reports_no_verdict() {
    let verifier = Oid4VpVerifier::new(Duration::from_secs(600));
    verifier
        .modify_presentation_definition(ModifyMode::Save, "C1", "N1", Some(json!({"id": "pd-1"})))
        .expect("saves");

    // A freshly SAVEd session exists but has no verdict yet, distinct from
    // no session existing at all (IllegalArgument).
    let result = verifier.get_verify_result("C1", "N1").expect("session exists");
    assert!(!result.verify_result);
    assert!(result.holder_did.is_none());
}

#[test]
fn s6_full_save_verify_result_round_trip() {
    let (issuer_key, issuer_jwk) = keypair();
    let (holder_key, holder_jwk) = keypair();
    let resolver = LocalResolver::new();
    resolver.register_local_key(ISSUER_DID, None, issuer_jwk);
    resolver.register_local_key(HOLDER_DID, None, holder_jwk);

    let client_id = "C1";
    let nonce = "N1";

    let verifier = Oid4VpVerifier::new(Duration::from_secs(600));
    verifier
        .modify_presentation_definition(
            ModifyMode::Save,
            client_id,
            nonce,
            Some(json!({"id": "pd-1", "input_descriptors": []})),
        )
        .expect("SAVE registers the presentation definition");

    let vc = sign_test_vc(HOLDER_DID, Utc::now() + chrono::Duration::hours(24), &issuer_key);
    let vp_token = sign_test_vp(HOLDER_DID, &holder_key, client_id, nonce, vec![vc]);

    let status_client = StatusListClient::new(Duration::from_secs(60), Duration::from_secs(5));
    let mdl = MdlVerifier::new(vec![]);
    let config = EngineConfig::builder(vec![]).build();
    let validator = PresentationValidator::new(&resolver, &status_client, &mdl, &config);

    let response = AuthorizationResponse {
        client_id: client_id.to_string(),
        nonce: nonce.to_string(),
        vp_token: Some(vp_token),
        presentation_submission: Some(json!({"id": "sub-1"})),
        error: None,
        error_description: None,
    };

    let result = verifier
        .verify(&response, &resolver, Duration::from_secs(30), &validator, &CancellationSignal::new())
        .expect("verifies");
    assert!(result.verify_result);
    assert_eq!(result.holder_did.as_deref(), Some(HOLDER_DID));

    let polled = verifier.get_verify_result(client_id, nonce).expect("reads cached verdict");
    assert!(polled.verify_result);
    assert_eq!(polled.holder_did.as_deref(), Some(HOLDER_DID));
}

#[test]
fn wallet_reported_error_is_recorded_as_rejected_verbatim() {
    let resolver = LocalResolver::new();
    let verifier = Oid4VpVerifier::new(Duration::from_secs(600));
    verifier
        .modify_presentation_definition(ModifyMode::Save, "C1", "N1", Some(json!({"id": "pd-1"})))
        .expect("saves");

    let status_client = StatusListClient::new(Duration::from_secs(60), Duration::from_secs(5));
    let mdl = MdlVerifier::new(vec![]);
    let config = EngineConfig::builder(vec![]).build();
    let validator = PresentationValidator::new(&resolver, &status_client, &mdl, &config);

    let response = AuthorizationResponse {
        client_id: "C1".to_string(),
        nonce: "N1".to_string(),
        vp_token: None,
        presentation_submission: None,
        error: Some("access_denied".to_string()),
        error_description: Some("the holder declined to share".to_string()),
    };

    let result = verifier
        .verify(&response, &resolver, Duration::from_secs(30), &validator, &CancellationSignal::new())
        .expect("records the rejection without erroring");
    assert!(!result.verify_result);
    assert!(result.error.is_some());

    let polled = verifier.get_verify_result("C1", "N1").expect("reads cached verdict");
    assert!(!polled.verify_result);
}

#[test]
fn nonce_mismatch_rejects_even_a_validly_signed_vp() {
    let (issuer_key, issuer_jwk) = keypair();
    let (holder_key, holder_jwk) = keypair();
    let resolver = LocalResolver::new();
    resolver.register_local_key(ISSUER_DID, None, issuer_jwk);
    resolver.register_local_key(HOLDER_DID, None, holder_jwk);

    let verifier = Oid4VpVerifier::new(Duration::from_secs(600));
    verifier
        .modify_presentation_definition(ModifyMode::Save, "C1", "N1", Some(json!({"id": "pd-1"})))
        .expect("saves");

    let vc = sign_test_vc(HOLDER_DID, Utc::now() + chrono::Duration::hours(24), &issuer_key);
    // Signed for a *different* nonce than the session it is posted against.
    let vp_token = sign_test_vp(HOLDER_DID, &holder_key, "C1", "wrong-nonce", vec![vc]);

    let status_client = StatusListClient::new(Duration::from_secs(60), Duration::from_secs(5));
    let mdl = MdlVerifier::new(vec![]);
    let config = EngineConfig::builder(vec![]).build();
    let validator = PresentationValidator::new(&resolver, &status_client, &mdl, &config);

    let response = AuthorizationResponse {
        client_id: "C1".to_string(),
        nonce: "N1".to_string(),
        vp_token: Some(vp_token),
        presentation_submission: Some(json!({"id": "sub-1"})),
        error: None,
        error_description: None,
    };

    let result = verifier
        .verify(&response, &resolver, Duration::from_secs(30), &validator, &CancellationSignal::new())
        .expect("the mismatch is reported as a verdict, not a hard error");
    assert!(!result.verify_result);
    assert!(result.error.is_some());
}

#[test]
fn verify_without_a_prior_save_is_illegal_argument() {
    let resolver = LocalResolver::new();
    let verifier = Oid4VpVerifier::new(Duration::from_secs(600));
    let status_client = StatusListClient::new(Duration::from_secs(60), Duration::from_secs(5));
    let mdl = MdlVerifier::new(vec![]);
    let config = EngineConfig::builder(vec![]).build();
    let validator = PresentationValidator::new(&resolver, &status_client, &mdl, &config);

    let response = AuthorizationResponse {
        client_id: "never-saved".to_string(),
        nonce: "never-saved".to_string(),
        vp_token: Some("eyJ.fake.jws".to_string()),
        presentation_submission: None,
        error: None,
        error_description: None,
    };

    let err = verifier
        .verify(&response, &resolver, Duration::from_secs(30), &validator, &CancellationSignal::new())
        .unwrap_err();
    assert_eq!(err.code(), 70_001);
}

#[test]
fn expired_session_reads_as_expired_with_no_verdict() {
    let verifier = Oid4VpVerifier::new(Duration::from_millis(1));
    verifier
        .modify_presentation_definition(ModifyMode::Save, "C1", "N1", Some(json!({"id": "pd-1"})))
        .expect("saves");

    std::thread::sleep(Duration::from_millis(20));

    let result = verifier.get_verify_result("C1", "N1").expect("a stale session reads, it does not error");
    assert!(!result.verify_result);
    assert!(result.holder_did.is_none());
}

#[test]
fn delete_removes_the_session_outright() {
    let verifier = Oid4VpVerifier::new(Duration::from_secs(600));
    verifier
        .modify_presentation_definition(ModifyMode::Save, "C1", "N1", Some(json!({"id": "pd-1"})))
        .expect("saves");
    verifier
        .modify_presentation_definition(ModifyMode::Delete, "C1", "N1", None)
        .expect("deletes");

    let err = verifier.get_verify_result("C1", "N1").unwrap_err();
    assert_eq!(err.code(), 70_001);
}

#[test]
fn sweep_expired_evicts_stale_sessions_but_keeps_fresh_ones() {
    let verifier = Oid4VpVerifier::new(Duration::from_millis(1));
    verifier
        .modify_presentation_definition(ModifyMode::Save, "stale", "n", Some(json!({"id": "pd-1"})))
        .expect("saves");
    std::thread::sleep(Duration::from_millis(20));

    let fresh = Oid4VpVerifier::new(Duration::from_secs(600));
    fresh
        .modify_presentation_definition(ModifyMode::Save, "fresh", "n", Some(json!({"id": "pd-1"})))
        .expect("saves");

    verifier.sweep_expired();
    assert_eq!(verifier.get_verify_result("stale", "n").unwrap_err().code(), 70_001);

    fresh.sweep_expired();
    // A freshly SAVEd session has no verdict yet but is not past its TTL,
    // so get_verify_result must still find the record (not IllegalArgument).
    let result = fresh.get_verify_result("fresh", "n").expect("still within TTL");
    assert!(!result.verify_result);
}

#[test]
fn oid4vp_state_enum_round_trips_through_serde() {
    let states = [
        Oid4VpState::DefinitionRegistered,
        Oid4VpState::ResponsePending,
        Oid4VpState::Verified,
        Oid4VpState::Rejected,
        Oid4VpState::Expired,
    ];
    for state in states {
        let json = serde_json::to_string(&state).expect("serializes");
        let back: Oid4VpState = serde_json::from_str(&json).expect("deserializes");
        assert_eq!(state, back);
    }
}
