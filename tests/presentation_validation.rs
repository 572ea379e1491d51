//! End-to-end presentation validation scenarios, covering spec.md §8's
//! literal S1-S4 and S7 scenarios against the public API.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::time::Duration;

use chrono::Utc;
use p256::ecdsa::SigningKey;
use serde_json::json;
use trustvc::config::EngineConfig;
use trustvc::core::{CancellationSignal, Kind, OneMany};
use trustvc::did::{LocalResolver, PublicKeyJwk};
use trustvc::jose::{sign_vc, sign_vp};
use trustvc::mdl::MdlVerifier;
use trustvc::model::{CredentialStatus, CredentialSubject, VcClaims, VerifiableCredential, VerifiablePresentation, VpClaims};
use trustvc::status::{CredentialState, StatusListClient, build_status_list_credential, encode_bitstring};
use trustvc::verifier::PresentationValidator;

const ISSUER_DID: &str = "did:example:issuer123";
const HOLDER_DID: &str = "did:example:holder456";
const VERIFIER_DID: &str = "did:example:verifier789";

fn keypair() -> (SigningKey, PublicKeyJwk) {
    let signing = SigningKey::random(&mut rand_core::OsRng);
    let jwk = PublicKeyJwk::from_verifying_key(signing.verifying_key());
    (signing, jwk)
}

fn sample_vc(holder_did: &str, exp: chrono::DateTime<Utc>) -> VerifiableCredential {
    VerifiableCredential {
        id: Some("vc-12345".to_string()),
        type_: OneMany::Many(vec!["VerifiableCredential".to_string(), "NationalIDCredential".to_string()]),
        issuer: Kind::String(ISSUER_DID.to_string()),
        credential_subject: OneMany::One(CredentialSubject {
            id: Some(holder_did.to_string()),
            claims: json!({"nationalID": "A123456789", "name": "Test User"}).as_object().cloned().unwrap_or_default(),
        }),
        valid_until: Some(exp),
        ..VerifiableCredential::new()
    }
}

fn sign_test_vc(holder_did: &str, exp: chrono::DateTime<Utc>, issuer_key: &SigningKey, status: Option<CredentialStatus>) -> String {
    let mut vc = sample_vc(holder_did, exp);
    vc.credential_status = status.map(OneMany::One);
    let claims = VcClaims { iss: ISSUER_DID.to_string(), sub: holder_did.to_string(), iat: Utc::now(), jti: "vc-12345".to_string(), exp: Some(exp), vc };
    sign_vc(&claims, issuer_key, "issuer-key-1").expect("signs VC")
}

fn sign_test_vp(holder_did: &str, holder_key: &SigningKey, vcs: Vec<String>) -> String {
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
        aud: VERIFIER_DID.to_string(),
        jti: "nonce-67890".to_string(),
        iat: Utc::now(),
        exp: Utc::now() + chrono::Duration::hours(1),
        vp,
    };
    sign_vp(&claims, holder_key, "holder-key-1").expect("signs VP")
}

fn engine_config() -> EngineConfig {
    EngineConfig::builder(vec![]).build()
}

#[test]
fn s1_happy_vp_vc_round_trips() {
    let (issuer_key, issuer_jwk) = keypair();
    let (holder_key, holder_jwk) = keypair();
    let resolver = LocalResolver::new();
    resolver.register_local_key(ISSUER_DID, None, issuer_jwk);
    resolver.register_local_key(HOLDER_DID, None, holder_jwk);

    let vc = sign_test_vc(HOLDER_DID, Utc::now() + chrono::Duration::hours(24), &issuer_key, None);
    let vp = sign_test_vp(HOLDER_DID, &holder_key, vec![vc]);

    let status_client = StatusListClient::new(Duration::from_secs(60), Duration::from_secs(5));
    let mdl = MdlVerifier::new(vec![]);
    let config = engine_config();
    let validator = PresentationValidator::new(&resolver, &status_client, &mdl, &config);

    let responses = validator.validate(&[vp], &CancellationSignal::new()).expect("validates");
    assert_eq!(responses.len(), 1);
    let response = &responses[0];
    assert!(response.valid);
    assert_eq!(response.holder_did.as_deref(), Some(HOLDER_DID));
    assert_eq!(response.credentials.len(), 1);
    assert!(response.credentials[0].valid);
}

#[test]
fn s2_expired_vc_is_omitted_without_failing_the_vp() {
    let (issuer_key, issuer_jwk) = keypair();
    let (holder_key, holder_jwk) = keypair();
    let resolver = LocalResolver::new();
    resolver.register_local_key(ISSUER_DID, None, issuer_jwk);
    resolver.register_local_key(HOLDER_DID, None, holder_jwk);

    let vc = sign_test_vc(HOLDER_DID, Utc::now() - chrono::Duration::hours(1), &issuer_key, None);
    let vp = sign_test_vp(HOLDER_DID, &holder_key, vec![vc]);

    let status_client = StatusListClient::new(Duration::from_secs(60), Duration::from_secs(5));
    let mdl = MdlVerifier::new(vec![]);
    let config = engine_config();
    let validator = PresentationValidator::new(&resolver, &status_client, &mdl, &config);

    let responses = validator.validate(&[vp], &CancellationSignal::new()).expect("validates");
    let response = &responses[0];
    assert!(response.valid, "a VC failure must not fail the enclosing VP");
    assert_eq!(response.credentials.len(), 1);
    assert!(!response.credentials[0].valid);
    assert!(response.credentials[0].error.is_some());
}

#[test]
fn s3_bad_holder_key_rejects_the_vp() {
    let (_, real_holder_jwk) = keypair();
    let (holder_key, _) = keypair();
    let resolver = LocalResolver::new();
    // Register a *different* key than the one that actually signs below.
    resolver.register_local_key(HOLDER_DID, None, real_holder_jwk);

    let vp = sign_test_vp(HOLDER_DID, &holder_key, vec![]);

    let status_client = StatusListClient::new(Duration::from_secs(60), Duration::from_secs(5));
    let mdl = MdlVerifier::new(vec![]);
    let config = engine_config();
    let validator = PresentationValidator::new(&resolver, &status_client, &mdl, &config);

    let responses = validator.validate(&[vp], &CancellationSignal::new()).expect("validates");
    let response = &responses[0];
    assert!(!response.valid);
    let err = response.error.as_ref().expect("carries an error");
    assert!((71_000..72_000).contains(&err.code));
}

/// Serves `body` once over plain HTTP on `listener`'s already-bound port.
/// Used to exercise [`StatusListClient`]'s real fetch path without a
/// mock-HTTP dependency.
fn serve_on(listener: TcpListener, body: String) {
    std::thread::spawn(move || {
        if let Ok((mut stream, _)) = listener.accept() {
            let mut buf = [0_u8; 2048];
            let _ = stream.read(&mut buf);
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nContent-Type: application/jwt\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            let _ = stream.write_all(response.as_bytes());
        }
    });
}

#[test]
fn s4_revoked_credential_fails_status_check() {
    let (issuer_key, issuer_jwk) = keypair();
    let (holder_key, holder_jwk) = keypair();
    let resolver = LocalResolver::new();
    resolver.register_local_key(ISSUER_DID, None, issuer_jwk);
    resolver.register_local_key(HOLDER_DID, None, holder_jwk);

    let listener = TcpListener::bind("127.0.0.1:0").expect("binds");
    let port = listener.local_addr().expect("has an address").port();
    let list_url = format!("http://127.0.0.1:{port}/status/0");

    let encoded = encode_bitstring(&[CredentialState::Revoked]).expect("encodes");
    let signed_list =
        build_status_list_credential(ISSUER_DID, &list_url, &encoded, &issuer_key, "issuer-key-1").expect("signs list");
    serve_on(listener, signed_list);

    let status = CredentialStatus {
        id: None,
        type_: "BitstringStatusListEntry".to_string(),
        status_list_index: 0,
        status_list_credential: list_url,
    };
    let vc = sign_test_vc(HOLDER_DID, Utc::now() + chrono::Duration::hours(24), &issuer_key, Some(status));
    let vp = sign_test_vp(HOLDER_DID, &holder_key, vec![vc]);

    let status_client = StatusListClient::new(Duration::from_secs(60), Duration::from_secs(5));
    let mdl = MdlVerifier::new(vec![]);
    let config = engine_config();
    let validator = PresentationValidator::new(&resolver, &status_client, &mdl, &config);

    let responses = validator.validate(&[vp], &CancellationSignal::new()).expect("validates");
    let response = &responses[0];
    assert!(response.valid, "status failure is a per-VC failure, not a VP failure");
    assert!(!response.credentials[0].valid);
    assert_eq!(response.credentials[0].error.as_ref().unwrap().code, 72_020);
}

#[test]
fn s7_oversized_batch_is_rejected_before_parsing() {
    let resolver = LocalResolver::new();
    let status_client = StatusListClient::new(Duration::from_secs(60), Duration::from_secs(5));
    let mdl = MdlVerifier::new(vec![]);
    let config = engine_config();
    let validator = PresentationValidator::new(&resolver, &status_client, &mdl, &config);

    let too_many: Vec<String> = (0..101).map(|i| format!("p{i}")).collect();
    let err = validator.validate(&too_many, &CancellationSignal::new()).unwrap_err();
    assert_eq!(err.code(), 71_001);
    assert_eq!(err.http_status(), 400);

    let too_large = vec!["x".repeat(1024 * 1024 + 1)];
    let err = validator.validate(&too_large, &CancellationSignal::new()).unwrap_err();
    assert_eq!(err.code(), 71_001);

    let aggregate_too_large: Vec<String> = (0..11).map(|_| "y".repeat(1024 * 1024)).collect();
    let err = validator.validate(&aggregate_too_large, &CancellationSignal::new()).unwrap_err();
    assert_eq!(err.code(), 71_001);
}

#[test]
fn cancellation_aborts_a_batch_validation() {
    let resolver = LocalResolver::new();
    let status_client = StatusListClient::new(Duration::from_secs(60), Duration::from_secs(5));
    let mdl = MdlVerifier::new(vec![]);
    let config = engine_config();
    let validator = PresentationValidator::new(&resolver, &status_client, &mdl, &config);

    let cancel = CancellationSignal::new();
    cancel.cancel();
    let err = validator.validate(&["eyJ.fake.jws".to_string()], &cancel).unwrap_err();
    assert_eq!(err.code(), 99_999);
}
