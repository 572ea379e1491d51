//! Session record and verdict types for the OID4VP state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ErrorBody;

/// Where a `(client_id, nonce)` session sits in the state machine.
/// `NONE` has no record and is represented by the session's absence from
/// the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Oid4VpState {
    /// A presentation definition was registered; no response yet.
    DefinitionRegistered,
    /// An authorization response is being processed.
    ResponsePending,
    /// The response verified successfully.
    Verified,
    /// The response failed verification or the wallet reported failure.
    Rejected,
    /// The session's TTL elapsed before a terminal state was reached.
    Expired,
}

/// The cached outcome of verifying an authorization response.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct VerifyResult {
    /// Whether the presentation verified.
    pub verify_result: bool,
    /// Holder DID, present on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub holder_did: Option<String>,
    /// The rejecting error, present on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

/// A registered `(client_id, nonce)` session.
#[derive(Clone, Debug)]
pub struct Oid4VpSession {
    /// The registered presentation definition blob.
    pub presentation_definition: Value,
    /// The verdict, once a response has been processed.
    pub verdict: Option<VerifyResult>,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// When the session was last mutated.
    pub updated_at: DateTime<Utc>,
    /// Explicit state tag, mirroring `verdict`/age but kept as its own
    /// field so `REJECTED` (wallet-reported failure) and `EXPIRED` (TTL)
    /// are distinguishable from a plain absence of a verdict.
    pub state: Oid4VpState,
}

/// The wallet's authorization response to a presentation request.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AuthorizationResponse {
    /// `client_id` identifying the session.
    pub client_id: String,
    /// `nonce` identifying the session.
    pub nonce: String,
    /// The compact JWS Verifiable Presentation, present on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vp_token: Option<String>,
    /// The DIF Presentation Exchange submission descriptor, present on
    /// success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presentation_submission: Option<Value>,
    /// OAuth-style error code, present when the wallet reports failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Human-readable detail accompanying `error`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

impl AuthorizationResponse {
    /// Whether the wallet reported success (no `error` present).
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.error.is_none()
    }
}
