//! # Error Taxonomy
//!
//! Stable, numbered error codes shared by the issuer, verifier and wallet
//! collaborators. Codes are grouped by subsystem and the grouping itself is
//! part of the external contract — do not renumber an existing variant.
//!
//! | Range | Subsystem |
//! |-------|-----------|
//! | `61xxx` | credential issuance |
//! | `62xxx` | status-list generation |
//! | `63xxx` | DID frontend (issuer-side resolution) |
//! | `68xxx` | database |
//! | `69xxx` | issuer system |
//! | `70001` | illegal argument |
//! | `71xxx` | VP validation |
//! | `72xxx` | VC validation |
//! | `73xxx` | status-list validation |
//! | `74xxx` | DID query (verifier-side resolution) |
//! | `77xxx` | connection / fetch |
//! | `78xxx` | database read paths (verifier) |
//! | `99999` | unknown / cancelled |

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The engine's error type. Every variant carries a stable numeric code
/// (via [`Error::code`]) and an HTTP status (via [`Error::http_status`]).
#[derive(Error, Debug)]
pub enum Error {
    // ---- 61xxx credential issuance -------------------------------------
    /// The issuance request is malformed (missing `issuerDID`,
    /// `credentialType`, or an empty `credentialSubject`).
    #[error("invalid issuance request: {0}")]
    InvalidIssuanceRequest(String),

    /// A `credentialSubject` value exceeded a configured size/nesting/key
    /// count limit.
    #[error("credential subject too large: {0}")]
    CredentialSubjectTooLarge(String),

    /// The issuer's signing key could not produce a signature.
    #[error("issuer signing failed: {0}")]
    IssuerSigningFailed(String),

    /// No record exists for the requested `cid` / nonce.
    #[error("credential not found: {0}")]
    CredentialNotFound(String),

    /// A lifecycle transition (revoke/suspend/recover) is not legal from
    /// the record's current status.
    #[error("illegal credential status transition: {0}")]
    IllegalStatusTransition(String),

    // ---- 62xxx status-list generation -----------------------------------
    /// `statusListIndex` fell outside the configured bitstring size.
    #[error("status index out of range: {0}")]
    StatusIndexOutOfRange(String),

    /// Compression or encoding of the bitstring failed.
    #[error("status list encoding failed: {0}")]
    StatusListEncodingFailed(String),

    /// The freshly-signed status list credential could not be published.
    #[error("status list publish failed: {0}")]
    StatusListPublishFailed(String),

    // ---- 63xxx DID frontend (issuer side) -------------------------------
    /// The issuer could not resolve a DID it needed (e.g. its own key).
    #[error("DID frontend query failed: {0}")]
    DidFrontendQueryFailed(String),

    // ---- 68xxx database --------------------------------------------------
    /// A database read failed.
    #[error("database read failed: {0}")]
    DbReadFailed(String),

    /// A database write failed.
    #[error("database write failed: {0}")]
    DbWriteFailed(String),

    // ---- 69xxx issuer system ----------------------------------------------
    /// An unexpected condition internal to the issuer system.
    #[error("issuer system error: {0}")]
    IssuerSystemError(String),

    // ---- 70001 illegal argument --------------------------------------------
    /// A caller-supplied argument combination is not permitted (e.g. an
    /// OID4VP `SAVE` missing `client_id`/`nonce`/`presentation_definition`,
    /// or `getVerifyResult` called with no session key).
    #[error("illegal argument: {0}")]
    IllegalArgument(String),

    // ---- 71xxx VP validation -----------------------------------------------
    /// The presentation validation request violated an input limit (too
    /// many presentations, a presentation too large, or the aggregate
    /// payload too large).
    #[error("invalid presentation validation request: {0}")]
    InvalidPresentationValidationRequest(String),

    /// The presentation envelope's format could not be determined.
    #[error("unrecognised presentation format: {0}")]
    UnrecognisedPresentationFormat(String),

    /// The VP envelope's JWS/COSE signature failed to verify, or its
    /// temporal claims were out of range.
    #[error("VP proof verification failed: {0}")]
    VpProofError(String),

    /// The holder key bound to the VP is inconsistent with the embedded
    /// VCs, or (in OID4VP) with the session's `client_id`/`nonce`.
    #[error("holder public key inconsistent: {0}")]
    HolderPublicKeyInconsistent(String),

    /// An mDL `IssuerSignedItem` digest did not match the value recorded
    /// in the Mobile Security Object.
    #[error("mDL digest mismatch: {0}")]
    MdlDigestMismatch(String),

    /// The mDL issuer certificate did not chain to a configured trust
    /// root, or failed key-usage / validity checks.
    #[error("mDL certificate chain invalid: {0}")]
    MdlCertChainInvalid(String),

    /// The mDL device signature over the device-authentication structure
    /// failed to verify, or was absent.
    #[error("mDL device signature invalid: {0}")]
    MdlDeviceSignatureInvalid(String),

    /// The mDL's `validityInfo` window did not cover the current time.
    #[error("mDL temporal validation failed: {0}")]
    MdlTemporalInvalid(String),

    // ---- 72xxx VC validation -----------------------------------------------
    /// A required VC claim was absent or malformed.
    #[error("VC claim missing or malformed: {0}")]
    VcClaimMalformed(String),

    /// `vc.sub` did not equal the enclosing VP's holder DID.
    #[error("VC subject does not match VP holder: {0}")]
    VcSubjectMismatch(String),

    /// The VC envelope's JWS signature failed to verify.
    #[error("VC proof verification failed: {0}")]
    VcProofError(String),

    /// The VC's status (via its `credentialStatus` entry) was not
    /// `ACTIVE`.
    #[error("VC status check failed: {0}")]
    VcStatusError(String),

    // ---- 73xxx status-list validation --------------------------------------
    /// The `statusListCredential` could not be fetched.
    #[error("status list fetch failed: {0}")]
    StatusListFetchFailed(String),

    /// The fetched status list credential's signature did not verify.
    #[error("status list signature invalid: {0}")]
    StatusListSignatureInvalid(String),

    // ---- 74xxx DID query (verifier side) -----------------------------------
    /// The verifier could not resolve a DID needed to verify a signature.
    #[error("DID query failed: {0}")]
    DidQueryFailed(String),

    // ---- 77xxx connection / fetch -------------------------------------------
    /// An outbound HTTP call exceeded its deadline.
    #[error("connection timed out: {0}")]
    ConnectionTimeout(String),

    /// An outbound HTTP call failed for a reason other than a timeout.
    #[error("fetch failed: {0}")]
    FetchFailed(String),

    // ---- 78xxx database read paths (verifier) -------------------------------
    /// A verifier-side database read failed (e.g. OID4VP session lookup).
    #[error("verifier database read failed: {0}")]
    VerifierDbReadFailed(String),

    // ---- 99999 unknown / cancelled -------------------------------------------
    /// The operation was cancelled via its cancellation signal before
    /// completion.
    #[error("operation cancelled")]
    Cancelled,

    /// A catch-all for conditions that do not fit another variant. Kept
    /// narrow on purpose — prefer adding a named variant over reaching for
    /// this.
    #[error("unknown error: {0}")]
    Unknown(String),
}

impl Error {
    /// The stable numeric code for this error.
    #[must_use]
    pub const fn code(&self) -> i32 {
        match self {
            Self::InvalidIssuanceRequest(_) => 61_001,
            Self::CredentialSubjectTooLarge(_) => 61_002,
            Self::IssuerSigningFailed(_) => 61_006,
            Self::CredentialNotFound(_) => 61_010,
            Self::IllegalStatusTransition(_) => 61_020,

            Self::StatusIndexOutOfRange(_) => 62_001,
            Self::StatusListEncodingFailed(_) => 62_002,
            Self::StatusListPublishFailed(_) => 62_010,

            Self::DidFrontendQueryFailed(_) => 63_001,

            Self::DbReadFailed(_) => 68_001,
            Self::DbWriteFailed(_) => 68_002,

            Self::IssuerSystemError(_) => 69_001,

            Self::IllegalArgument(_) => 70_001,

            Self::InvalidPresentationValidationRequest(_) => 71_001,
            Self::UnrecognisedPresentationFormat(_) => 71_002,
            Self::VpProofError(_) => 71_003,
            Self::HolderPublicKeyInconsistent(_) => 71_004,
            Self::MdlDigestMismatch(_) => 71_010,
            Self::MdlCertChainInvalid(_) => 71_011,
            Self::MdlDeviceSignatureInvalid(_) => 71_012,
            Self::MdlTemporalInvalid(_) => 71_013,

            Self::VcClaimMalformed(_) => 72_001,
            Self::VcSubjectMismatch(_) => 72_002,
            Self::VcProofError(_) => 72_010,
            Self::VcStatusError(_) => 72_020,

            Self::StatusListFetchFailed(_) => 73_001,
            Self::StatusListSignatureInvalid(_) => 73_002,

            Self::DidQueryFailed(_) => 74_001,

            Self::ConnectionTimeout(_) => 77_001,
            Self::FetchFailed(_) => 77_002,

            Self::VerifierDbReadFailed(_) => 78_001,

            Self::Cancelled | Self::Unknown(_) => 99_999,
        }
    }

    /// The HTTP status this error maps to, per the external contract: `400`
    /// for `71001`, `72001..=72008`, `61001` and `61006`; `404` for
    /// `61010`; `500` for everything else.
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        match self.code() {
            71_001 | 61_001 | 61_006 => 400,
            c if c >= 72_001 && c <= 72_008 => 400,
            61_010 => 404,
            _ => 500,
        }
    }

    /// The client-safe message: input errors are returned verbatim,
    /// cryptographic failures are replaced with a generic sentence so the
    /// wire body never leaks library names or internal causes. The full
    /// cause should be logged by the caller via `tracing::error!` before
    /// this is constructed.
    #[must_use]
    pub fn sanitized_message(&self) -> String {
        match self {
            Self::VpProofError(_)
            | Self::HolderPublicKeyInconsistent(_)
            | Self::MdlDigestMismatch(_)
            | Self::MdlCertChainInvalid(_)
            | Self::MdlDeviceSignatureInvalid(_)
            | Self::MdlTemporalInvalid(_) => "VP validation failed".to_string(),
            Self::VcProofError(_) => "VC validation failed".to_string(),
            Self::Cancelled => "operation cancelled".to_string(),
            _ => self.to_string(),
        }
    }

    /// The wire-format error body, `{"code": N, "message": "..."}`.
    #[must_use]
    pub fn body(&self) -> ErrorBody {
        ErrorBody { code: self.code(), message: self.sanitized_message() }
    }
}

/// The JSON error body returned to clients.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    /// Stable numeric error code, see module documentation.
    pub code: i32,
    /// Client-safe message; never contains stack traces or library names.
    pub message: String,
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_mapping() {
        assert_eq!(Error::InvalidPresentationValidationRequest("x".into()).http_status(), 400);
        assert_eq!(Error::VcClaimMalformed("x".into()).http_status(), 400);
        assert_eq!(Error::InvalidIssuanceRequest("x".into()).http_status(), 400);
        assert_eq!(Error::IssuerSigningFailed("x".into()).http_status(), 400);
        assert_eq!(Error::CredentialNotFound("x".into()).http_status(), 404);
        assert_eq!(Error::VpProofError("x".into()).http_status(), 500);
        assert_eq!(Error::Cancelled.http_status(), 500);
    }

    #[test]
    fn sanitizes_crypto_failures() {
        let err = Error::VpProofError("signature mismatch over ES256 curve".into());
        assert_eq!(err.sanitized_message(), "VP validation failed");
        assert!(!err.sanitized_message().contains("ES256"));
    }

    #[test]
    fn cancelled_body_matches_spec() {
        let body = Error::Cancelled.body();
        assert_eq!(body, ErrorBody { code: 99_999, message: "operation cancelled".to_string() });
    }
}
