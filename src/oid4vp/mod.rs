//! # OID4VP Verifier
//!
//! A session-oriented state machine over `(client_id, nonce)` pairs:
//! presentation-definition registration, authorization-response ingestion
//! (delegating the cryptographic work to [`crate::verifier`]), and verdict
//! polling. See `spec.md` §4.G.

pub mod session;

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::CancellationSignal;
use crate::did::DidResolver;
use crate::error::{Error, Result};
use crate::jose;
use crate::verifier::PresentationValidator;

pub use session::{AuthorizationResponse, Oid4VpSession, Oid4VpState, VerifyResult};

/// Registration mode for [`Oid4VpVerifier::modify_presentation_definition`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModifyMode {
    /// Register (or replace) a session's presentation definition.
    Save,
    /// Remove a session.
    Delete,
}

/// Session store and state machine for OID4VP verification.
pub struct Oid4VpVerifier {
    sessions: Mutex<HashMap<(String, String), Oid4VpSession>>,
    ttl: Duration,
}

impl Oid4VpVerifier {
    /// Builds a verifier whose sessions expire after `ttl` (`spec.md`
    /// defaults this to 10 minutes).
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self { sessions: Mutex::new(HashMap::new()), ttl }
    }

    /// Registers or deletes a `(client_id, nonce)` session's presentation
    /// definition.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IllegalArgument`] if `client_id` or `nonce` is
    /// empty, or if `mode == Save` with no `presentation_definition`.
    pub fn modify_presentation_definition(
        &self,
        mode: ModifyMode,
        client_id: &str,
        nonce: &str,
        presentation_definition: Option<Value>,
    ) -> Result<()> {
        if client_id.is_empty() || nonce.is_empty() {
            return Err(Error::IllegalArgument("client_id and nonce are required".to_string()));
        }
        let key = (client_id.to_string(), nonce.to_string());
        let mut sessions = self.sessions.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        match mode {
            ModifyMode::Save => {
                let pd = presentation_definition.ok_or_else(|| {
                    Error::IllegalArgument("presentation_definition is required for SAVE".to_string())
                })?;
                let now = Utc::now();
                debug!(client_id, nonce, "registering OID4VP presentation definition");
                sessions.insert(
                    key,
                    Oid4VpSession {
                        presentation_definition: pd,
                        verdict: None,
                        created_at: now,
                        updated_at: now,
                        state: Oid4VpState::DefinitionRegistered,
                    },
                );
            }
            ModifyMode::Delete => {
                sessions.remove(&key);
            }
        }
        Ok(())
    }

    /// Ingests a wallet's authorization response: on a wallet-reported
    /// failure, records `REJECTED` verbatim; on success, invokes the VP
    /// validator and cross-checks `nonce`/`aud` against the session key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IllegalArgument`] if no session exists for
    /// `(client_id, nonce)`, propagates validator errors on envelope
    /// failure, and returns a `HolderPublicKeyInconsistent`-family error
    /// if `nonce`/`aud` do not match the session key.
    pub fn verify(
        &self,
        response: &AuthorizationResponse,
        resolver: &dyn DidResolver,
        temporal_skew: Duration,
        validator: &PresentationValidator<'_>,
        cancel: &CancellationSignal,
    ) -> Result<VerifyResult> {
        let key = (response.client_id.clone(), response.nonce.clone());

        if !response.is_success() {
            let result = VerifyResult {
                verify_result: false,
                holder_did: None,
                error: Some(
                    Error::IllegalArgument(format!(
                        "{}: {}",
                        response.error.clone().unwrap_or_default(),
                        response.error_description.clone().unwrap_or_default()
                    ))
                    .body(),
                ),
            };
            self.record(&key, Oid4VpState::Rejected, result.clone())?;
            return Ok(result);
        }

        let vp_token = response
            .vp_token
            .clone()
            .ok_or_else(|| Error::IllegalArgument("vp_token is required on success".to_string()))?;

        self.set_pending(&key)?;

        let result = self.verify_success(&response.client_id, &response.nonce, &vp_token, resolver, temporal_skew, validator, cancel);
        let state = if result.verify_result { Oid4VpState::Verified } else { Oid4VpState::Rejected };
        self.record(&key, state, result.clone())?;
        Ok(result)
    }

    fn verify_success(
        &self,
        client_id: &str,
        nonce: &str,
        vp_token: &str,
        resolver: &dyn DidResolver,
        temporal_skew: Duration,
        validator: &PresentationValidator<'_>,
        cancel: &CancellationSignal,
    ) -> VerifyResult {
        let envelope = match jose::verify_vp(vp_token, resolver, temporal_skew) {
            Ok(c) => c,
            Err(e) => return VerifyResult { verify_result: false, holder_did: None, error: Some(e.body()) },
        };
        if envelope.jti != nonce || envelope.aud != client_id {
            warn!(client_id, nonce, "OID4VP nonce/aud cross-check failed");
            let e = Error::HolderPublicKeyInconsistent(
                "vp envelope nonce/aud does not match the session key".to_string(),
            );
            return VerifyResult { verify_result: false, holder_did: None, error: Some(e.body()) };
        }

        match validator.validate(std::slice::from_ref(&vp_token.to_string()), cancel) {
            Ok(responses) => match responses.into_iter().next() {
                Some(first) if first.valid => {
                    VerifyResult { verify_result: true, holder_did: first.holder_did, error: None }
                }
                Some(first) => VerifyResult { verify_result: false, holder_did: None, error: first.error },
                None => {
                    let e = Error::IllegalArgument("no presentation produced a result".to_string());
                    VerifyResult { verify_result: false, holder_did: None, error: Some(e.body()) }
                }
            },
            Err(e) => {
                warn!(error = %e, "OID4VP authorization response failed validation");
                VerifyResult { verify_result: false, holder_did: None, error: Some(e.body()) }
            }
        }
    }

    /// Reads the cached verdict for `(client_id, nonce)`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IllegalArgument`] if no session exists, or both
    /// `client_id`/`nonce` are empty.
    pub fn get_verify_result(&self, client_id: &str, nonce: &str) -> Result<VerifyResult> {
        if client_id.is_empty() && nonce.is_empty() {
            return Err(Error::IllegalArgument("client_id or nonce is required".to_string()));
        }
        let key = (client_id.to_string(), nonce.to_string());
        let mut sessions = self.sessions.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let session = sessions
            .get_mut(&key)
            .ok_or_else(|| Error::IllegalArgument(format!("no session for ({client_id}, {nonce})")))?;

        if Utc::now() - session.updated_at > chrono::Duration::from_std(self.ttl).unwrap_or_default() {
            session.state = Oid4VpState::Expired;
            return Ok(VerifyResult { verify_result: false, holder_did: None, error: None });
        }
        Ok(session.verdict.clone().unwrap_or_default())
    }

    /// Removes every session whose TTL has elapsed. Intended to run
    /// periodically off the request path.
    pub fn sweep_expired(&self) {
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or_default();
        let now = Utc::now();
        let mut sessions = self.sessions.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        sessions.retain(|_, session| now - session.updated_at <= ttl);
    }

    fn set_pending(&self, key: &(String, String)) -> Result<()> {
        let mut sessions = self.sessions.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let session = sessions
            .get_mut(key)
            .ok_or_else(|| Error::IllegalArgument(format!("no session for {key:?}; SAVE must precede verify")))?;
        session.state = Oid4VpState::ResponsePending;
        session.updated_at = Utc::now();
        Ok(())
    }

    fn record(&self, key: &(String, String), state: Oid4VpState, result: VerifyResult) -> Result<()> {
        let mut sessions = self.sessions.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let session = sessions
            .get_mut(key)
            .ok_or_else(|| Error::IllegalArgument(format!("no session for {key:?}")))?;
        session.state = state;
        session.verdict = Some(result);
        session.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modify_requires_both_key_parts() {
        let verifier = Oid4VpVerifier::new(Duration::from_secs(600));
        let err = verifier
            .modify_presentation_definition(ModifyMode::Save, "", "n-1", Some(serde_json::json!({})))
            .unwrap_err();
        assert_eq!(err.code(), 70_001);
    }

    #[test]
    fn get_result_before_save_is_illegal_argument() {
        let verifier = Oid4VpVerifier::new(Duration::from_secs(600));
        let err = verifier.get_verify_result("C1", "N1").unwrap_err();
        assert_eq!(err.code(), 70_001);
    }

    #[test]
    fn save_registers_definition_registered_state() {
        let verifier = Oid4VpVerifier::new(Duration::from_secs(600));
        verifier
            .modify_presentation_definition(ModifyMode::Save, "C1", "N1", Some(serde_json::json!({"id": "pd-1"})))
            .expect("saves");
        let sessions = verifier.sessions.lock().unwrap();
        let session = sessions.get(&("C1".to_string(), "N1".to_string())).expect("session exists");
        assert_eq!(session.state, Oid4VpState::DefinitionRegistered);
    }
}
