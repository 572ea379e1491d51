//! # Engine Configuration
//!
//! Every timeout, TTL, skew and payload limit the engine enforces is an
//! explicit, constructed value — there is deliberately no `Default` impl
//! for [`EngineConfig`] covering outbound deadlines: `spec.md` §6 treats a
//! missing deadline as a configuration error, not a runtime default.

use std::time::Duration;

use x509_cert::Certificate;

use crate::error::Result;

/// Maximum number of presentations accepted in one
/// `/api/presentation/validation` call.
pub const MAX_PRESENTATIONS_PER_CALL: usize = 100;

/// Maximum size of a single presentation string, in bytes.
pub const MAX_PRESENTATION_BYTES: usize = 1024 * 1024;

/// Maximum aggregate size of all presentations in one call, in bytes.
pub const MAX_AGGREGATE_BYTES: usize = 10 * 1024 * 1024;

/// Maximum number of top-level keys in a `credentialSubject` at issuance.
pub const MAX_SUBJECT_KEYS: usize = 1_000;

/// Maximum length of a single string claim value at issuance.
pub const MAX_SUBJECT_STRING_BYTES: usize = 1024 * 1024;

/// Maximum nesting depth of a `credentialSubject` at issuance.
pub const MAX_SUBJECT_NESTING: usize = 10;

/// Default OID4VP session TTL.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(600);

/// Default outbound HTTP deadline.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(5);

/// Default database operation deadline.
pub const DEFAULT_DB_TIMEOUT: Duration = Duration::from_secs(3);

/// Engine-wide configuration, built explicitly via [`EngineConfigBuilder`].
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// DER-encoded X.509 certificates trusted as mDL issuer roots.
    /// Fixed at construction; adding or removing a root mid-flight is not
    /// supported.
    pub mdl_trust_roots: Vec<Certificate>,

    /// Clock-skew tolerance applied to `iat`/`exp`/`nbf` checks.
    pub temporal_skew: Duration,

    /// TTL for resolved DID keys.
    pub did_cache_ttl: Duration,

    /// TTL for fetched status-list bit reads.
    pub status_cache_ttl: Duration,

    /// TTL for OID4VP `(client_id, nonce)` sessions.
    pub session_ttl: Duration,

    /// Deadline for outbound HTTP calls (DID resolution, status-list
    /// fetch).
    pub http_timeout: Duration,

    /// Deadline for database operations (issuer/verifier record stores).
    pub db_timeout: Duration,
}

impl EngineConfig {
    /// Starts building a config from its mandatory trust-root set.
    #[must_use]
    pub fn builder(mdl_trust_roots: Vec<Certificate>) -> EngineConfigBuilder {
        EngineConfigBuilder {
            mdl_trust_roots,
            temporal_skew: Duration::ZERO,
            did_cache_ttl: Duration::from_secs(300),
            status_cache_ttl: Duration::from_secs(60),
            session_ttl: DEFAULT_SESSION_TTL,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            db_timeout: DEFAULT_DB_TIMEOUT,
        }
    }
}

/// Builds an [`EngineConfig`]. Every field has a spec-mandated default
/// except `mdl_trust_roots`, which has none and must be supplied to
/// [`EngineConfig::builder`].
#[derive(Clone, Debug)]
pub struct EngineConfigBuilder {
    mdl_trust_roots: Vec<Certificate>,
    temporal_skew: Duration,
    did_cache_ttl: Duration,
    status_cache_ttl: Duration,
    session_ttl: Duration,
    http_timeout: Duration,
    db_timeout: Duration,
}

impl EngineConfigBuilder {
    /// Overrides the default zero clock-skew tolerance.
    #[must_use]
    pub const fn temporal_skew(mut self, skew: Duration) -> Self {
        self.temporal_skew = skew;
        self
    }

    /// Overrides the default 300s DID resolution cache TTL.
    #[must_use]
    pub const fn did_cache_ttl(mut self, ttl: Duration) -> Self {
        self.did_cache_ttl = ttl;
        self
    }

    /// Overrides the default 60s status-list read cache TTL.
    #[must_use]
    pub const fn status_cache_ttl(mut self, ttl: Duration) -> Self {
        self.status_cache_ttl = ttl;
        self
    }

    /// Overrides the default 10-minute OID4VP session TTL.
    #[must_use]
    pub const fn session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    /// Overrides the default 5s outbound HTTP deadline.
    #[must_use]
    pub const fn http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    /// Overrides the default 3s database deadline.
    #[must_use]
    pub const fn db_timeout(mut self, timeout: Duration) -> Self {
        self.db_timeout = timeout;
        self
    }

    /// Finalizes the configuration.
    #[must_use]
    pub fn build(self) -> EngineConfig {
        EngineConfig {
            mdl_trust_roots: self.mdl_trust_roots,
            temporal_skew: self.temporal_skew,
            did_cache_ttl: self.did_cache_ttl,
            status_cache_ttl: self.status_cache_ttl,
            session_ttl: self.session_ttl,
            http_timeout: self.http_timeout,
            db_timeout: self.db_timeout,
        }
    }
}

/// Extension point for rate-limiting policy. `spec.md` excludes a concrete
/// policy as a Non-goal; this hook exists so one can be layered onto the
/// validation/issuance call sites without changing their signatures.
pub trait RateLimitHook: Send + Sync {
    /// Called before `op` is allowed to proceed.
    ///
    /// # Errors
    ///
    /// The default implementation never throttles and never errors.
    fn check(&self, op: &str) -> Result<()> {
        let _ = op;
        Ok(())
    }
}

/// The [`RateLimitHook`] every engine component uses unless a caller wires
/// in an actual policy.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoRateLimit;

impl RateLimitHook for NoRateLimit {}
