//! A Verifiable Credential / Verifiable Presentation trust engine:
//! ES256 JWS envelopes for W3C Verifiable Credentials and Presentations,
//! ISO/IEC 18013-5 mobile driving licences over COSE/CBOR, Bitstring
//! Status List revocation checks, DID resolution, an OID4VP verifier
//! session state machine, and an issuer credential service. See
//! `SPEC_FULL.md` for the full specification this crate implements.
//!
//! # Feature Flags
//!
//! Both features are enabled by default.
//!
//! * `issuer` - Enables the issuer credential service ([`issuer`]).
//! * `verifier` - Enables presentation validation and the OID4VP verifier
//!   ([`verifier`], [`oid4vp`]).

pub mod config;
pub mod core;
pub mod did;
pub mod error;
pub mod jose;
pub mod mdl;
pub mod model;
pub mod status;

#[cfg(feature = "issuer")]
pub mod issuer;

#[cfg(feature = "verifier")]
pub mod oid4vp;
#[cfg(feature = "verifier")]
pub mod verifier;

/// Re-export of commonly used top-level types.
pub use crate::core::{Kind, OneMany};
pub use crate::error::{Error, ErrorBody, Result};
