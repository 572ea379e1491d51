//! # Bitstring Status List
//!
//! Implements the W3C Bitstring Status List v1.0 encoding this engine uses
//! for credential lifecycle state: two bits per credential, gzip-compressed
//! and base64url-encoded, carried as the `encodedList` claim of a signed
//! status-list credential. See `spec.md` §3/§4.E.

pub mod bitstring;
pub mod client;

pub use bitstring::{CredentialState, build_status_list_credential, encode_bitstring};
pub use client::StatusListClient;
