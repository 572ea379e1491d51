//! Generation side: turns a credential's lifecycle state into the two-bit
//! encoding the status list carries, and packs a full list of states into
//! the compressed, base64url bitstring published as `encodedList`.

use std::io::Write;

use bitvec::order::Lsb0;
use bitvec::vec::BitVec;
use bitvec::view::BitView;
use chrono::Utc;
use flate2::Compression;
use flate2::write::GzEncoder;
use p256::ecdsa::SigningKey;
use serde_json::{Map, Value};

use crate::core::{Kind, OneMany};
use crate::error::{Error, Result};
use crate::jose;
use crate::model::{CredentialSubject, VcClaims, VerifiableCredential};

/// The minimum list length mandated by the Bitstring Status List
/// specification (16 Kib of bits).
pub const MIN_LIST_ENTRIES: usize = 131_072;

/// The lifecycle state of a single credential, encoded as the two-bit
/// pattern `spec.md` §3 assigns it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CredentialState {
    /// `00`
    Active,
    /// `01`
    Suspended,
    /// `11`
    Revoked,
}

impl CredentialState {
    const fn bits(self) -> (bool, bool) {
        match self {
            Self::Active => (false, false),
            Self::Suspended => (false, true),
            Self::Revoked => (true, true),
        }
    }

    /// Decodes a two-bit pattern. `(true, false)` (`10`) is reserved and has
    /// no defined meaning in this engine's status scheme.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StatusListEncodingFailed`] for the reserved `10`
    /// pattern.
    pub fn from_bits(high: bool, low: bool) -> Result<Self> {
        match (high, low) {
            (false, false) => Ok(Self::Active),
            (false, true) => Ok(Self::Suspended),
            (true, true) => Ok(Self::Revoked),
            (true, false) => Err(Error::StatusListEncodingFailed(
                "reserved status bit pattern `10`".to_string(),
            )),
        }
    }
}

/// Builds the gzip-compressed, base64url-encoded bitstring for `states`,
/// where `states[i]` is the lifecycle state of the credential at list index
/// `i`. The list is padded to [`MIN_LIST_ENTRIES`] entries (all `Active`)
/// when shorter.
///
/// # Errors
///
/// Returns [`Error::StatusIndexOutOfRange`] if `states` is longer than
/// [`MIN_LIST_ENTRIES`], and [`Error::StatusListEncodingFailed`] if gzip
/// compression fails.
pub fn encode_bitstring(states: &[CredentialState]) -> Result<String> {
    if states.len() > MIN_LIST_ENTRIES {
        return Err(Error::StatusIndexOutOfRange(format!(
            "{} entries exceeds the {MIN_LIST_ENTRIES}-entry list",
            states.len()
        )));
    }

    let mut bits: BitVec<u8, Lsb0> = BitVec::with_capacity(MIN_LIST_ENTRIES * BITS_PER_CREDENTIAL);
    for state in states {
        let (high, low) = state.bits();
        bits.push(high);
        bits.push(low);
    }
    for _ in states.len()..MIN_LIST_ENTRIES {
        bits.push(false);
        bits.push(false);
    }

    let raw: Vec<u8> = bits.into_vec();
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&raw)
        .and_then(|()| encoder.finish())
        .map(|compressed| base64ct::Base64UrlUnpadded::encode_string(&compressed))
        .map_err(|e| Error::StatusListEncodingFailed(e.to_string()))
}

/// Number of bits a single credential's status occupies in the list.
const BITS_PER_CREDENTIAL: usize = 2;

/// Builds and signs a status-list credential publishing `encoded_list` at
/// `list_url`, per `spec.md` §3's `StatusListEntry` shape: a `VC` whose
/// `credentialSubject.encodedList` carries the compressed bitstring.
///
/// # Errors
///
/// Returns [`Error::StatusListPublishFailed`] if signing fails.
pub fn build_status_list_credential(
    issuer_did: &str,
    list_url: &str,
    encoded_list: &str,
    signing_key: &SigningKey,
    kid: &str,
) -> Result<String> {
    let mut claims = Map::new();
    claims.insert("type".to_string(), Value::String("BitstringStatusList".to_string()));
    claims.insert("encodedList".to_string(), Value::String(encoded_list.to_string()));

    let vc = VerifiableCredential {
        id: Some(list_url.to_string()),
        type_: OneMany::Many(vec![
            "VerifiableCredential".to_string(),
            "BitstringStatusListCredential".to_string(),
        ]),
        issuer: Kind::String(issuer_did.to_string()),
        credential_subject: OneMany::One(CredentialSubject {
            id: Some(format!("{list_url}#list")),
            claims,
        }),
        ..VerifiableCredential::new()
    };

    let now = Utc::now();
    let claims = VcClaims {
        iss: issuer_did.to_string(),
        sub: list_url.to_string(),
        iat: now,
        jti: list_url.to_string(),
        exp: None,
        vc,
    };

    jose::sign_vc(&claims, signing_key, kid).map_err(|e| Error::StatusListPublishFailed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_then_read_back_active_and_revoked() {
        let states = vec![CredentialState::Active, CredentialState::Revoked, CredentialState::Suspended];
        let encoded = encode_bitstring(&states).expect("encodes");
        let state = super::client::decode_bit(&encoded, 1).expect("decodes");
        assert_eq!(state, CredentialState::Revoked);
        let state = super::client::decode_bit(&encoded, 2).expect("decodes");
        assert_eq!(state, CredentialState::Suspended);
        let state = super::client::decode_bit(&encoded, 0).expect("decodes");
        assert_eq!(state, CredentialState::Active);
    }

    #[test]
    fn rejects_oversized_list() {
        let states = vec![CredentialState::Active; MIN_LIST_ENTRIES + 1];
        let err = encode_bitstring(&states).unwrap_err();
        assert_eq!(err.code(), 62_001);
    }
}
