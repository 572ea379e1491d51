//! X.509 trust-chain validation for mDL issuer certificates.
//!
//! Validates a leaf-to-root chain (as carried in a COSE `x5chain` header
//! label) against a fixed set of configured trust roots, per ISO/IEC
//! 18013-5's requirements on certificate validity and key usage.

use chrono::{DateTime, Utc};
use der::Encode;
use p256::ecdsa::signature::Verifier;
use p256::ecdsa::{Signature, VerifyingKey};
use x509_cert::Certificate;
use x509_cert::der::Decode;
use x509_cert::der::oid::AssociatedOid;
use x509_cert::ext::pkix::{ExtendedKeyUsage, KeyUsage, KeyUsages};

use crate::error::{Error, Result};

/// The extended-key-usage OID ISO/IEC 18013-5 reserves for mdoc issuer
/// (document signer) certificates.
const MDL_DOC_SIGNER_EKU: &str = "1.0.18013.5.1.2";

/// Parses a `x5chain` header value (ordered leaf-first) into certificates.
///
/// # Errors
///
/// Returns [`Error::MdlCertChainInvalid`] if any entry is not a valid
/// DER-encoded X.509 certificate.
pub fn parse_chain(der_certs: &[Vec<u8>]) -> Result<Vec<Certificate>> {
    if der_certs.is_empty() {
        return Err(Error::MdlCertChainInvalid("x5chain is empty".to_string()));
    }
    der_certs
        .iter()
        .map(|der| {
            Certificate::from_der(der)
                .map_err(|e| Error::MdlCertChainInvalid(format!("parsing certificate: {e}")))
        })
        .collect()
}

fn verifying_key(cert: &Certificate) -> Result<VerifyingKey> {
    let spki = &cert.tbs_certificate.subject_public_key_info;
    VerifyingKey::from_sec1_bytes(
        spki.subject_public_key
            .as_bytes()
            .ok_or_else(|| Error::MdlCertChainInvalid("unaligned public key bitstring".to_string()))?,
    )
    .map_err(|e| Error::MdlCertChainInvalid(format!("non-EC-P256 certificate key: {e}")))
}

fn check_validity(cert: &Certificate, now: DateTime<Utc>) -> Result<()> {
    let validity = &cert.tbs_certificate.validity;
    let not_before: DateTime<Utc> = validity.not_before.to_date_time().into();
    let not_after: DateTime<Utc> = validity.not_after.to_date_time().into();
    if now < not_before || now > not_after {
        return Err(Error::MdlCertChainInvalid(format!(
            "certificate not valid at {now} (window {not_before}..{not_after})"
        )));
    }
    Ok(())
}

fn check_leaf_key_usage(cert: &Certificate) -> Result<()> {
    let Some(extensions) = &cert.tbs_certificate.extensions else {
        return Err(Error::MdlCertChainInvalid(
            "issuer certificate carries no extensions".to_string(),
        ));
    };

    let mut has_digital_signature = false;
    let mut has_mdl_eku = false;
    for ext in extensions {
        if ext.extn_id == KeyUsage::OID && let Ok(ku) = KeyUsage::from_der(ext.extn_value.as_bytes()) {
            has_digital_signature = ku.0.contains(KeyUsages::DigitalSignature);
        }
        if ext.extn_id == ExtendedKeyUsage::OID
            && let Ok(eku) = ExtendedKeyUsage::from_der(ext.extn_value.as_bytes())
        {
            has_mdl_eku = eku.0.iter().any(|oid| oid.to_string() == MDL_DOC_SIGNER_EKU);
        }
    }

    if !has_digital_signature {
        return Err(Error::MdlCertChainInvalid(
            "issuer certificate missing digitalSignature key usage".to_string(),
        ));
    }
    if !has_mdl_eku {
        return Err(Error::MdlCertChainInvalid(
            "issuer certificate missing mdoc document-signer EKU".to_string(),
        ));
    }
    Ok(())
}

fn issuer_signed(subject: &Certificate, issuer: &Certificate) -> Result<()> {
    let issuer_key = verifying_key(issuer)?;
    let tbs = subject
        .tbs_certificate
        .to_der()
        .map_err(|e| Error::MdlCertChainInvalid(format!("re-encoding TBS certificate: {e}")))?;
    let sig_bytes = subject
        .signature
        .as_bytes()
        .ok_or_else(|| Error::MdlCertChainInvalid("unaligned certificate signature".to_string()))?;
    let signature = Signature::from_der(sig_bytes)
        .or_else(|_| Signature::from_slice(sig_bytes))
        .map_err(|e| Error::MdlCertChainInvalid(format!("malformed certificate signature: {e}")))?;
    issuer_key
        .verify(&tbs, &signature)
        .map_err(|e| Error::MdlCertChainInvalid(format!("certificate signature invalid: {e}")))
}

/// Validates `chain` (leaf-first) against `trust_roots`, checking signature
/// linkage between adjacent certificates, leaf key usage, and validity
/// windows for every certificate. Returns the leaf's verifying key.
///
/// # Errors
///
/// Returns [`Error::MdlCertChainInvalid`] on any failure: an unanchored
/// chain, a broken signature link, expired/not-yet-valid certificates, or a
/// leaf missing the mdoc document-signer key usage.
pub fn validate_chain(
    chain: &[Certificate],
    trust_roots: &[Certificate],
    now: DateTime<Utc>,
) -> Result<VerifyingKey> {
    let leaf = chain.first().ok_or_else(|| Error::MdlCertChainInvalid("empty chain".to_string()))?;
    check_validity(leaf, now)?;
    check_leaf_key_usage(leaf)?;

    for pair in chain.windows(2) {
        check_validity(&pair[1], now)?;
        issuer_signed(&pair[0], &pair[1])?;
    }

    let tail = chain.last().unwrap_or(leaf);
    let anchored = trust_roots.iter().any(|root| {
        root.tbs_certificate.subject == tail.tbs_certificate.issuer && issuer_signed(tail, root).is_ok()
    }) || trust_roots.contains(tail);
    if !anchored {
        return Err(Error::MdlCertChainInvalid(
            "certificate chain does not anchor to a configured trust root".to_string(),
        ));
    }

    verifying_key(leaf)
}
