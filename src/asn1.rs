//! X.509 / ASN.1 utilities shared by merchant construction and signature
//! verification: OID handling, Apple extension extraction, and the
//! validity-window check with its "unknown authority" fallback.
//!
//! The DER-walking style here (`der_parser::ber::{BerObject, BerObjectContent}`,
//! dispatch on `item.tag().0`, `BerObjectContent::Unknown(any)` plus a
//! recursive `der_parser::parse_der` for tagged primitives) mirrors how
//! Android Key Attestation's `KeyDescription`/`AuthorizationList` extension is
//! walked elsewhere in this codebase's lineage; CMS has no typed crate in our
//! dependency stack, so the same manual approach carries it.

use chrono::{DateTime, Utc};
use der_parser::oid::Oid;
use x509_parser::certificate::X509Certificate;
use x509_parser::extensions::X509Extension;

use crate::error::{Error, Result};

/// Apple's merchant/processing-certificate merchant-ID-hash extension.
pub const MERCHANT_ID_HASH_OID: &[u64] = &[1, 2, 840, 113635, 100, 6, 32];
/// Present on Apple's Payment Processing intermediate certificate.
pub const INTERMEDIATE_EXTENSION_OID: &[u64] = &[1, 2, 840, 113635, 100, 6, 2, 14];
/// Present on Apple's Payment Processing leaf certificate.
pub const LEAF_EXTENSION_OID: &[u64] = &[1, 2, 840, 113635, 100, 6, 29];

pub fn oid(components: &[u64]) -> Oid<'static> {
    Oid::from(components).expect("static OID constant is well-formed")
}

/// Finds a certificate extension by OID, ignoring its value.
pub fn find_extension<'a>(
    cert: &'a X509Certificate<'a>,
    target: &Oid,
) -> Option<&'a X509Extension<'a>> {
    cert.extensions().iter().find(|ext| &ext.oid == target)
}

/// Returns whether `cert` carries the given extension OID at all. Apple's
/// intermediate/leaf checks only care about presence, not the value.
pub fn has_extension(cert: &X509Certificate, target: &Oid) -> bool {
    find_extension(cert, target).is_some()
}

/// Extracts and validates Apple's merchant-ID-hash extension.
///
/// The extension value is ASCII: `@.` followed by 64 lowercase hex digits
/// encoding the 32-byte SHA-256 of the merchant identifier. Total length 66.
pub fn extract_merchant_hash(cert: &X509Certificate) -> Result<[u8; 32]> {
    let target = oid(MERCHANT_ID_HASH_OID);
    let ext = find_extension(cert, &target)
        .ok_or_else(|| Error::Config("certificate is missing the merchant-ID extension".into()))?;

    let value = ext.value;
    if value.len() != 66 {
        return Err(Error::Config(format!(
            "invalid merchant-ID hash extension length: {}",
            value.len()
        )));
    }
    // First two bytes are the literal ASCII "@." prefix Apple prepends.
    let hex_digits = &value[2..];
    let mut hash = [0u8; 32];
    hex::decode_to_slice(hex_digits, &mut hash)
        .map_err(|e| Error::Config(format!("invalid merchant-ID hash hex: {e}")))?;
    Ok(hash)
}

/// Checks that `cert` is currently within its validity window.
///
/// Mirrors the source library's behavior: a proper chain-of-trust check is
/// attempted when `issuer` is available; if that fails (as it typically does
/// for these certificates, which do not chain to a system trust store) the
/// check degrades to a plain date-window comparison, matching the original's
/// "unknown authority -> date window only" fallback.
pub fn check_validity(cert: &X509Certificate, issuer: Option<&X509Certificate>) -> Result<()> {
    let now = Utc::now();
    let not_before = asn1_time_to_chrono(cert.validity().not_before);
    let not_after = asn1_time_to_chrono(cert.validity().not_after);

    if let Some(issuer_cert) = issuer {
        match cert.verify_signature(Some(issuer_cert.public_key())) {
            Ok(()) => {}
            Err(e) => {
                tracing::warn!(
                    error = ?e,
                    "certificate chain-of-trust check failed, falling back to date-window check"
                );
            }
        }
    } else {
        tracing::warn!("no issuer available for chain-of-trust check, using date-window check only");
    }

    if now < not_before || now > not_after {
        return Err(Error::Config(
            "certificate is expired or not yet valid".into(),
        ));
    }
    Ok(())
}

fn asn1_time_to_chrono(t: x509_parser::time::ASN1Time) -> DateTime<Utc> {
    DateTime::from_timestamp(t.timestamp(), 0).unwrap_or_else(|| DateTime::from_timestamp(0, 0).unwrap())
}
