//! PKCS#7/CMS signature verification (§4.3).
//!
//! No crate in this dependency stack models CMS `SignedData` directly, so it
//! is walked by hand with `der_parser::ber::{BerObject, BerObjectContent}` —
//! the same style this codebase uses elsewhere to walk an unmodeled
//! extension structure: `Sequence`/`Set` for structural nodes, `Unknown(any)`
//! plus a recursive `der_parser::parse_der` for context-tagged fields.

use chrono::{DateTime, TimeZone, Utc};
use der_parser::asn1_rs::FromDer;
use der_parser::ber::{BerObject, BerObjectContent};
use p256::ecdsa::signature::Verifier as _;
use rsa::pkcs1v15::Pkcs1v15Sign;
use sha2::{Digest, Sha256};
use x509_parser::certificate::X509Certificate;
use x509_parser::public_key::PublicKey;

use crate::asn1::{self, INTERMEDIATE_EXTENSION_OID, LEAF_EXTENSION_OID};
use crate::config::runtime_config;
use crate::error::{Error, Result};

use super::canonical::canonicalize;
use super::types::{PkPaymentToken, Version};

/// The OID for the CMS `signingTime` signed attribute (RFC 5652 §11.3).
const SIGNING_TIME_OID: &[u64] = &[1, 2, 840, 113549, 1, 9, 5];
/// The OID for the CMS `messageDigest` signed attribute (RFC 5652 §11.2).
const MESSAGE_DIGEST_OID: &[u64] = &[1, 2, 840, 113549, 1, 9, 4];

struct SignerInfo {
    digest_algorithm_oid: Vec<u64>,
    signature_algorithm_oid: Vec<u64>,
    signed_attrs_content: Option<Vec<u8>>,
    signing_time: Option<DateTime<Utc>>,
    signature: Vec<u8>,
}

struct Pkcs7SignedData {
    certificates: Vec<Vec<u8>>,
    signer_info: SignerInfo,
}

/// Verifies `token`'s CMS signature against Apple's certificate chain and
/// the signing-time replay window, returning the leaf certificate's raw DER
/// on success (callers use it to pull the public key for key recovery).
pub fn verify_signature(token: &PkPaymentToken) -> Result<()> {
    let version = token.version()?;

    let signed_data = parse_pkcs7_signed_data(&token.payment_data.signature)?;

    if signed_data.certificates.len() != 2 {
        return Err(Error::Signature(format!(
            "expected exactly 2 certificates in the CMS envelope, got {}",
            signed_data.certificates.len()
        )));
    }
    let leaf_der = &signed_data.certificates[0];
    let intermediate_der = &signed_data.certificates[1];

    let root = load_root_certificate()?;
    let (_, leaf): (_, X509Certificate) = X509Certificate::from_der(leaf_der)
        .map_err(|e| Error::Signature(format!("cannot parse leaf certificate: {e}")))?;
    let (_, intermediate): (_, X509Certificate) = X509Certificate::from_der(intermediate_der)
        .map_err(|e| Error::Signature(format!("cannot parse intermediate certificate: {e}")))?;
    let (_, root_cert): (_, X509Certificate) = X509Certificate::from_der(&root)
        .map_err(|e| Error::Signature(format!("cannot parse root certificate: {e}")))?;

    if !asn1::has_extension(&intermediate, &asn1::oid(INTERMEDIATE_EXTENSION_OID)) {
        return Err(Error::Signature(
            "invalid intermediate cert Apple extension".into(),
        ));
    }
    if !asn1::has_extension(&leaf, &asn1::oid(LEAF_EXTENSION_OID)) {
        return Err(Error::Signature("invalid leaf cert Apple extension".into()));
    }

    intermediate
        .verify_signature(Some(root_cert.public_key()))
        .map_err(|e| Error::Signature(format!("intermediate not signed by root: {e}")))?;
    leaf.verify_signature(Some(intermediate.public_key()))
        .map_err(|e| Error::Signature(format!("leaf not signed by intermediate: {e}")))?;

    let signed_bytes = canonicalize(token)?;
    verify_signer_info(&signed_data.signer_info, &leaf, version, &signed_bytes)?;

    verify_signing_time(&signed_data.signer_info, token)?;

    Ok(())
}

fn load_root_certificate() -> Result<Vec<u8>> {
    let path = &runtime_config().apple_root_certificate_path;
    let pem = std::fs::read(path)
        .map_err(|e| Error::Signature(format!("cannot read root certificate file: {e}")))?;

    let (rest, parsed) = x509_parser::pem::parse_x509_pem(&pem)
        .map_err(|e| Error::Signature(format!("root certificate is not valid PEM: {e}")))?;
    if !rest.is_empty() {
        return Err(Error::Signature(
            "root certificate file must contain exactly one PEM block".into(),
        ));
    }

    let (_, cert): (_, X509Certificate) = X509Certificate::from_der(&parsed.contents)
        .map_err(|e| Error::Signature(format!("cannot parse root certificate: {e}")))?;
    if !cert.is_ca() {
        return Err(Error::Signature(
            "root certificate is not a CA certificate".into(),
        ));
    }

    Ok(parsed.contents)
}

fn verify_signer_info(
    signer_info: &SignerInfo,
    leaf: &X509Certificate,
    version: Version,
    signed_bytes: &[u8],
) -> Result<()> {
    // The CMS signature covers the DER encoding of signedAttrs re-tagged from
    // the `[0] IMPLICIT` context tag to a `SET OF` (tag 0x31), per RFC 5652
    // §5.4. When no signed attributes are present, the content digest itself
    // is what's signed — not exercised by Apple Pay tokens, which always
    // carry a messageDigest/signingTime attribute set, so that path is not
    // implemented here.
    let signed_attrs = signer_info
        .signed_attrs_content
        .as_ref()
        .ok_or_else(|| Error::Signature("CMS signerInfo is missing signed attributes".into()))?;

    let message_digest = Sha256::digest(signed_bytes);
    let claimed_digest = find_message_digest(signed_attrs)
        .ok_or_else(|| Error::Signature("CMS signerInfo is missing messageDigest".into()))?;
    if claimed_digest != message_digest.as_slice() {
        return Err(Error::Signature(
            "messageDigest does not match canonicalized content".into(),
        ));
    }

    let message = rebuild_set_of_der(signed_attrs);

    let public_key = leaf
        .public_key()
        .parsed()
        .map_err(|e| Error::Signature(format!("cannot parse leaf public key: {e}")))?;

    match (version, public_key) {
        (Version::EcV1, PublicKey::EC(point)) => {
            let verifying_key = p256::ecdsa::VerifyingKey::from_sec1_bytes(point.data())
                .map_err(|e| Error::Signature(format!("invalid leaf EC public key: {e}")))?;
            let sig = p256::ecdsa::Signature::from_der(&signer_info.signature)
                .map_err(|e| Error::Signature(format!("invalid ECDSA signature encoding: {e}")))?;
            verifying_key
                .verify(&message, &sig)
                .map_err(|e| Error::Signature(format!("ECDSA signature verification failed: {e}")))
        }
        (Version::RsaV1, PublicKey::RSA(rsa_pk)) => {
            let public_key = rsa::RsaPublicKey::new(
                rsa::BigUint::from_bytes_be(rsa_pk.modulus),
                rsa::BigUint::from_bytes_be(rsa_pk.exponent),
            )
            .map_err(|e| Error::Signature(format!("invalid leaf RSA public key: {e}")))?;
            let digest = Sha256::digest(&message);
            public_key
                .verify(Pkcs1v15Sign::new::<Sha256>(), &digest, &signer_info.signature)
                .map_err(|e| Error::Signature(format!("RSA signature verification failed: {e}")))
        }
        _ => Err(Error::Signature(
            "leaf certificate key type does not match token version".into(),
        )),
    }
}

fn verify_signing_time(signer_info: &SignerInfo, token: &PkPaymentToken) -> Result<()> {
    let signing_time = signer_info
        .signing_time
        .ok_or_else(|| Error::Signature("CMS signerInfo is missing signingTime".into()))?;

    let reference_time = token.transaction_time.unwrap_or_else(Utc::now);
    let delta = reference_time.signed_duration_since(signing_time);

    if delta < chrono::Duration::seconds(-1) {
        return Err(Error::Replay(
            "transaction occurred before signing".into(),
        ));
    }
    let window = runtime_config().transaction_time_window;
    if delta > chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX) {
        return Err(Error::Replay(
            "signing time is outside the transaction time window".into(),
        ));
    }
    Ok(())
}

/// Re-tags a raw `[0] IMPLICIT` content octet range as a `SET OF` (0x31) DER
/// value: the content bytes are identical between the IMPLICIT and SET
/// encodings for a definite-length value, only the outer tag/length header
/// differs.
fn rebuild_set_of_der(content: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(content.len() + 4);
    out.push(0x31);
    out.extend_from_slice(&der_length(content.len()));
    out.extend_from_slice(content);
    out
}

fn der_length(len: usize) -> Vec<u8> {
    if len < 0x80 {
        vec![len as u8]
    } else {
        let bytes = len.to_be_bytes();
        let first_nonzero = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len() - 1);
        let trimmed = &bytes[first_nonzero..];
        let mut out = vec![0x80 | trimmed.len() as u8];
        out.extend_from_slice(trimmed);
        out
    }
}

fn parse_pkcs7_signed_data(der: &[u8]) -> Result<Pkcs7SignedData> {
    let (_, content_info) =
        der_parser::parse_der(der).map_err(|e| Error::Signature(format!("cannot parse signature: {e}")))?;

    let content_info_items = sequence_items(&content_info)
        .ok_or_else(|| Error::Signature("cannot parse signature: expected ContentInfo SEQUENCE".into()))?;
    if content_info_items.len() != 2 {
        return Err(Error::Signature(
            "cannot parse signature: malformed ContentInfo".into(),
        ));
    }

    let signed_data_seq = unwrap_explicit(&content_info_items[1])
        .ok_or_else(|| Error::Signature("cannot parse signature: malformed ContentInfo content".into()))?;
    let signed_data_items = sequence_items(&signed_data_seq)
        .ok_or_else(|| Error::Signature("cannot parse signature: expected SignedData SEQUENCE".into()))?;

    let mut certificates = Vec::new();
    let mut signer_info_obj = None;

    // `signerInfos` is a plain (untagged) `SET OF SignerInfo`, so der_parser
    // already hands back its elements as typed objects; the first one is
    // used directly rather than re-extracted from a raw byte span the way
    // `certificates` (an `[0] IMPLICIT SET OF Certificate`, typed `Unknown`)
    // has to be.
    for item in &signed_data_items[3..] {
        match &item.content {
            BerObjectContent::Unknown(any) if item.tag().0 == 0 => {
                certificates = split_der_sequence(any.data)?;
            }
            BerObjectContent::Set(items) if signer_info_obj.is_none() => {
                signer_info_obj = items.first().map(BerObject::to_owned);
            }
            _ => {}
        }
    }

    let signer_info_obj = signer_info_obj
        .ok_or_else(|| Error::Signature("cannot parse signature: no SignerInfo present".into()))?;
    let signer_info = parse_signer_info(&signer_info_obj)?;

    Ok(Pkcs7SignedData {
        certificates,
        signer_info,
    })
}

fn parse_signer_info(obj: &BerObject) -> Result<SignerInfo> {
    let items = sequence_items(obj)
        .ok_or_else(|| Error::Signature("cannot parse SignerInfo: expected SEQUENCE".into()))?;

    let mut digest_algorithm_oid = None;
    let mut signature_algorithm_oid = None;
    let mut signed_attrs_content = None;
    let mut signature = None;

    for item in items.iter().skip(2) {
        match &item.content {
            BerObjectContent::Sequence(seq_items) if digest_algorithm_oid.is_none() => {
                digest_algorithm_oid = oid_from_first_item(seq_items);
            }
            BerObjectContent::Unknown(any) if item.tag().0 == 0 => {
                signed_attrs_content = Some(any.data.to_vec());
            }
            BerObjectContent::Sequence(seq_items) if signature_algorithm_oid.is_none() => {
                signature_algorithm_oid = oid_from_first_item(seq_items);
            }
            BerObjectContent::OctetString(bytes) => {
                signature = Some(bytes.to_vec());
            }
            _ => {}
        }
    }

    let signature = signature
        .ok_or_else(|| Error::Signature("cannot parse SignerInfo: missing signature".into()))?;
    let signing_time = signed_attrs_content
        .as_deref()
        .and_then(find_signing_time);

    Ok(SignerInfo {
        digest_algorithm_oid: digest_algorithm_oid.unwrap_or_default(),
        signature_algorithm_oid: signature_algorithm_oid.unwrap_or_default(),
        signed_attrs_content,
        signing_time,
        signature,
    })
}

fn oid_from_first_item(items: &[BerObject]) -> Option<Vec<u64>> {
    items.first().and_then(|item| match &item.content {
        BerObjectContent::OID(oid) => oid.iter().map(|it| it.collect()),
        _ => None,
    })
}

/// Walks a SET/SEQUENCE-OF's raw content bytes, splitting it into the raw
/// DER encoding of each element (used for both `certificates` and
/// `signerInfos`, whose IMPLICIT/explicit framing differs but whose content
/// octets are just concatenated element encodings either way).
fn split_der_sequence(mut data: &[u8]) -> Result<Vec<Vec<u8>>> {
    let mut out = Vec::new();
    while !data.is_empty() {
        let (rest, _obj) = der_parser::parse_der(data)
            .map_err(|e| Error::Signature(format!("malformed DER sequence element: {e}")))?;
        let consumed = data.len() - rest.len();
        out.push(data[..consumed].to_vec());
        data = rest;
    }
    Ok(out)
}

fn sequence_items<'a>(obj: &'a BerObject<'a>) -> Option<Vec<BerObject<'a>>> {
    match &obj.content {
        BerObjectContent::Sequence(items) => Some(items.iter().map(BerObject::to_owned).collect()),
        _ => None,
    }
}

/// Unwraps a `[N] EXPLICIT` tagged value, returning the inner object.
fn unwrap_explicit<'a>(obj: &'a BerObject<'a>) -> Option<BerObject<'a>> {
    match &obj.content {
        BerObjectContent::Unknown(any) => {
            der_parser::parse_der(any.data).ok().map(|(_, inner)| inner.to_owned())
        }
        _ => Some(obj.to_owned()),
    }
}

/// Reads one definite-length BER/DER TLV off the front of `data`, returning
/// `(tag, content, rest)`. CMS and X.509 structures never use indefinite
/// length, so that form isn't handled.
fn read_tlv(data: &[u8]) -> Option<(u8, &[u8], &[u8])> {
    let tag = *data.first()?;
    let first_len_byte = *data.get(1)?;
    let (len, header_len) = if first_len_byte & 0x80 == 0 {
        (first_len_byte as usize, 2)
    } else {
        let n = (first_len_byte & 0x7F) as usize;
        if n == 0 || n > 8 {
            return None;
        }
        let mut len: usize = 0;
        for b in data.get(2..2 + n)? {
            len = (len << 8) | *b as usize;
        }
        (len, 2 + n)
    };
    let content = data.get(header_len..header_len + len)?;
    let rest = data.get(header_len + len..)?;
    Some((tag, content, rest))
}

/// Finds a signed attribute by OID within a `signedAttrs` content span and
/// returns its single value's raw content octets.
///
/// Reads the `Attribute ::= SEQUENCE { type OID, values SET OF AttributeValue }`
/// structure byte-by-byte rather than through `der_parser`'s typed
/// `BerObjectContent`: `AttributeValue` is `ANY`, and for the two attributes
/// this crate reads (`messageDigest`'s `OCTET STRING`, `signingTime`'s
/// `UTCTime`/`GeneralizedTime`) the content octets are all that's needed —
/// reading them untyped sidesteps having to match every possible concrete
/// variant `der_parser` might produce for a time value.
fn find_attribute_raw_value(signed_attrs_content: &[u8], target_oid: &[u64]) -> Option<Vec<u8>> {
    let attrs = split_der_sequence(signed_attrs_content).ok()?;
    let target_oid_content = oid_der_content(target_oid)?;

    for attr_der in &attrs {
        let (seq_tag, seq_content, _) = read_tlv(attr_der)?;
        if seq_tag != 0x30 {
            continue;
        }
        let (oid_tag, oid_content, rest) = read_tlv(seq_content)?;
        if oid_tag != 0x06 || oid_content != target_oid_content.as_slice() {
            continue;
        }
        let (set_tag, set_content, _) = read_tlv(rest)?;
        if set_tag != 0x31 {
            continue;
        }
        let (_, value_content, _) = read_tlv(set_content)?;
        return Some(value_content.to_vec());
    }
    None
}

/// Encodes an OID's DER content octets (the bytes after the `0x06`
/// tag/length header): first arc pair packed as `40*X + Y`, remaining arcs
/// base-128 with the continuation bit set on all but the last byte.
fn oid_der_content(components: &[u64]) -> Option<Vec<u8>> {
    if components.len() < 2 {
        return None;
    }
    let mut out = vec![(components[0] * 40 + components[1]) as u8];
    for &arc in &components[2..] {
        let mut chunk = vec![(arc & 0x7F) as u8];
        let mut arc = arc >> 7;
        while arc > 0 {
            chunk.push(0x80 | (arc & 0x7F) as u8);
            arc >>= 7;
        }
        chunk.reverse();
        out.extend_from_slice(&chunk);
    }
    Some(out)
}

fn find_signing_time(signed_attrs_content: &[u8]) -> Option<DateTime<Utc>> {
    let raw = find_attribute_raw_value(signed_attrs_content, SIGNING_TIME_OID)?;
    parse_asn1_time(&raw)
}

/// Extracts the CMS `messageDigest` signed attribute's raw octet-string
/// value, to be compared against the SHA-256 of the canonicalized payload
/// before the CMS signature itself is trusted.
fn find_message_digest(signed_attrs_content: &[u8]) -> Option<Vec<u8>> {
    find_attribute_raw_value(signed_attrs_content, MESSAGE_DIGEST_OID)
}

/// Parses a UTCTime (`YYMMDDHHMMSSZ`) or GeneralizedTime
/// (`YYYYMMDDHHMMSSZ`) value.
fn parse_asn1_time(raw: &[u8]) -> Option<DateTime<Utc>> {
    let s = std::str::from_utf8(raw).ok()?;
    let s = s.trim_end_matches('Z');
    if s.len() == 12 {
        // UTCTime: two-digit year, 1950-2049 per RFC 5280.
        let (year2, rest) = s.split_at(2);
        let year2: i32 = year2.parse().ok()?;
        let year = if year2 < 50 { 2000 + year2 } else { 1900 + year2 };
        parse_time_fields(year, rest)
    } else if s.len() == 14 {
        let (year4, rest) = s.split_at(4);
        let year: i32 = year4.parse().ok()?;
        parse_time_fields(year, rest)
    } else {
        None
    }
}

fn parse_time_fields(year: i32, rest: &str) -> Option<DateTime<Utc>> {
    if rest.len() != 10 {
        return None;
    }
    let month: u32 = rest[0..2].parse().ok()?;
    let day: u32 = rest[2..4].parse().ok()?;
    let hour: u32 = rest[4..6].parse().ok()?;
    let minute: u32 = rest[6..8].parse().ok()?;
    let second: u32 = rest[8..10].parse().ok()?;
    Utc.with_ymd_and_hms(year, month, day, hour, minute, second)
        .single()
}


/// Builds a synthetic root/intermediate/leaf chain and a hand-assembled CMS
/// `SignedData` over it, so `verify_signature` can be exercised end to end
/// without a real Apple-issued token. This is also the regression test for
/// the messageDigest check: a payload tampered with after signing must be
/// rejected even though the CMS signature itself still verifies.
#[cfg(test)]
mod signed_data_tests {
    use aes_gcm::aead::generic_array::typenum::U16;
    use aes_gcm::aead::{Aead, KeyInit, Payload};
    use aes_gcm::{aes::Aes256, AesGcm};
    use p256::ecdsa::signature::Signer as _;
    use p256::ecdsa::{Signature as EcdsaSignature, SigningKey};
    use p256::elliptic_curve::ecdh::diffie_hellman;
    use p256::pkcs8::{DecodePrivateKey, EncodePublicKey};
    use pretty_assertions::assert_eq;

    use crate::merchant::MerchantBuilder;
    use crate::token::key_recovery::derive_encryption_key;
    use crate::token::orchestrator::decrypt_token;
    use crate::token::types::{Header, PaymentData, PaymentMethod};

    use super::*;

    const SHA256_OID: &[u64] = &[2, 16, 840, 1, 101, 3, 4, 2, 1];
    const ECDSA_WITH_SHA256_OID: &[u64] = &[1, 2, 840, 10045, 4, 3, 2];
    const ID_DATA_OID: &[u64] = &[1, 2, 840, 113549, 1, 7, 1];
    const ID_SIGNED_DATA_OID: &[u64] = &[1, 2, 840, 113549, 1, 7, 2];
    const CONTENT_TYPE_ATTR_OID: &[u64] = &[1, 2, 840, 113549, 1, 9, 3];

    struct SyntheticChain {
        root_pem: String,
        leaf_der: Vec<u8>,
        intermediate_der: Vec<u8>,
        leaf_signing_key: SigningKey,
    }

    fn build_synthetic_chain() -> SyntheticChain {
        let root_key = rcgen::KeyPair::generate().unwrap();
        let mut root_params = rcgen::CertificateParams::new(Vec::new()).unwrap();
        root_params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        let root_cert = root_params.self_signed(&root_key).unwrap();

        let intermediate_key = rcgen::KeyPair::generate().unwrap();
        let mut intermediate_params = rcgen::CertificateParams::new(Vec::new()).unwrap();
        intermediate_params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        intermediate_params
            .custom_extensions
            .push(rcgen::CustomExtension::from_oid_content(
                INTERMEDIATE_EXTENSION_OID,
                b"present".to_vec(),
            ));
        let intermediate_cert = intermediate_params
            .signed_by(&intermediate_key, &root_cert, &root_key)
            .unwrap();

        let leaf_key = rcgen::KeyPair::generate().unwrap();
        let mut leaf_params = rcgen::CertificateParams::new(Vec::new()).unwrap();
        leaf_params
            .custom_extensions
            .push(rcgen::CustomExtension::from_oid_content(
                LEAF_EXTENSION_OID,
                b"present".to_vec(),
            ));
        let leaf_cert = leaf_params
            .signed_by(&leaf_key, &intermediate_cert, &intermediate_key)
            .unwrap();

        let leaf_signing_key = SigningKey::from_pkcs8_der(&leaf_key.serialize_der()).unwrap();

        SyntheticChain {
            root_pem: root_cert.pem(),
            leaf_der: leaf_cert.der().to_vec(),
            intermediate_der: intermediate_cert.der().to_vec(),
            leaf_signing_key,
        }
    }

    fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
        let mut out = vec![tag];
        out.extend(der_length(content.len()));
        out.extend_from_slice(content);
        out
    }

    fn sequence(items: &[Vec<u8>]) -> Vec<u8> {
        tlv(0x30, &items.concat())
    }

    fn set(items: &[Vec<u8>]) -> Vec<u8> {
        tlv(0x31, &items.concat())
    }

    fn context_tag(n: u8, content: &[u8]) -> Vec<u8> {
        tlv(0xA0 | n, content)
    }

    fn oid_tlv(components: &[u64]) -> Vec<u8> {
        tlv(0x06, &oid_der_content(components).unwrap())
    }

    fn octet_string(bytes: &[u8]) -> Vec<u8> {
        tlv(0x04, bytes)
    }

    fn integer_u8(n: u8) -> Vec<u8> {
        tlv(0x02, &[n])
    }

    fn null() -> Vec<u8> {
        vec![0x05, 0x00]
    }

    fn utc_time(value: &str) -> Vec<u8> {
        tlv(0x17, value.as_bytes())
    }

    fn attribute(oid: &[u64], value: Vec<u8>) -> Vec<u8> {
        sequence(&[oid_tlv(oid), set(&[value])])
    }

    /// Hand-assembles a CMS `ContentInfo { SignedData }` wrapping `chain`'s
    /// leaf/intermediate certificates and a `SignerInfo` whose `signedAttrs`
    /// carry a real `messageDigest` (SHA-256 of `canonical_bytes`) and
    /// `signingTime`, signed with the leaf's private key.
    fn build_signature_der(chain: &SyntheticChain, canonical_bytes: &[u8], signing_time: &str) -> Vec<u8> {
        let digest = Sha256::digest(canonical_bytes);

        let signed_attrs_content: Vec<u8> = [
            attribute(CONTENT_TYPE_ATTR_OID, oid_tlv(ID_DATA_OID)),
            attribute(MESSAGE_DIGEST_OID, octet_string(&digest)),
            attribute(SIGNING_TIME_OID, utc_time(signing_time)),
        ]
        .concat();

        let message_to_sign = rebuild_set_of_der(&signed_attrs_content);
        let signature: EcdsaSignature = chain.leaf_signing_key.sign(&message_to_sign);
        let signature_der = signature.to_der().as_bytes().to_vec();

        let sid = sequence(&[sequence(&[]), integer_u8(1)]);
        let digest_algorithm = sequence(&[oid_tlv(SHA256_OID), null()]);
        let signature_algorithm = sequence(&[oid_tlv(ECDSA_WITH_SHA256_OID)]);

        let signer_info = sequence(&[
            integer_u8(1),
            sid,
            digest_algorithm.clone(),
            context_tag(0, &signed_attrs_content),
            signature_algorithm,
            octet_string(&signature_der),
        ]);

        let certificates_content: Vec<u8> = [chain.leaf_der.clone(), chain.intermediate_der.clone()].concat();

        let signed_data = sequence(&[
            integer_u8(1),
            set(&[digest_algorithm]),
            sequence(&[oid_tlv(ID_DATA_OID)]),
            context_tag(0, &certificates_content),
            set(&[signer_info]),
        ]);

        sequence(&[oid_tlv(ID_SIGNED_DATA_OID), context_tag(0, &signed_data)])
    }

    fn ec_token(header_key: Vec<u8>, data: Vec<u8>, transaction_time: DateTime<Utc>) -> PkPaymentToken {
        PkPaymentToken {
            transaction_identifier: "deadbeef".into(),
            payment_method: PaymentMethod {
                kind: "credit".into(),
                network: "visa".into(),
                display_name: "Visa 1234".into(),
            },
            payment_data: PaymentData {
                version: "EC_v1".into(),
                signature: vec![],
                header: Header {
                    ephemeral_public_key: Some(header_key),
                    wrapped_key: None,
                    public_key_hash: vec![0u8; 32],
                    transaction_id: "deadbeef".into(),
                    application_data: None,
                },
                data,
            },
            transaction_time: Some(transaction_time),
        }
    }

    fn configure_root(root_pem: &str) {
        let path = std::env::temp_dir().join("apple_pay_token_signature_test_root.pem");
        std::fs::write(&path, root_pem).unwrap();
        crate::config::configure(crate::config::RuntimeConfig {
            apple_root_certificate_path: path.to_string_lossy().into_owned(),
            ..crate::config::RuntimeConfig::default()
        });
    }

    #[test]
    fn accepts_valid_chain_and_rejects_tampered_content() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new("warn"))
            .try_init();

        let chain = build_synthetic_chain();
        configure_root(&chain.root_pem);

        let signing_time = "260101120000Z";
        let reference_time = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 5).unwrap();

        let header_key = b"synthetic-ephemeral-public-key".to_vec();
        let token = ec_token(header_key, b"synthetic-ciphertext".to_vec(), reference_time);
        let canonical_bytes = canonicalize(&token).unwrap();
        let signature_der = build_signature_der(&chain, &canonical_bytes, signing_time);

        let mut signed_token = token.clone();
        signed_token.payment_data.signature = signature_der.clone();

        assert!(verify_signature(&signed_token).is_ok());

        // Same signature, but the ciphertext was swapped after signing: the
        // messageDigest check must reject it even though the CMS signature
        // itself was produced over a genuinely signed `signedAttrs` blob.
        let mut tampered = signed_token.clone();
        tampered.payment_data.data = b"different-ciphertext-entirely".to_vec();
        let err = verify_signature(&tampered).unwrap_err();
        assert_eq!(
            err.to_string(),
            "signature error: messageDigest does not match canonicalized content"
        );
    }

    /// End-to-end `decrypt_token`: a synthetic processing certificate carries
    /// the merchant-ID-hash extension, an ephemeral P-256 key agrees on a
    /// shared secret with it, and the resulting KDF key encrypts a plaintext
    /// payment payload the same way `aead`'s own round-trip test does.
    #[test]
    fn decrypts_full_token_via_synthetic_processing_certificate() {
        let chain = build_synthetic_chain();
        configure_root(&chain.root_pem);

        let merchant_id = "merchant.com.example.synthetic";
        let merchant_id_hash: [u8; 32] = Sha256::digest(merchant_id.as_bytes()).into();
        let extension_value = format!("@.{}", hex::encode(merchant_id_hash)).into_bytes();

        let processing_key_pair = rcgen::KeyPair::generate().unwrap();
        let mut processing_params = rcgen::CertificateParams::new(Vec::new()).unwrap();
        processing_params
            .custom_extensions
            .push(rcgen::CustomExtension::from_oid_content(
                asn1::MERCHANT_ID_HASH_OID,
                extension_value,
            ));
        let processing_cert = processing_params.self_signed(&processing_key_pair).unwrap();
        let processing_secret =
            p256::SecretKey::from_pkcs8_der(&processing_key_pair.serialize_der()).unwrap();

        let merchant = MerchantBuilder::new(merchant_id)
            .unwrap()
            .processing_certificate(
                processing_cert.pem().as_bytes(),
                processing_key_pair.serialize_pem().as_bytes(),
            )
            .unwrap()
            .build()
            .unwrap();

        let ephemeral_key_pair = rcgen::KeyPair::generate().unwrap();
        let ephemeral_secret =
            p256::SecretKey::from_pkcs8_der(&ephemeral_key_pair.serialize_der()).unwrap();
        let ephemeral_public_key_der = ephemeral_secret
            .public_key()
            .to_public_key_der()
            .unwrap()
            .as_bytes()
            .to_vec();

        let shared_secret = diffie_hellman(
            ephemeral_secret.to_nonzero_scalar(),
            processing_secret.public_key().as_affine(),
        );
        let aes_key =
            derive_encryption_key(shared_secret.raw_secret_bytes().as_slice(), &merchant_id_hash);

        let plaintext =
            br#"{"applicationPrimaryAccountNumber":"4417083031500965","currencyCode":"840","transactionAmount":100.0}"#;
        let cipher = AesGcm::<Aes256, U16>::new_from_slice(&aes_key).unwrap();
        let ciphertext = cipher
            .encrypt(
                &[0u8; 16].into(),
                Payload {
                    msg: plaintext.as_slice(),
                    aad: &[],
                },
            )
            .unwrap();

        let signing_time = "260101120000Z";
        let reference_time = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 5).unwrap();
        let token = ec_token(ephemeral_public_key_der, ciphertext, reference_time);
        let canonical_bytes = canonicalize(&token).unwrap();
        let signature_der = build_signature_der(&chain, &canonical_bytes, signing_time);

        let mut signed_token = token;
        signed_token.payment_data.signature = signature_der;

        let decrypted = decrypt_token(&merchant, &signed_token).unwrap();
        assert_eq!(
            decrypted.application_primary_account_number,
            "4417083031500965"
        );
        assert_eq!(decrypted.currency_code, "840");
        assert_eq!(decrypted.transaction_amount, 100.0);
    }
}
