//! Signed-data canonicalization (§4.4): rebuilds the exact byte sequence the
//! device signed, so the CMS signature can be verified over it.

use crate::error::{Error, Result};

use super::types::{PkPaymentToken, Version};

/// Decodes a hex string tolerantly: invalid hex contributes nothing, rather
/// than failing the whole canonicalization. This matches the behavior
/// observed in Apple Pay client libraries, where a hex-decode error on these
/// fields is discarded and zero bytes are appended.
fn tolerant_hex_decode(value: Option<&str>) -> Vec<u8> {
    value
        .and_then(|s| hex::decode(s).ok())
        .unwrap_or_default()
}

/// Produces the canonical signed-data bytes for `token`.
pub fn canonicalize(token: &PkPaymentToken) -> Result<Vec<u8>> {
    let version = token.version()?;
    let header = &token.payment_data.header;

    let mut buf = Vec::new();

    match version {
        Version::EcV1 => {
            let key = header.ephemeral_public_key.as_ref().ok_or_else(|| {
                Error::Key("EC_v1 token is missing header.ephemeralPublicKey".into())
            })?;
            buf.extend_from_slice(key);
        }
        Version::RsaV1 => {
            let key = header
                .wrapped_key
                .as_ref()
                .ok_or_else(|| Error::Key("RSA_v1 token is missing header.wrappedKey".into()))?;
            buf.extend_from_slice(key);
        }
    }

    buf.extend_from_slice(&token.payment_data.data);
    buf.extend_from_slice(&tolerant_hex_decode(Some(&header.transaction_id)));
    buf.extend_from_slice(&tolerant_hex_decode(header.application_data.as_deref()));

    Ok(buf)
}
