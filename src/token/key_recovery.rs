//! Key recovery (§4.5): ECDH + NIST SP 800-56A KDF for `EC_v1`, RSA-OAEP
//! unwrap for `RSA_v1`.

use p256::elliptic_curve::ecdh::diffie_hellman;
use p256::pkcs8::DecodePublicKey;
use rsa::Oaep;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::merchant::ProcessingKey;

use super::types::{Header, Version};

const KDF_COUNTER: [u8; 4] = [0x00, 0x00, 0x00, 0x01];
const KDF_ALGORITHM_ID: &[u8] = b"\x0Did-aes256-GCM";
const KDF_PARTY_U: &[u8] = b"Apple";

/// Strips leading zero bytes the way Go's `big.Int.Bytes()` does: the empty
/// slice represents zero, and there is never a leading `0x00` on a nonzero
/// value. `p256`'s fixed-width, zero-padded shared-secret encoding must be
/// trimmed down to this representation before hashing, or the derived key
/// will not match Apple's.
fn trim_leading_zeros(bytes: &[u8]) -> Vec<u8> {
    let first_nonzero = bytes.iter().position(|&b| b != 0);
    match first_nonzero {
        Some(i) => bytes[i..].to_vec(),
        None => Vec::new(),
    }
}

/// NIST SP 800-56A §5.8.1 single-round KDF with Apple's fixed algorithm ID
/// and partyU, keyed on the merchant-identifier hash as partyV.
pub fn derive_encryption_key(shared_secret_z: &[u8], merchant_id_hash: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(KDF_COUNTER);
    hasher.update(trim_leading_zeros(shared_secret_z));
    hasher.update(KDF_ALGORITHM_ID);
    hasher.update(KDF_PARTY_U);
    hasher.update(merchant_id_hash);
    hasher.finalize().into()
}

/// Recovers the AES key for an `RSA_v1` token via RSA-OAEP-SHA256 unwrap.
fn recover_rsa_key(header: &Header, processing_key: &rsa::RsaPrivateKey) -> Result<Vec<u8>> {
    let wrapped_key = header
        .wrapped_key
        .as_ref()
        .ok_or_else(|| Error::Key("RSA_v1 token is missing header.wrappedKey".into()))?;

    if wrapped_key.is_empty() {
        return Err(Error::Key("empty key ciphertext".into()));
    }

    processing_key
        .decrypt(Oaep::new::<Sha256>(), wrapped_key)
        .map_err(|e| Error::Key(format!("error decrypting the key: {e}")))
}

/// Recovers the symmetric AES key for `token`'s payment data, dispatching on
/// `version` and checking that `processing_key` is of the matching type.
pub fn recover_key(
    version: Version,
    header: &Header,
    processing_key: &ProcessingKey,
    merchant_id_hash: &[u8; 32],
) -> Result<Vec<u8>> {
    match (version, processing_key) {
        (Version::EcV1, ProcessingKey::Ec(key)) => {
            let epk_der = header.ephemeral_public_key.as_ref().ok_or_else(|| {
                Error::Key("EC_v1 token is missing header.ephemeralPublicKey".into())
            })?;
            let ephemeral_public_key = p256::PublicKey::from_public_key_der(epk_der)
                .map_err(|e| Error::Key(format!("unable to parse the public key: {e}")))?;
            let shared_secret =
                diffie_hellman(key.to_nonzero_scalar(), ephemeral_public_key.as_affine());
            let z = shared_secret.raw_secret_bytes();
            Ok(derive_encryption_key(z.as_slice(), merchant_id_hash).to_vec())
        }
        (Version::EcV1, ProcessingKey::Rsa(_)) => {
            Err(Error::Key("non-elliptic processing private key".into()))
        }
        (Version::RsaV1, ProcessingKey::Rsa(key)) => recover_rsa_key(header, key),
        (Version::RsaV1, ProcessingKey::Ec(_)) => {
            Err(Error::Key("processing key is not RSA".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kdf_fixture_zero_shared_secret() {
        // `deriveEncryptionKey(sharedSecret=0, merchantIdHash=[0x00])`
        let merchant_id_hash = [0u8; 32];
        let key = derive_encryption_key(&[], &merchant_id_hash);
        assert_eq!(
            hex::encode(key),
            "b50fb7efdb1ce4b7036e9dc0531ebb9d0101c4bcc57aba5a9f3c39fb5cdfafa6"
        );
    }

    #[test]
    fn trims_leading_zero_bytes() {
        assert_eq!(trim_leading_zeros(&[0, 0, 1, 2]), vec![1, 2]);
        assert_eq!(trim_leading_zeros(&[0, 0, 0, 0]), Vec::<u8>::new());
        assert_eq!(trim_leading_zeros(&[1, 2, 3]), vec![1, 2, 3]);
    }
}
