//! AEAD decryption (§4.6): AES-256-GCM with Apple's non-standard 16-byte
//! all-zero nonce and no additional authenticated data.

use aes_gcm::aead::generic_array::typenum::U16;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{aes::Aes256, AesGcm};

use crate::error::{Error, Result};

/// AES-256-GCM configured for Apple Pay's 16-byte nonce rather than the
/// standard 12-byte one.
type Aes256Gcm16 = AesGcm<Aes256, U16>;

const NONCE: [u8; 16] = [0u8; 16];

/// Decrypts `ciphertext` (tag appended, standard GCM framing) with `key`.
pub fn decrypt(key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm16::new_from_slice(key)
        .map_err(|e| Error::Crypto(format!("error creating the block cipher: {e}")))?;

    cipher
        .decrypt(&NONCE.into(), ciphertext)
        .map_err(|e| Error::Crypto(format!("error decrypting the data: {e}")))
}
