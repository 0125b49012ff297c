//! Error types for merchant session provisioning and payment token processing.

use thiserror::Error;

/// Error type returned by every public operation in this crate.
///
/// Each variant is one of the failure classes a caller needs to distinguish:
/// configuration mistakes are the caller's fault and usually fatal at
/// startup, while signature/replay/key/crypto failures are per-token and
/// should be handled per request (reject the payment, ask the device to
/// retry, fall back to another processing key, etc).
#[derive(Debug, Error)]
pub enum Error {
    /// Bad merchant id, cert/key load failure, wrong key type, cert/merchant-id
    /// hash mismatch, expired certificate, or a missing processing certificate.
    #[error("configuration error: {0}")]
    Config(String),

    /// Session URL invalid, or the HTTP request to Apple's gateway failed or
    /// timed out.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// `paymentData.version` is not one of `EC_v1`/`RSA_v1`.
    #[error("unsupported payment data version: {0}")]
    Version(String),

    /// PKCS#7 parse failure, missing Apple extension OIDs, broken chain of
    /// trust, or CMS signature verification failure.
    #[error("signature error: {0}")]
    Signature(String),

    /// The signing-time replay window check failed.
    #[error("replay error: {0}")]
    Replay(String),

    /// Ephemeral key parse error, wrong processing key type for the token
    /// version, RSA unwrap failure, or empty wrapped-key ciphertext.
    #[error("key error: {0}")]
    Key(String),

    /// AEAD failure: bad key length or authentication tag mismatch.
    #[error("crypto error: {0}")]
    Crypto(String),
}

pub type Result<T> = std::result::Result<T, Error>;
