//! Server-side Apple Pay support: merchant session provisioning over mTLS,
//! and payment token signature verification, key recovery and decryption.
//!
//! Two entry points cover the whole lifecycle of a transaction:
//!
//! - [`session::request_session`] provisions a merchant session from Apple's
//!   payment gateway, for the client-side `ApplePaySession` flow.
//! - [`token::decrypt_token`] verifies a device-produced `PKPaymentToken`'s
//!   CMS signature and decrypts its payment data.
//!
//! Both operate on a [`Merchant`], built once at startup with
//! [`MerchantBuilder`] and then shared across requests.

pub mod asn1;
pub mod config;
pub mod error;
pub mod merchant;
pub mod session;
pub mod token;

pub use config::{configure, runtime_config, RuntimeConfig};
pub use error::{Error, Result};
pub use merchant::{CertifiedKey, Merchant, MerchantBuilder, ProcessingKey};
pub use session::request_session;
pub use token::{decrypt_token, public_key_hash, Contact, PkPaymentToken, Response, Token};
