//! Payment token verification, key recovery and decryption (§4.3-§4.7).

mod aead;
mod canonical;
mod key_recovery;
mod orchestrator;
mod signature;
pub mod types;

pub use orchestrator::{decrypt_token, public_key_hash};
pub use types::{Contact, Header, PaymentData, PaymentMethod, PkPaymentToken, Response, Token, TokenPaymentData, Version};
