//! Wire types for `PKPaymentToken` (input) and `Token` (decrypted output).

use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// `paymentData.version`: selects the key-recovery algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Version {
    #[serde(rename = "EC_v1")]
    EcV1,
    #[serde(rename = "RSA_v1")]
    RsaV1,
}

impl TryFrom<&str> for Version {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "EC_v1" => Ok(Version::EcV1),
            "RSA_v1" => Ok(Version::RsaV1),
            other => Err(Error::Version(other.to_string())),
        }
    }
}

/// The encrypted envelope produced by a client device for an Apple Pay
/// transaction.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PkPaymentToken {
    pub transaction_identifier: String,
    pub payment_method: PaymentMethod,
    pub payment_data: PaymentData,
    /// Not part of the Apple wire format; callers may set this explicitly to
    /// pin the signature-verification reference time instead of using "now".
    #[serde(skip)]
    pub transaction_time: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentMethod {
    #[serde(rename = "type")]
    pub kind: String,
    pub network: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentData {
    pub version: String,
    #[serde(with = "base64_bytes")]
    pub signature: Vec<u8>,
    pub header: Header,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Header {
    /// DER SubjectPublicKeyInfo, present only for `EC_v1`.
    #[serde(default, with = "base64_bytes_opt")]
    pub ephemeral_public_key: Option<Vec<u8>>,
    /// RSA-OAEP ciphertext wrapping the AES key, present only for `RSA_v1`.
    #[serde(default, with = "base64_bytes_opt")]
    pub wrapped_key: Option<Vec<u8>>,
    #[serde(with = "base64_bytes")]
    pub public_key_hash: Vec<u8>,
    /// Kept as the raw hex string rather than decoded eagerly: the
    /// canonicalizer tolerates invalid hex here by treating it as empty,
    /// which a strict deserializer would instead reject outright.
    pub transaction_id: String,
    #[serde(default)]
    pub application_data: Option<String>,
}

impl PkPaymentToken {
    pub fn version(&self) -> Result<Version, Error> {
        Version::try_from(self.payment_data.version.as_str())
    }
}

/// Decrypted cleartext payment token.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Token {
    pub application_primary_account_number: String,
    pub application_expiration_date: String,
    pub currency_code: String,
    pub transaction_amount: f64,
    pub cardholder_name: Option<String>,
    #[serde(with = "hex_bytes")]
    pub device_manufacturer_identifier: Vec<u8>,
    pub payment_data_type: String,
    pub payment_data: TokenPaymentData,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TokenPaymentData {
    #[serde(with = "base64_bytes")]
    pub online_payment_cryptogram: Vec<u8>,
    pub eci_indicator: String,
    #[serde(with = "base64_bytes")]
    pub emv_data: Vec<u8>,
    pub encrypted_pin_data: String,
}

/// Thin wrapper around a verified/decrypted token plus optional contact info.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub token: PkPaymentToken,
    #[serde(default)]
    pub shipping_contact: Option<Contact>,
    #[serde(default)]
    pub billing_contact: Option<Contact>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Contact {
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub email_address: Option<String>,
    pub address_lines: Vec<String>,
    pub administrative_area: Option<String>,
    pub locality: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
    pub country_code: Option<String>,
}

mod base64_bytes {
    use base64::Engine as _;

    use super::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

mod base64_bytes_opt {
    use base64::Engine as _;

    use super::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => s.serialize_str(&STANDARD.encode(b)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let opt = Option::<String>::deserialize(d)?;
        opt.map(|s| STANDARD.decode(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}

