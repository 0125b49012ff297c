//! Merchant session provisioning (§4.2): a single mTLS POST to Apple's
//! payment gateway, returning the opaque session body verbatim.

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::config::runtime_config;
use crate::error::{Error, Result};
use crate::merchant::Merchant;

fn session_host_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^apple-pay-gateway(-.+)?\.apple\.com$")
            .expect("session host regex is a constant, known-valid pattern")
    })
}

#[derive(Serialize)]
struct SessionRequest<'a> {
    #[serde(rename = "merchantIdentifier")]
    merchant_identifier: &'a str,
    #[serde(rename = "domainName")]
    domain_name: &'a str,
    #[serde(rename = "displayName")]
    display_name: &'a str,
}

fn check_session_url(url: &str) -> Result<url::Url> {
    let parsed = url::Url::parse(url).map_err(|e| Error::Config(format!("invalid session URL: {e}")))?;

    if parsed.scheme() != "https" {
        return Err(Error::Config(
            "session URL must use the https scheme".into(),
        ));
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| Error::Config("session URL is missing a host".into()))?;

    if !session_host_pattern().is_match(host) {
        return Err(Error::Config(format!(
            "session URL host `{host}` is not an Apple Pay gateway host"
        )));
    }

    Ok(parsed)
}

/// Requests an opaque merchant session payload from Apple's gateway over
/// mTLS, presenting `merchant`'s identity certificate as the client
/// certificate.
pub fn request_session(merchant: &Merchant, url: &str) -> Result<Vec<u8>> {
    let identity_cert = merchant.merchant_certificate().ok_or_else(|| {
        Error::Config("merchant identity certificate is required for session provisioning".into())
    })?;

    let parsed_url = check_session_url(url)?;

    let identity = reqwest::Identity::from_pkcs8_pem(
        &identity_cert.certificate_pem,
        &identity_cert.private_key_pem,
    )
    .map_err(|e| Error::Config(format!("invalid merchant identity certificate: {e}")))?;

    let config = runtime_config();
    let client = reqwest::blocking::Client::builder()
        .identity(identity)
        .timeout(config.session_timeout)
        .build()?;

    let body = SessionRequest {
        merchant_identifier: merchant.identifier(),
        domain_name: merchant.domain_name().unwrap_or_default(),
        display_name: merchant.display_name().unwrap_or_default(),
    };

    let response = client.post(parsed_url).json(&body).send()?.error_for_status()?;

    Ok(response.bytes()?.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_canonical_gateway_host() {
        assert!(check_session_url("https://apple-pay-gateway.apple.com/paymentservices/startSession").is_ok());
    }

    #[test]
    fn accepts_suffixed_gateway_host() {
        assert!(check_session_url("https://apple-pay-gateway-cert.apple.com").is_ok());
    }

    #[test]
    fn rejects_non_gateway_host() {
        assert!(check_session_url("https://apple.com").is_err());
    }

    #[test]
    fn rejects_non_https_scheme() {
        assert!(check_session_url("http://apple-pay-gateway.apple.com").is_err());
    }
}
