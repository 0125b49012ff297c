//! Merchant construction (§4.1): an immutable value combining a merchant
//! identifier with its identity and processing certificates.
//!
//! Re-expresses the source library's functional-options constructor as a
//! builder: each setter validates immediately and returns `Result<Self>` so
//! construction fails fast at the first bad option, and `.build()` performs
//! no further validation.

use der_parser::asn1_rs::FromDer;
use p256::pkcs8::DecodePrivateKey as _;
use rsa::pkcs1::DecodeRsaPrivateKey as _;
use rsa::pkcs8::DecodePrivateKey as _;
use sha2::{Digest, Sha256};
use x509_parser::certificate::X509Certificate;

use crate::asn1;
use crate::error::{Error, Result};

/// A loaded identity: the certificate's raw DER plus its original PEM bytes
/// (the PEM form is what `session.rs` hands to `reqwest::Identity`).
#[derive(Clone)]
pub struct CertifiedKey {
    pub certificate_pem: Vec<u8>,
    pub private_key_pem: Vec<u8>,
    pub processing_key: ProcessingKey,
}

/// A processing private key: either curve for `EC_v1`, or RSA for `RSA_v1`.
#[derive(Clone)]
pub enum ProcessingKey {
    Ec(p256::SecretKey),
    Rsa(rsa::RsaPrivateKey),
}

/// An immutable merchant identity, safe to share across any number of
/// concurrent callers once built.
#[derive(Clone)]
pub struct Merchant {
    identifier: String,
    display_name: Option<String>,
    domain_name: Option<String>,
    merchant_certificate: Option<CertifiedKey>,
    processing_certificate: Option<CertifiedKey>,
}

impl Merchant {
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    pub fn domain_name(&self) -> Option<&str> {
        self.domain_name.as_deref()
    }

    pub fn merchant_certificate(&self) -> Option<&CertifiedKey> {
        self.merchant_certificate.as_ref()
    }

    pub fn processing_certificate(&self) -> Option<&CertifiedKey> {
        self.processing_certificate.as_ref()
    }

    /// SHA-256 of the merchant identifier, as embedded by Apple in the
    /// merchant-ID-hash certificate extension.
    pub fn identifier_hash(&self) -> [u8; 32] {
        Sha256::digest(self.identifier.as_bytes()).into()
    }
}

/// Builds a [`Merchant`]. See the module documentation for the validation
/// order.
#[derive(Debug)]
pub struct MerchantBuilder {
    identifier: String,
    display_name: Option<String>,
    domain_name: Option<String>,
    merchant_certificate: Option<CertifiedKey>,
    processing_certificate: Option<CertifiedKey>,
}

impl MerchantBuilder {
    pub fn new(merchant_id: impl Into<String>) -> Result<Self> {
        let merchant_id = merchant_id.into();
        if !merchant_id.starts_with("merchant.") {
            return Err(Error::Config(
                "merchant ID should start with `merchant.`".into(),
            ));
        }
        Ok(Self {
            identifier: merchant_id,
            display_name: None,
            domain_name: None,
            merchant_certificate: None,
            processing_certificate: None,
        })
    }

    pub fn display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    pub fn domain_name(mut self, domain_name: impl Into<String>) -> Self {
        self.domain_name = Some(domain_name.into());
        self
    }

    /// Sets the merchant identity certificate. Its private key must be RSA.
    pub fn merchant_certificate(mut self, cert_pem: &[u8], key_pem: &[u8]) -> Result<Self> {
        let identifier_hash = self.identifier_hash();
        let rsa_key = parse_rsa_private_key(key_pem)
            .map_err(|_| Error::Config("merchant key should be RSA".into()))?;

        verify_certificate_and_hash(cert_pem, &identifier_hash, "merchant")?;

        self.merchant_certificate = Some(CertifiedKey {
            certificate_pem: cert_pem.to_vec(),
            private_key_pem: key_pem.to_vec(),
            processing_key: ProcessingKey::Rsa(rsa_key),
        });
        Ok(self)
    }

    /// Sets the payment-processing certificate. Its private key may be EC
    /// P-256 or RSA.
    pub fn processing_certificate(mut self, cert_pem: &[u8], key_pem: &[u8]) -> Result<Self> {
        let identifier_hash = self.identifier_hash();
        let processing_key = parse_processing_private_key(key_pem)?;

        verify_certificate_and_hash(cert_pem, &identifier_hash, "processing")?;

        self.processing_certificate = Some(CertifiedKey {
            certificate_pem: cert_pem.to_vec(),
            private_key_pem: key_pem.to_vec(),
            processing_key,
        });
        Ok(self)
    }

    pub fn merchant_certificate_from_pem_files(
        self,
        cert_path: impl AsRef<std::path::Path>,
        key_path: impl AsRef<std::path::Path>,
    ) -> Result<Self> {
        let (cert_pem, key_pem) = load_pem_pair(cert_path, key_path)?;
        self.merchant_certificate(&cert_pem, &key_pem)
    }

    pub fn processing_certificate_from_pem_files(
        self,
        cert_path: impl AsRef<std::path::Path>,
        key_path: impl AsRef<std::path::Path>,
    ) -> Result<Self> {
        let (cert_pem, key_pem) = load_pem_pair(cert_path, key_path)?;
        self.processing_certificate(&cert_pem, &key_pem)
    }

    pub fn build(self) -> Result<Merchant> {
        Ok(Merchant {
            identifier: self.identifier,
            display_name: self.display_name,
            domain_name: self.domain_name,
            merchant_certificate: self.merchant_certificate,
            processing_certificate: self.processing_certificate,
        })
    }

    fn identifier_hash(&self) -> [u8; 32] {
        Sha256::digest(self.identifier.as_bytes()).into()
    }
}

fn load_pem_pair(
    cert_path: impl AsRef<std::path::Path>,
    key_path: impl AsRef<std::path::Path>,
) -> Result<(Vec<u8>, Vec<u8>)> {
    let cert_pem = std::fs::read(cert_path)
        .map_err(|e| Error::Config(format!("error loading the certificate: {e}")))?;
    let key_pem = std::fs::read(key_path)
        .map_err(|e| Error::Config(format!("error loading the certificate: {e}")))?;
    Ok((cert_pem, key_pem))
}

fn parse_rsa_private_key(key_pem: &[u8]) -> std::result::Result<rsa::RsaPrivateKey, ()> {
    let pem_str = std::str::from_utf8(key_pem).map_err(|_| ())?;
    rsa::RsaPrivateKey::from_pkcs8_pem(pem_str)
        .or_else(|_| rsa::RsaPrivateKey::from_pkcs1_pem(pem_str))
        .map_err(|_| ())
}

fn parse_processing_private_key(key_pem: &[u8]) -> Result<ProcessingKey> {
    let pem_str = std::str::from_utf8(key_pem)
        .map_err(|e| Error::Config(format!("error loading the certificate: {e}")))?;

    if let Ok(rsa_key) = rsa::RsaPrivateKey::from_pkcs8_pem(pem_str)
        .or_else(|_| rsa::RsaPrivateKey::from_pkcs1_pem(pem_str))
    {
        return Ok(ProcessingKey::Rsa(rsa_key));
    }

    p256::SecretKey::from_pkcs8_pem(pem_str)
        .or_else(|_| p256::SecretKey::from_sec1_pem(pem_str))
        .map(ProcessingKey::Ec)
        .map_err(|e| Error::Config(format!("error loading the certificate: {e}")))
}

fn parse_x509_pem(cert_pem: &[u8]) -> Result<Vec<u8>> {
    let (_, pem) = x509_parser::pem::parse_x509_pem(cert_pem)
        .map_err(|e| Error::Config(format!("error loading the certificate: {e}")))?;
    Ok(pem.contents)
}

fn verify_certificate_and_hash(
    cert_pem: &[u8],
    identifier_hash: &[u8; 32],
    role: &str,
) -> Result<()> {
    let der = parse_x509_pem(cert_pem)?;
    let (_, cert): (_, X509Certificate) = X509Certificate::from_der(&der)
        .map_err(|e| Error::Config(format!("error loading the certificate: {e}")))?;

    asn1::check_validity(&cert, None).map_err(|e| Error::Config(format!("invalid certificate: {e}")))?;

    let hash = asn1::extract_merchant_hash(&cert)
        .map_err(|e| Error::Config(format!("error reading the certificate: {e}")))?;

    if &hash != identifier_hash {
        return Err(Error::Config(format!(
            "invalid {role} certificate or merchant ID"
        )));
    }
    Ok(())
}
