//! Parsed view of an X.509 certificate as reported by the key store.
//!
//! A [`Certificate`] always comes from DER bytes the store handed back; the
//! lifecycle never trusts an in-memory object it built itself.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use x509_parser::certificate::X509Certificate;
use x509_parser::prelude::FromDer;

/// Dotted OID of ecdsa-with-SHA256
pub const ECDSA_WITH_SHA256_OID: &str = "1.2.840.10045.4.3.2";

/// Error raised when stored bytes are not a usable certificate
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Malformed certificate: {0}")]
pub struct MalformedCertificate(pub String);

/// Certificate attributes extracted from DER
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    der: Vec<u8>,
    version: u32,
    subject: String,
    issuer: String,
    serial: String,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    signature_algorithm: String,
    public_key: Vec<u8>,
}

impl Certificate {
    /// Parse a DER-encoded certificate
    pub fn from_der(der: impl Into<Vec<u8>>) -> Result<Self, MalformedCertificate> {
        let der = der.into();
        let parsed = parse_fields(&der)?;
        Ok(Self { der, ..parsed })
    }

    /// The DER encoding exactly as stored
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// X.509 version number (3 for certificates this crate generates)
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Subject distinguished name, e.g. `CN=devtools`
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Issuer distinguished name
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Serial number as lowercase hex of its DER content bytes
    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn not_before(&self) -> DateTime<Utc> {
        self.not_before
    }

    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    /// Dotted OID of the outer signature algorithm
    pub fn signature_algorithm(&self) -> &str {
        &self.signature_algorithm
    }

    /// Subject public key bits (an uncompressed SEC1 point for P-256)
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// Whether the certificate's signature verifies against its own public key
    pub fn is_self_signed(&self) -> bool {
        match X509Certificate::from_der(&self.der) {
            Ok((_, x509)) => x509.verify_signature(None).is_ok(),
            Err(_) => false,
        }
    }

    /// SHA-256 fingerprint as colon-separated uppercase hex
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(&self.der);
        digest
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(":")
    }
}

fn parse_fields(der: &[u8]) -> Result<Certificate, MalformedCertificate> {
    let (rest, x509) = X509Certificate::from_der(der)
        .map_err(|e| MalformedCertificate(format!("failed to parse DER: {}", e)))?;
    if !rest.is_empty() {
        return Err(MalformedCertificate(format!(
            "{} trailing bytes after certificate",
            rest.len()
        )));
    }

    Ok(Certificate {
        der: Vec::new(),
        version: x509.version().0 + 1,
        subject: x509.subject().to_string(),
        issuer: x509.issuer().to_string(),
        serial: hex::encode(x509.tbs_certificate.raw_serial()),
        not_before: timestamp(x509.validity().not_before.timestamp())?,
        not_after: timestamp(x509.validity().not_after.timestamp())?,
        signature_algorithm: x509.signature_algorithm.algorithm.to_id_string(),
        public_key: x509.public_key().subject_public_key.data.to_vec(),
    })
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>, MalformedCertificate> {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .ok_or_else(|| MalformedCertificate(format!("timestamp {} out of range", secs)))
}
