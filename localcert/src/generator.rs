//! Self-signed certificate generation
//!
//! [`CertificateGenerator`] replaces whatever is stored under a name with a
//! fresh P-256 key pair and a certificate signed by that key. The private key
//! never leaves the store: rcgen sees it only through [`StoreSigner`], which
//! forwards each signing request to [`KeyStore::sign`].

use crate::certificate::Certificate;
use crate::config::LocalCertConfig;
use crate::gateway::{KeyStoreGateway, RemovalError};
use crate::store::{Curve, KeyHandle, KeyStore, SignatureScheme, StoreError};
use chrono::{DateTime, Utc};
use rcgen::{
    CertificateParams, DistinguishedName, DnType, KeyPair, RemoteKeyPair, SerialNumber,
    SignatureAlgorithm, PKCS_ECDSA_P256_SHA256,
};
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

/// Failure while producing a new certificate
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("key store unavailable: {0}")]
    StoreUnavailable(StoreError),

    /// Existing certificates under the name could not be swept away
    #[error("failed to remove existing certificates: {0}")]
    RemoveExisting(RemovalError),

    #[error("key generation failed: {0}")]
    KeyGenerationFailed(StoreError),

    #[error("signing failed: {0}")]
    SigningFailed(String),

    #[error("import failed: {0}")]
    ImportFailed(StoreError),

    /// The imported certificate could not be read back from the store
    #[error("readback failed: {0}")]
    ReadbackFailed(String),
}

/// rcgen signer backed by a key held in the store
struct StoreSigner {
    store: Arc<dyn KeyStore>,
    key: KeyHandle,
    public_key: Vec<u8>,
}

impl RemoteKeyPair for StoreSigner {
    fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    fn sign(&self, msg: &[u8]) -> Result<Vec<u8>, rcgen::Error> {
        self.store
            .sign(&self.key, msg, SignatureScheme::for_curve(Curve::P256))
            .map_err(|e| {
                warn!("Store refused to sign with {}: {}", self.key, e);
                rcgen::Error::RemoteKeyError
            })
    }

    fn algorithm(&self) -> &'static SignatureAlgorithm {
        &PKCS_ECDSA_P256_SHA256
    }
}

/// Produces fresh self-signed identity certificates inside the store
#[derive(Debug, Clone)]
pub struct CertificateGenerator {
    gateway: KeyStoreGateway,
    config: LocalCertConfig,
}

impl CertificateGenerator {
    /// Create a generator that signs inside the store behind `gateway`
    ///
    /// `config` is used as given; [`validate`](crate::config::validate) it
    /// first if it comes from outside.
    pub fn new(gateway: KeyStoreGateway, config: LocalCertConfig) -> Self {
        Self { gateway, config }
    }

    /// Replace everything stored under `name` with a new certificate
    ///
    /// Existing certificates are removed first, so a failure after that
    /// point leaves the name empty. A key generated by a failed attempt is
    /// deleted again before the error is returned.
    pub fn generate(&self, name: &str) -> Result<Certificate, GenerationError> {
        let store = self.gateway.store();
        store
            .check_available()
            .map_err(GenerationError::StoreUnavailable)?;

        self.gateway
            .remove_all_for_name(name)
            .map_err(GenerationError::RemoveExisting)?;

        let key = store
            .generate_key_pair(Curve::P256)
            .map_err(GenerationError::KeyGenerationFailed)?;
        debug!("Generated {} for '{}'", key, name);

        let der = match self.sign_certificate(&key, name) {
            Ok(der) => der,
            Err(e) => {
                self.discard_key(&key);
                return Err(e);
            }
        };

        if let Err(e) = store.import_certificate(&der, name) {
            self.discard_key(&key);
            return Err(GenerationError::ImportFailed(e));
        }

        let cert = self
            .gateway
            .find_by_name(name)
            .map_err(|e| GenerationError::ReadbackFailed(e.to_string()))?
            .ok_or_else(|| {
                GenerationError::ReadbackFailed(format!(
                    "no certificate under '{}' after import",
                    name
                ))
            })?;

        info!(
            "Generated certificate for '{}' (serial {}, valid until {})",
            name,
            cert.serial(),
            cert.not_after()
        );
        Ok(cert)
    }

    /// Build and sign the DER certificate for `name` with `key`
    fn sign_certificate(&self, key: &KeyHandle, name: &str) -> Result<Vec<u8>, GenerationError> {
        let store = self.gateway.store();
        let public_key = store.public_key(key).map_err(signing_failed)?;
        let key_pair = KeyPair::from_remote(Box::new(StoreSigner {
            store: store.clone(),
            key: key.clone(),
            public_key,
        }))
        .map_err(signing_failed)?;

        let mut params = CertificateParams::new(Vec::<String>::new()).map_err(signing_failed)?;
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, name);
        params.distinguished_name = dn;

        let now = Utc::now();
        let not_before = now
            .checked_sub_signed(self.config.backdate())
            .ok_or_else(|| signing_failed("not-before is out of range"))?;
        let not_after = now
            .checked_add_signed(self.config.validity())
            .ok_or_else(|| signing_failed("not-after is out of range"))?;
        params.not_before = to_offset(not_before)?;
        params.not_after = to_offset(not_after)?;
        params.serial_number = Some(self.random_serial()?);

        let cert = params.self_signed(&key_pair).map_err(signing_failed)?;
        Ok(cert.der().to_vec())
    }

    /// Draw a positive, non-zero serial number from the store
    fn random_serial(&self) -> Result<SerialNumber, GenerationError> {
        let mut bytes = vec![0u8; self.config.serial_length];
        self.gateway
            .store()
            .random_bytes(&mut bytes)
            .map_err(|e| GenerationError::SigningFailed(format!("no serial number: {}", e)))?;

        bytes[0] &= 0x7f;
        if bytes[0] == 0 {
            bytes[0] = 0x01;
        }
        Ok(SerialNumber::from_slice(&bytes))
    }

    fn discard_key(&self, key: &KeyHandle) {
        if let Err(e) = self.gateway.store().delete_key(key) {
            warn!("Failed to delete {} after failed generation: {}", key, e);
        }
    }
}

fn signing_failed(e: impl std::fmt::Display) -> GenerationError {
    GenerationError::SigningFailed(e.to_string())
}

fn to_offset(at: DateTime<Utc>) -> Result<OffsetDateTime, GenerationError> {
    OffsetDateTime::from_unix_timestamp(at.timestamp())
        .map_err(|e| GenerationError::SigningFailed(format!("invalid validity bound: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FileKeyStore, MemoryKeyStore, NoPrompt};
    use crate::validator::CertificateValidator;
    use assert_matches::assert_matches;
    use chrono::Duration;

    fn generator(store: Arc<dyn KeyStore>) -> CertificateGenerator {
        let gateway = KeyStoreGateway::new(store, Arc::new(NoPrompt));
        gateway.ensure_unlocked().unwrap();
        CertificateGenerator::new(gateway, LocalCertConfig::default())
    }

    #[test]
    fn test_generate_fresh_certificate() {
        let store = Arc::new(MemoryKeyStore::new());
        let cert = generator(store.clone()).generate("devtools").unwrap();

        assert_eq!(cert.subject(), "CN=devtools");
        assert_eq!(cert.issuer(), "CN=devtools");
        assert_eq!(cert.version(), 3);
        assert_eq!(cert.signature_algorithm(), crate::certificate::ECDSA_WITH_SHA256_OID);
        assert!(cert.is_self_signed());
        assert!(CertificateValidator::default().validate(&cert, "devtools").is_ok());

        let now = Utc::now();
        assert!(cert.not_before() <= now - Duration::hours(23));
        assert!(cert.not_after() >= now + Duration::days(364));

        assert_eq!(store.certificate_count("devtools").unwrap(), 1);
        assert_eq!(store.key_count().unwrap(), 1);
    }

    #[test]
    fn test_generate_replaces_existing() {
        let store = Arc::new(MemoryKeyStore::new());
        let generator = generator(store.clone());

        let first = generator.generate("devtools").unwrap();
        let second = generator.generate("devtools").unwrap();

        assert_ne!(first.serial(), second.serial());
        assert_ne!(first.public_key(), second.public_key());
        assert_eq!(store.certificate_count("devtools").unwrap(), 1);
        assert_eq!(store.key_count().unwrap(), 1);
    }

    #[test]
    fn test_serial_length_follows_config() {
        let store = Arc::new(MemoryKeyStore::new());
        let gateway = KeyStoreGateway::new(store, Arc::new(NoPrompt));
        let generator =
            CertificateGenerator::new(gateway, LocalCertConfig::new().with_serial_length(16));

        let cert = generator.generate("devtools").unwrap();
        assert_eq!(cert.serial().len(), 32);
    }

    #[test]
    fn test_locked_store_fails_key_generation() {
        let store = Arc::new(MemoryKeyStore::with_credential("hunter2").unwrap());
        let gateway = KeyStoreGateway::new(store.clone(), Arc::new(NoPrompt));
        let generator = CertificateGenerator::new(gateway, LocalCertConfig::default());

        assert_matches!(
            generator.generate("devtools"),
            Err(GenerationError::KeyGenerationFailed(StoreError::AccessDenied(_)))
        );
        assert_eq!(store.key_count().unwrap(), 0);
    }

    #[test]
    fn test_unusable_directory_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();
        let store = FileKeyStore::open(blocker.join("token.json")).unwrap();

        let gateway = KeyStoreGateway::new(Arc::new(store), Arc::new(NoPrompt));
        let generator = CertificateGenerator::new(gateway, LocalCertConfig::default());
        assert_matches!(
            generator.generate("devtools"),
            Err(GenerationError::StoreUnavailable(StoreError::Unavailable(_)))
        );
    }

    #[test]
    fn test_unrepresentable_validity_discards_key() {
        let store = Arc::new(MemoryKeyStore::new());
        let gateway = KeyStoreGateway::new(store.clone(), Arc::new(NoPrompt));
        let generator = CertificateGenerator::new(
            gateway,
            LocalCertConfig::new().with_validity_days(i64::MAX),
        );

        assert_matches!(
            generator.generate("devtools"),
            Err(GenerationError::SigningFailed(_))
        );
        assert_eq!(store.key_count().unwrap(), 0);
        assert_eq!(store.certificate_count("devtools").unwrap(), 0);
    }
}
