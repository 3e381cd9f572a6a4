//! Software token state shared by the in-memory and file-backed stores

use super::{CertificateHandle, Curve, KeyHandle, SignatureScheme, StoreError, StoredCertificate};
use base64::Engine;
use chrono::{DateTime, Utc};
use p256::ecdsa::signature::Signer;
use p256::ecdsa::{Signature, SigningKey};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use x509_parser::certificate::X509Certificate;
use x509_parser::prelude::FromDer;

const B64: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD;

/// A private key held by the token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoredKey {
    pub curve: Curve,
    /// Base64-encoded private scalar
    pub private_key: String,
    /// Base64-encoded uncompressed public point
    pub public_key: String,
    pub created_at: DateTime<Utc>,
}

/// A certificate imported into the token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoredCert {
    pub id: String,
    pub name: String,
    /// Base64-encoded DER
    pub der: String,
    /// Key the certificate was linked to on import
    #[serde(default)]
    pub key_id: Option<String>,
    pub imported_at: DateTime<Utc>,
}

/// Complete token contents
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct TokenState {
    /// SHA-256 hex of the credential; empty string for an empty credential,
    /// `None` while the token is uninitialized
    #[serde(default)]
    pub credential_hash: Option<String>,
    #[serde(skip)]
    pub logged_in: bool,
    #[serde(default)]
    pub keys: BTreeMap<String, StoredKey>,
    /// Certificates in import order
    #[serde(default)]
    pub certificates: Vec<StoredCert>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Default for TokenState {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            credential_hash: None,
            logged_in: false,
            keys: BTreeMap::new(),
            certificates: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

fn hash_credential(credential: &str) -> String {
    if credential.is_empty() {
        return String::new();
    }
    hex::encode(Sha256::digest(credential.as_bytes()))
}

fn new_id() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

impl TokenState {
    pub fn needs_user_init(&self) -> bool {
        self.credential_hash.is_none()
    }

    pub fn init_credential(&mut self, credential: &str) -> Result<(), StoreError> {
        if self.credential_hash.is_some() {
            return Err(StoreError::AccessDenied(
                "token credential is already initialized".to_string(),
            ));
        }
        self.credential_hash = Some(hash_credential(credential));
        self.logged_in = false;
        self.touch();
        Ok(())
    }

    pub fn needs_login(&self) -> bool {
        matches!(&self.credential_hash, Some(hash) if !hash.is_empty())
    }

    pub fn login(&mut self, credential: &str) -> Result<(), StoreError> {
        match &self.credential_hash {
            None => Err(StoreError::AccessDenied(
                "token is not initialized".to_string(),
            )),
            Some(hash) if *hash == hash_credential(credential) => {
                self.logged_in = true;
                Ok(())
            }
            Some(_) => Err(StoreError::IncorrectCredential),
        }
    }

    /// Key operations require an authenticated session on protected tokens
    fn require_unlocked(&self) -> Result<(), StoreError> {
        if self.needs_login() && !self.logged_in {
            return Err(StoreError::AccessDenied("token is locked".to_string()));
        }
        Ok(())
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn find_by_name(&self, name: &str) -> Result<Option<StoredCertificate>, StoreError> {
        self.certificates
            .iter()
            .find(|cert| cert.name == name)
            .map(|cert| {
                let der = B64.decode(&cert.der).map_err(|e| {
                    StoreError::InvalidFormat(format!(
                        "certificate {} is not valid base64: {}",
                        cert.id, e
                    ))
                })?;
                Ok(StoredCertificate {
                    handle: CertificateHandle::new(cert.id.clone()),
                    name: cert.name.clone(),
                    der,
                })
            })
            .transpose()
    }

    pub fn certificate_count(&self, name: &str) -> usize {
        self.certificates.iter().filter(|c| c.name == name).count()
    }

    pub fn delete_certificate(&mut self, handle: &CertificateHandle) -> Result<(), StoreError> {
        self.require_unlocked()?;
        let index = self
            .certificates
            .iter()
            .position(|c| c.id == handle.as_str())
            .ok_or_else(|| StoreError::NotFound(handle.to_string()))?;
        let removed = self.certificates.remove(index);

        if let Some(key_id) = removed.key_id {
            let still_used = self
                .certificates
                .iter()
                .any(|c| c.key_id.as_deref() == Some(key_id.as_str()));
            if !still_used {
                self.keys.remove(&key_id);
            }
        }
        self.touch();
        Ok(())
    }

    pub fn import_certificate(
        &mut self,
        der: &[u8],
        name: &str,
    ) -> Result<CertificateHandle, StoreError> {
        let spki = {
            let (_, x509) = X509Certificate::from_der(der)
                .map_err(|e| StoreError::InvalidFormat(format!("not a certificate: {}", e)))?;
            x509.public_key().subject_public_key.data.to_vec()
        };
        let encoded_spki = B64.encode(&spki);
        let key_id = self
            .keys
            .iter()
            .find(|(_, key)| key.public_key == encoded_spki)
            .map(|(id, _)| id.clone());

        let id = new_id();
        self.certificates.push(StoredCert {
            id: id.clone(),
            name: name.to_string(),
            der: B64.encode(der),
            key_id,
            imported_at: Utc::now(),
        });
        self.touch();
        Ok(CertificateHandle::new(id))
    }

    pub fn generate_key_pair(&mut self, curve: Curve) -> Result<KeyHandle, StoreError> {
        self.require_unlocked()?;
        let (private_key, public_key) = match curve {
            Curve::P256 => {
                let signing_key = SigningKey::random(&mut OsRng);
                let public_key = signing_key
                    .verifying_key()
                    .to_encoded_point(false)
                    .as_bytes()
                    .to_vec();
                (signing_key.to_bytes().to_vec(), public_key)
            }
        };

        let id = new_id();
        self.keys.insert(
            id.clone(),
            StoredKey {
                curve,
                private_key: B64.encode(private_key),
                public_key: B64.encode(public_key),
                created_at: Utc::now(),
            },
        );
        self.touch();
        Ok(KeyHandle::new(id))
    }

    fn key(&self, handle: &KeyHandle) -> Result<&StoredKey, StoreError> {
        self.keys
            .get(handle.as_str())
            .ok_or_else(|| StoreError::NotFound(handle.to_string()))
    }

    pub fn public_key(&self, handle: &KeyHandle) -> Result<Vec<u8>, StoreError> {
        let key = self.key(handle)?;
        B64.decode(&key.public_key)
            .map_err(|e| StoreError::InvalidFormat(format!("{}: {}", handle, e)))
    }

    pub fn sign(
        &self,
        handle: &KeyHandle,
        data: &[u8],
        scheme: SignatureScheme,
    ) -> Result<Vec<u8>, StoreError> {
        self.require_unlocked()?;
        let key = self.key(handle)?;
        if SignatureScheme::for_curve(key.curve) != scheme {
            return Err(StoreError::Unsupported(format!(
                "{:?} cannot sign with {:?}",
                key.curve, scheme
            )));
        }

        let private_key = B64
            .decode(&key.private_key)
            .map_err(|e| StoreError::InvalidFormat(format!("{}: {}", handle, e)))?;
        match scheme {
            SignatureScheme::EcdsaP256Sha256 => {
                let signing_key = SigningKey::from_slice(&private_key).map_err(|e| {
                    StoreError::InvalidFormat(format!("{} is not a P-256 key: {}", handle, e))
                })?;
                let signature: Signature = signing_key.sign(data);
                Ok(signature.to_der().as_bytes().to_vec())
            }
        }
    }

    pub fn delete_key(&mut self, handle: &KeyHandle) -> Result<(), StoreError> {
        self.require_unlocked()?;
        if self
            .certificates
            .iter()
            .any(|c| c.key_id.as_deref() == Some(handle.as_str()))
        {
            return Err(StoreError::AccessDenied(format!(
                "{} is linked to an imported certificate",
                handle
            )));
        }
        self.keys
            .remove(handle.as_str())
            .ok_or_else(|| StoreError::NotFound(handle.to_string()))?;
        self.touch();
        Ok(())
    }
}

/// Fill `buf` from the operating system's random source
pub(crate) fn random_bytes(buf: &mut [u8]) -> Result<(), StoreError> {
    OsRng
        .try_fill_bytes(buf)
        .map_err(|e| StoreError::Unavailable(format!("random source failed: {}", e)))
}
