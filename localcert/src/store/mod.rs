//! Key and Certificate Store Abstraction Layer
//!
//! This module defines the [`KeyStore`] trait through which the lifecycle
//! reaches the external token that owns private keys and certificates, and
//! the [`LoginPrompt`] trait for the interactive unlock step.
//!
//! The trait follows the shape of a PKCS#11 token: keys are generated and
//! used for signing inside the store and are only ever exposed to callers as
//! opaque [`KeyHandle`]s. Certificates are imported under a nickname (the
//! identity name) and found again by that nickname.
//!
//! # Backends
//!
//! - [`MemoryKeyStore`]: in-process software token, lost on drop
//! - [`FileKeyStore`]: software token persisted as JSON
//!
//! Both backends keep private keys unencrypted and are suitable for
//! development, tests and local tooling. Production deployments should
//! implement [`KeyStore`] over a platform keychain or hardware token.
//!
//! # Credential lifecycle
//!
//! A token starts out uninitialized ([`KeyStore::needs_user_init`]). The
//! gateway initializes it with an empty credential on first use. If a user
//! later sets a non-empty credential, the token requires a login before key
//! operations are permitted.

mod file;
mod memory;
mod token;

pub use file::{
    default_token_path, FileKeyStore, DEFAULT_LOCALCERT_DIR, DEFAULT_TOKEN_FILE, LOCALCERT_HOME_ENV,
};
pub use memory::{MemoryKeyStore, DEFAULT_TOKEN_NAME};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error types for key store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested key or certificate was not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// A storage backend error occurred
    #[error("Storage error: {0}")]
    Storage(String),

    /// The token is locked or the operation is not permitted
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// The supplied credential did not unlock the token
    #[error("Incorrect credential")]
    IncorrectCredential,

    /// Stored or supplied material could not be decoded
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// The storage backend is unavailable
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// The requested algorithm is not supported by this store
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

/// Opaque reference to a private key held by the store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyHandle(String);

impl KeyHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "key:{}", self.0)
    }
}

/// Opaque reference to a certificate entry in the store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CertificateHandle(String);

impl CertificateHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CertificateHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cert:{}", self.0)
    }
}

/// Elliptic curves a store may generate keys on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Curve {
    /// NIST P-256 (secp256r1)
    P256,
}

/// Signature algorithms a store may sign with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureScheme {
    /// ECDSA over P-256 with SHA-256, DER-encoded signature
    EcdsaP256Sha256,
}

impl SignatureScheme {
    /// The scheme paired with keys on `curve`
    pub fn for_curve(curve: Curve) -> Self {
        match curve {
            Curve::P256 => SignatureScheme::EcdsaP256Sha256,
        }
    }
}

/// A certificate entry as the store reports it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCertificate {
    /// Handle for deleting this entry
    pub handle: CertificateHandle,
    /// Nickname the certificate was imported under
    pub name: String,
    /// DER encoding as held by the store
    pub der: Vec<u8>,
}

/// Trait for key and certificate store backends
///
/// Implementations must be `Send + Sync`: the lifecycle runs store calls on
/// a blocking worker thread while the caller may query credential state
/// from its own thread. Each method is a single store operation; the store
/// serializes its own mutations but no sequence of calls is transactional.
pub trait KeyStore: Send + Sync + fmt::Debug {
    /// Human-readable token name shown by login prompts
    fn token_name(&self) -> &str;

    /// Fails with [`StoreError::Unavailable`] when the backend cannot be used
    fn check_available(&self) -> Result<(), StoreError>;

    /// Whether the token has never had a credential set
    fn needs_user_init(&self) -> Result<bool, StoreError>;

    /// Set the initial credential of an uninitialized token
    fn init_credential(&self, credential: &str) -> Result<(), StoreError>;

    /// Whether the token is protected by a non-empty credential
    fn needs_login(&self) -> Result<bool, StoreError>;

    /// Whether the current session has authenticated to the token
    fn is_logged_in(&self) -> Result<bool, StoreError>;

    /// Authenticate with the given credential
    ///
    /// Returns [`StoreError::IncorrectCredential`] when it does not match.
    fn login(&self, credential: &str) -> Result<(), StoreError>;

    /// Find a certificate imported under `name`
    ///
    /// When several certificates share the name, any one of them may be
    /// returned.
    fn find_by_name(&self, name: &str) -> Result<Option<StoredCertificate>, StoreError>;

    /// Delete a certificate and the private key it was imported with
    fn delete_by_handle(&self, handle: &CertificateHandle) -> Result<(), StoreError>;

    /// Import a DER certificate under `name`, linking it to the store's
    /// private key whose public half matches the certificate
    fn import_certificate(&self, der: &[u8], name: &str)
        -> Result<CertificateHandle, StoreError>;

    /// Fill `buf` from the store's random source
    fn random_bytes(&self, buf: &mut [u8]) -> Result<(), StoreError>;

    /// Generate a non-exportable key pair inside the store
    fn generate_key_pair(&self, curve: Curve) -> Result<KeyHandle, StoreError>;

    /// Public half of a stored key as an uncompressed SEC1 point
    fn public_key(&self, key: &KeyHandle) -> Result<Vec<u8>, StoreError>;

    /// Sign `data` with a stored key
    fn sign(
        &self,
        key: &KeyHandle,
        data: &[u8],
        scheme: SignatureScheme,
    ) -> Result<Vec<u8>, StoreError>;

    /// Delete a stored key that no certificate was imported for
    fn delete_key(&self, key: &KeyHandle) -> Result<(), StoreError>;
}

/// Interactive authentication collaborator
///
/// Invoked only when the token has a credential set and the session is not
/// logged in. Implementations may block indefinitely waiting for the user.
pub trait LoginPrompt: Send + Sync {
    /// Ask the user for the credential of `token_name`
    ///
    /// Returns `None` when the user cancels.
    fn prompt(&self, token_name: &str) -> Option<String>;
}

/// A prompt for headless use that always cancels
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPrompt;

impl LoginPrompt for NoPrompt {
    fn prompt(&self, _token_name: &str) -> Option<String> {
        None
    }
}

/// A prompt that answers with a fixed credential
#[derive(Debug, Clone)]
pub struct StaticPrompt {
    credential: String,
}

impl StaticPrompt {
    pub fn new(credential: impl Into<String>) -> Self {
        Self {
            credential: credential.into(),
        }
    }
}

impl LoginPrompt for StaticPrompt {
    fn prompt(&self, _token_name: &str) -> Option<String> {
        Some(self.credential.clone())
    }
}
