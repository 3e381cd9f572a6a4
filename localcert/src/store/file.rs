//! File-backed software token
//!
//! The token is kept in memory and rewritten to a JSON file after every
//! mutation, so separate processes opening the same path see each other's
//! certificates once they reopen the store.

use super::memory::{MemoryKeyStore, DEFAULT_TOKEN_NAME};
use super::token::TokenState;
use super::{
    CertificateHandle, Curve, KeyHandle, KeyStore, SignatureScheme, StoreError,
    StoredCertificate,
};
use dirs::home_dir;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Default directory for localcert data
pub const DEFAULT_LOCALCERT_DIR: &str = ".localcert";
/// Default filename for the token file
pub const DEFAULT_TOKEN_FILE: &str = "token.json";
/// Environment variable overriding the localcert directory
pub const LOCALCERT_HOME_ENV: &str = "LOCALCERT_HOME";

/// Get the default token path
///
/// Uses `$LOCALCERT_HOME/token.json` when the variable is set and
/// `~/.localcert/token.json` otherwise.
pub fn default_token_path() -> Option<PathBuf> {
    if let Ok(dir) = env::var(LOCALCERT_HOME_ENV) {
        return Some(PathBuf::from(dir).join(DEFAULT_TOKEN_FILE));
    }
    home_dir().map(|home| home.join(DEFAULT_LOCALCERT_DIR).join(DEFAULT_TOKEN_FILE))
}

/// Key store persisted as a JSON file
///
/// **WARNING**: private keys are written base64-encoded but unencrypted.
/// The credential is stored only as a SHA-256 hash. Use for development and
/// local tooling; protect the file with OS permissions.
#[derive(Debug)]
pub struct FileKeyStore {
    path: PathBuf,
    inner: MemoryKeyStore,
}

impl FileKeyStore {
    /// Open the token at the default location
    pub fn open_default() -> Result<Self, StoreError> {
        let path = default_token_path().ok_or_else(|| {
            StoreError::Unavailable(
                "Could not determine home directory for default token path".to_string(),
            )
        })?;
        Self::open(path)
    }

    /// Open the token at `path`, starting empty if the file does not exist
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let state = Self::load_from_path(&path)?;
        debug!(
            "Opened token at {} with {} certificates",
            path.display(),
            state.certificates.len()
        );
        Ok(Self {
            inner: MemoryKeyStore::from_state(DEFAULT_TOKEN_NAME, state),
            path,
        })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// End the authenticated session
    pub fn logout(&self) -> Result<(), StoreError> {
        self.inner.logout()
    }

    /// Number of certificates stored under `name`
    pub fn certificate_count(&self, name: &str) -> Result<usize, StoreError> {
        self.inner.certificate_count(name)
    }

    fn load_from_path(path: &Path) -> Result<TokenState, StoreError> {
        if !path.exists() {
            return Ok(TokenState::default());
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| StoreError::Storage(format!("Failed to read token file: {}", e)))?;

        serde_json::from_str(&contents)
            .map_err(|e| StoreError::InvalidFormat(format!("Failed to parse token file: {}", e)))
    }

    /// Apply `op` to a copy of the token, write the copy, then commit it
    ///
    /// The token lock is held until the file has been replaced, so
    /// concurrent mutations are written one at a time. When `op` or the
    /// write fails the in-memory token is left unchanged.
    fn mutate<T>(
        &self,
        op: impl FnOnce(&mut TokenState) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut state = self.inner.lock()?;
        let mut next = state.clone();
        let value = op(&mut next)?;
        self.write(&next)?;
        *state = next;
        Ok(value)
    }

    /// Replace the token file with `state`
    fn write(&self, state: &TokenState) -> Result<(), StoreError> {
        let contents = serde_json::to_string_pretty(state)
            .map_err(|e| StoreError::Storage(format!("Failed to serialize token: {}", e)))?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                StoreError::Storage(format!("Failed to create token directory: {}", e))
            })?;
        }

        let tmp = self
            .path
            .with_extension(format!("json.{}.tmp", std::process::id()));
        fs::write(&tmp, contents)
            .map_err(|e| StoreError::Storage(format!("Failed to write token file: {}", e)))?;
        fs::rename(&tmp, &self.path).map_err(|e| {
            if let Err(cleanup) = fs::remove_file(&tmp) {
                warn!("Leaving partial token file at {}: {}", tmp.display(), cleanup);
            }
            StoreError::Storage(format!("Failed to replace token file: {}", e))
        })
    }
}

impl KeyStore for FileKeyStore {
    fn token_name(&self) -> &str {
        self.inner.token_name()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => {
                fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Unavailable(format!(
                        "token directory {} is not usable: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
            _ => {}
        }
        self.inner.check_available()
    }

    fn needs_user_init(&self) -> Result<bool, StoreError> {
        self.inner.needs_user_init()
    }

    fn init_credential(&self, credential: &str) -> Result<(), StoreError> {
        self.mutate(|state| state.init_credential(credential))
    }

    fn needs_login(&self) -> Result<bool, StoreError> {
        self.inner.needs_login()
    }

    fn is_logged_in(&self) -> Result<bool, StoreError> {
        self.inner.is_logged_in()
    }

    fn login(&self, credential: &str) -> Result<(), StoreError> {
        self.inner.login(credential)
    }

    fn find_by_name(&self, name: &str) -> Result<Option<StoredCertificate>, StoreError> {
        self.inner.find_by_name(name)
    }

    fn delete_by_handle(&self, handle: &CertificateHandle) -> Result<(), StoreError> {
        self.mutate(|state| state.delete_certificate(handle))?;
        debug!("Deleted {} from {}", handle, self.path.display());
        Ok(())
    }

    fn import_certificate(
        &self,
        der: &[u8],
        name: &str,
    ) -> Result<CertificateHandle, StoreError> {
        let handle = self.mutate(|state| state.import_certificate(der, name))?;
        debug!("Imported {} as '{}' into {}", handle, name, self.path.display());
        Ok(handle)
    }

    fn random_bytes(&self, buf: &mut [u8]) -> Result<(), StoreError> {
        self.inner.random_bytes(buf)
    }

    fn generate_key_pair(&self, curve: Curve) -> Result<KeyHandle, StoreError> {
        self.mutate(|state| state.generate_key_pair(curve))
    }

    fn public_key(&self, key: &KeyHandle) -> Result<Vec<u8>, StoreError> {
        self.inner.public_key(key)
    }

    fn sign(
        &self,
        key: &KeyHandle,
        data: &[u8],
        scheme: SignatureScheme,
    ) -> Result<Vec<u8>, StoreError> {
        self.inner.sign(key, data, scheme)
    }

    fn delete_key(&self, key: &KeyHandle) -> Result<(), StoreError> {
        self.mutate(|state| state.delete_key(key))
    }
}
