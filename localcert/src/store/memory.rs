//! In-process software token

use super::token::{self, TokenState};
use super::{
    CertificateHandle, Curve, KeyHandle, KeyStore, SignatureScheme, StoreError,
    StoredCertificate,
};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Token name reported when none is configured
pub const DEFAULT_TOKEN_NAME: &str = "Software Security Device";

/// Key store that keeps its token in memory
///
/// Every method takes the token lock for the duration of a single store
/// operation, so concurrent callers observe each operation atomically but
/// never a sequence of them.
#[derive(Debug)]
pub struct MemoryKeyStore {
    token_name: String,
    state: Mutex<TokenState>,
}

impl MemoryKeyStore {
    /// Create an uninitialized token
    pub fn new() -> Self {
        Self::with_token_name(DEFAULT_TOKEN_NAME)
    }

    /// Create an uninitialized token with a custom name
    pub fn with_token_name(token_name: impl Into<String>) -> Self {
        Self::from_state(token_name, TokenState::default())
    }

    /// Create a token protected by `credential`, not yet logged in
    pub fn with_credential(credential: &str) -> Result<Self, StoreError> {
        let store = Self::new();
        store.lock()?.init_credential(credential)?;
        Ok(store)
    }

    pub(crate) fn from_state(token_name: impl Into<String>, state: TokenState) -> Self {
        Self {
            token_name: token_name.into(),
            state: Mutex::new(state),
        }
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, TokenState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Storage("token lock poisoned".to_string()))
    }

    /// End the authenticated session
    pub fn logout(&self) -> Result<(), StoreError> {
        self.lock()?.logged_in = false;
        Ok(())
    }

    /// Number of certificates stored under `name`
    pub fn certificate_count(&self, name: &str) -> Result<usize, StoreError> {
        Ok(self.lock()?.certificate_count(name))
    }

    /// Number of private keys held by the token
    pub fn key_count(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.keys.len())
    }
}

impl Default for MemoryKeyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyStore for MemoryKeyStore {
    fn token_name(&self) -> &str {
        &self.token_name
    }

    fn check_available(&self) -> Result<(), StoreError> {
        self.lock().map(|_| ())
    }

    fn needs_user_init(&self) -> Result<bool, StoreError> {
        Ok(self.lock()?.needs_user_init())
    }

    fn init_credential(&self, credential: &str) -> Result<(), StoreError> {
        self.lock()?.init_credential(credential)
    }

    fn needs_login(&self) -> Result<bool, StoreError> {
        Ok(self.lock()?.needs_login())
    }

    fn is_logged_in(&self) -> Result<bool, StoreError> {
        Ok(self.lock()?.logged_in)
    }

    fn login(&self, credential: &str) -> Result<(), StoreError> {
        self.lock()?.login(credential)
    }

    fn find_by_name(&self, name: &str) -> Result<Option<StoredCertificate>, StoreError> {
        self.lock()?.find_by_name(name)
    }

    fn delete_by_handle(&self, handle: &CertificateHandle) -> Result<(), StoreError> {
        self.lock()?.delete_certificate(handle)?;
        debug!("Deleted {} from token '{}'", handle, self.token_name);
        Ok(())
    }

    fn import_certificate(
        &self,
        der: &[u8],
        name: &str,
    ) -> Result<CertificateHandle, StoreError> {
        let handle = self.lock()?.import_certificate(der, name)?;
        debug!("Imported {} as '{}'", handle, name);
        Ok(handle)
    }

    fn random_bytes(&self, buf: &mut [u8]) -> Result<(), StoreError> {
        token::random_bytes(buf)
    }

    fn generate_key_pair(&self, curve: Curve) -> Result<KeyHandle, StoreError> {
        self.lock()?.generate_key_pair(curve)
    }

    fn public_key(&self, key: &KeyHandle) -> Result<Vec<u8>, StoreError> {
        self.lock()?.public_key(key)
    }

    fn sign(
        &self,
        key: &KeyHandle,
        data: &[u8],
        scheme: SignatureScheme,
    ) -> Result<Vec<u8>, StoreError> {
        self.lock()?.sign(key, data, scheme)
    }

    fn delete_key(&self, key: &KeyHandle) -> Result<(), StoreError> {
        self.lock()?.delete_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};

    fn foreign_der(cn: &str) -> Vec<u8> {
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, cn);
        params.distinguished_name = dn;
        let key = KeyPair::generate().unwrap();
        params.self_signed(&key).unwrap().der().to_vec()
    }

    #[test]
    fn test_import_find_delete() {
        let store = MemoryKeyStore::new();
        assert!(store.find_by_name("devtools").unwrap().is_none());

        let der = foreign_der("devtools");
        let handle = store.import_certificate(&der, "devtools").unwrap();
        let found = store.find_by_name("devtools").unwrap().unwrap();
        assert_eq!(found.handle, handle);
        assert_eq!(found.der, der);
        assert_eq!(found.name, "devtools");
        assert!(store.find_by_name("other").unwrap().is_none());

        store.delete_by_handle(&handle).unwrap();
        assert!(store.find_by_name("devtools").unwrap().is_none());
        assert!(matches!(
            store.delete_by_handle(&handle),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_with_credential_is_locked() {
        let store = MemoryKeyStore::with_credential("hunter2").unwrap();
        assert!(!store.needs_user_init().unwrap());
        assert!(store.needs_login().unwrap());
        assert!(!store.is_logged_in().unwrap());
        assert!(store.generate_key_pair(Curve::P256).is_err());

        store.login("hunter2").unwrap();
        assert!(store.is_logged_in().unwrap());
        assert!(store.generate_key_pair(Curve::P256).is_ok());

        store.logout().unwrap();
        assert!(!store.is_logged_in().unwrap());
    }

    #[test]
    fn test_random_bytes_fill() {
        let store = MemoryKeyStore::new();
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        store.random_bytes(&mut a).unwrap();
        store.random_bytes(&mut b).unwrap();
        assert_ne!(a, b);
    }
}
