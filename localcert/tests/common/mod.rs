#![allow(dead_code)]

use localcert::store::{
    CertificateHandle, Curve, KeyHandle, KeyStore, SignatureScheme, StoreError, StoredCertificate,
};
use localcert::{LocalCertConfig, LocalCertService, MemoryKeyStore, NoPrompt};
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use time::{Duration, OffsetDateTime};

/// Memory store wrapper that counts every call and can inject failures
#[derive(Debug, Default)]
pub struct CountingKeyStore {
    pub inner: MemoryKeyStore,
    calls: AtomicUsize,
    key_generations: AtomicUsize,
    fail_import: AtomicBool,
    fail_sign: AtomicBool,
    hide_certificates: AtomicBool,
    unavailable: AtomicBool,
}

impl CountingKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of `generate_key_pair` calls so far
    pub fn key_generations(&self) -> usize {
        self.key_generations.load(Ordering::SeqCst)
    }

    pub fn fail_imports(&self) {
        self.fail_import.store(true, Ordering::SeqCst);
    }

    pub fn fail_signing(&self) {
        self.fail_sign.store(true, Ordering::SeqCst);
    }

    /// Imports still land in `inner`, but lookups stop finding them
    pub fn hide_certificates(&self) {
        self.hide_certificates.store(true, Ordering::SeqCst);
    }

    pub fn go_offline(&self) {
        self.unavailable.store(true, Ordering::SeqCst);
    }

    fn tick(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

impl KeyStore for CountingKeyStore {
    fn token_name(&self) -> &str {
        self.inner.token_name()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        self.tick();
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store is offline".to_string()));
        }
        self.inner.check_available()
    }

    fn needs_user_init(&self) -> Result<bool, StoreError> {
        self.tick();
        self.inner.needs_user_init()
    }

    fn init_credential(&self, credential: &str) -> Result<(), StoreError> {
        self.tick();
        self.inner.init_credential(credential)
    }

    fn needs_login(&self) -> Result<bool, StoreError> {
        self.tick();
        self.inner.needs_login()
    }

    fn is_logged_in(&self) -> Result<bool, StoreError> {
        self.tick();
        self.inner.is_logged_in()
    }

    fn login(&self, credential: &str) -> Result<(), StoreError> {
        self.tick();
        self.inner.login(credential)
    }

    fn find_by_name(&self, name: &str) -> Result<Option<StoredCertificate>, StoreError> {
        self.tick();
        if self.hide_certificates.load(Ordering::SeqCst) {
            return Ok(None);
        }
        self.inner.find_by_name(name)
    }

    fn delete_by_handle(&self, handle: &CertificateHandle) -> Result<(), StoreError> {
        self.tick();
        self.inner.delete_by_handle(handle)
    }

    fn import_certificate(
        &self,
        der: &[u8],
        name: &str,
    ) -> Result<CertificateHandle, StoreError> {
        self.tick();
        if self.fail_import.load(Ordering::SeqCst) {
            return Err(StoreError::Storage("import rejected".to_string()));
        }
        self.inner.import_certificate(der, name)
    }

    fn random_bytes(&self, buf: &mut [u8]) -> Result<(), StoreError> {
        self.tick();
        self.inner.random_bytes(buf)
    }

    fn generate_key_pair(&self, curve: Curve) -> Result<KeyHandle, StoreError> {
        self.tick();
        self.key_generations.fetch_add(1, Ordering::SeqCst);
        self.inner.generate_key_pair(curve)
    }

    fn public_key(&self, key: &KeyHandle) -> Result<Vec<u8>, StoreError> {
        self.tick();
        self.inner.public_key(key)
    }

    fn sign(
        &self,
        key: &KeyHandle,
        data: &[u8],
        scheme: SignatureScheme,
    ) -> Result<Vec<u8>, StoreError> {
        self.tick();
        if self.fail_sign.load(Ordering::SeqCst) {
            return Err(StoreError::Storage("signing rejected".to_string()));
        }
        self.inner.sign(key, data, scheme)
    }

    fn delete_key(&self, key: &KeyHandle) -> Result<(), StoreError> {
        self.tick();
        self.inner.delete_key(key)
    }
}

/// Service over `store` that never prompts
pub fn service(store: Arc<dyn KeyStore>) -> LocalCertService {
    LocalCertService::new(store, Arc::new(NoPrompt), LocalCertConfig::default())
        .expect("default config is valid")
}

fn params(cn: &str, not_before: OffsetDateTime, not_after: OffsetDateTime) -> CertificateParams {
    let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, cn);
    params.distinguished_name = dn;
    params.not_before = not_before;
    params.not_after = not_after;
    params
}

/// Self-signed `CN=<cn>` certificate that expired a month ago
pub fn expired_self_signed(cn: &str) -> Vec<u8> {
    let now = OffsetDateTime::now_utc();
    let key = KeyPair::generate().unwrap();
    params(cn, now - Duration::days(400), now - Duration::days(30))
        .self_signed(&key)
        .unwrap()
        .der()
        .to_vec()
}

/// Currently valid `CN=<cn>` certificate issued by a different key
pub fn foreign_issued(cn: &str) -> Vec<u8> {
    let now = OffsetDateTime::now_utc();
    let issuer_key = KeyPair::generate().unwrap();
    let issuer = params("Other Issuer", now - Duration::days(1), now + Duration::days(365))
        .self_signed(&issuer_key)
        .unwrap();

    let key = KeyPair::generate().unwrap();
    params(cn, now - Duration::days(1), now + Duration::days(365))
        .signed_by(&key, &issuer, &issuer_key)
        .unwrap()
        .der()
        .to_vec()
}

/// Install a debug-level subscriber that writes through the test harness
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}
