//! Caller-facing certificate service
//!
//! [`LocalCertService`] checks boundary preconditions, unlocks the key store
//! on the caller's thread (the only step that may block the caller, while the
//! login prompt is open) and then runs the lifecycle operation in the
//! background.
//!
//! # Example
//!
//! ```no_run
//! use localcert::{LocalCertConfig, LocalCertService, MemoryKeyStore, NoPrompt};
//! use std::sync::Arc;
//!
//! # async fn example() -> localcert::Result<()> {
//! let service = LocalCertService::new(
//!     Arc::new(MemoryKeyStore::new()),
//!     Arc::new(NoPrompt),
//!     LocalCertConfig::default(),
//! )?;
//!
//! let cert = service.get_or_create_certificate("devtools").await?;
//! println!("{} expires {}", cert.subject(), cert.not_after());
//!
//! service.remove_certificate("devtools").await?;
//! # Ok(())
//! # }
//! ```

use crate::certificate::Certificate;
use crate::config::{self, LocalCertConfig};
use crate::error::{Error, Result};
use crate::gateway::KeyStoreGateway;
use crate::manager::CertificateLifecycleManager;
use crate::runner::AsyncTaskRunner;
use crate::store::{KeyStore, LoginPrompt};
use std::sync::Arc;
use tracing::debug;

/// Single-shot delivery target for [`LocalCertService::get_or_create_cert`]
pub type CertificateCallback = Box<dyn FnOnce(Result<Certificate>) + Send + 'static>;

/// Single-shot delivery target for [`LocalCertService::remove_cert`]
pub type RemoveCallback = Box<dyn FnOnce(Result<()>) + Send + 'static>;

/// Entry point for obtaining and removing local identity certificates
#[derive(Debug, Clone)]
pub struct LocalCertService {
    manager: CertificateLifecycleManager,
    config: LocalCertConfig,
}

impl LocalCertService {
    /// Create a service over `store`, unlocking it through `prompt`
    ///
    /// Fails with [`Error::InvalidArgument`] when `config` does not validate.
    pub fn new(
        store: Arc<dyn KeyStore>,
        prompt: Arc<dyn LoginPrompt>,
        config: LocalCertConfig,
    ) -> Result<Self> {
        config::validate(&config)?;
        let gateway = KeyStoreGateway::new(store, prompt);
        Ok(Self {
            manager: CertificateLifecycleManager::new(gateway, config.clone()),
            config,
        })
    }

    pub fn config(&self) -> &LocalCertConfig {
        &self.config
    }

    /// Get the certificate for `name`, creating or renewing it if needed
    ///
    /// Unlocking happens before the first await, on the polling thread. If
    /// the store needs a login, that thread is blocked until the
    /// [`LoginPrompt`] returns. On a current-thread runtime this stalls every
    /// other task, so unlock up front or use a multi-thread runtime when the
    /// prompt is interactive. Store work itself runs on the blocking pool.
    pub async fn get_or_create_certificate(&self, name: &str) -> Result<Certificate> {
        self.prepare(name)?;
        let manager = self.manager.clone();
        let owned = name.to_string();
        AsyncTaskRunner::current()?
            .dispatch(format!("get-or-create '{}'", name), move || {
                manager.get_or_create(&owned)
            })
            .join()
            .await
    }

    /// Remove every certificate stored under `name`
    ///
    /// Succeeds when nothing was stored. Unlocks on the polling thread like
    /// [`get_or_create_certificate`](Self::get_or_create_certificate).
    pub async fn remove_certificate(&self, name: &str) -> Result<()> {
        self.prepare(name)?;
        let manager = self.manager.clone();
        let owned = name.to_string();
        AsyncTaskRunner::current()?
            .dispatch(format!("remove '{}'", name), move || manager.remove(&owned))
            .join()
            .await
    }

    /// Whether using the store would open the login prompt
    ///
    /// Never prompts.
    pub fn is_login_prompt_required(&self) -> Result<bool> {
        self.manager.is_login_required()
    }

    /// Callback form of [`get_or_create_certificate`](Self::get_or_create_certificate)
    ///
    /// Returns an error without invoking anything when `name` is empty or
    /// `callback` is missing. Otherwise the callback receives exactly one
    /// result, including an unlock failure, and this returns `Ok(())`.
    pub fn get_or_create_cert(
        &self,
        name: &str,
        callback: Option<CertificateCallback>,
    ) -> Result<()> {
        let callback = Self::check_arguments(name, callback)?;
        let runner = AsyncTaskRunner::current()?;

        if let Err(e) = self.manager.gateway().ensure_unlocked() {
            callback(Err(e));
            return Ok(());
        }

        let manager = self.manager.clone();
        let owned = name.to_string();
        runner.dispatch_with_callback(
            format!("get-or-create '{}'", name),
            move || manager.get_or_create(&owned),
            callback,
        );
        Ok(())
    }

    /// Callback form of [`remove_certificate`](Self::remove_certificate)
    pub fn remove_cert(&self, name: &str, callback: Option<RemoveCallback>) -> Result<()> {
        let callback = Self::check_arguments(name, callback)?;
        let runner = AsyncTaskRunner::current()?;

        if let Err(e) = self.manager.gateway().ensure_unlocked() {
            callback(Err(e));
            return Ok(());
        }

        let manager = self.manager.clone();
        let owned = name.to_string();
        runner.dispatch_with_callback(
            format!("remove '{}'", name),
            move || manager.remove(&owned),
            callback,
        );
        Ok(())
    }

    fn check_name(name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::InvalidArgument("identity name is empty".to_string()));
        }
        Ok(())
    }

    fn check_arguments<C>(name: &str, callback: Option<C>) -> Result<C> {
        Self::check_name(name)?;
        callback.ok_or_else(|| Error::InvalidArgument("result callback is missing".to_string()))
    }

    /// Validate `name` and unlock the store on the caller's thread
    fn prepare(&self, name: &str) -> Result<()> {
        Self::check_name(name)?;
        debug!("Unlocking key store for '{}'", name);
        self.manager.gateway().ensure_unlocked()
    }
}
