//! Gateway to the external key store
//!
//! [`KeyStoreGateway`] adapts a [`KeyStore`] and a [`LoginPrompt`] to the
//! operations the lifecycle needs: unlocking the token, looking up a
//! certificate by identity name, and sweeping away every certificate stored
//! under a name.

use crate::certificate::Certificate;
use crate::config::LocalCertConfig;
use crate::error::{Error, Result};
use crate::store::{CertificateHandle, KeyStore, LoginPrompt, StoreError, StoredCertificate};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Failure of the removal sweep
#[derive(Debug, thiserror::Error)]
pub enum RemovalError {
    /// A certificate under the name fails the self-issued check and was left
    /// in place
    #[error("certificate under '{name}' was not issued by this manager: {reason}")]
    UnexpectedCertificate {
        /// Identity name being swept
        name: String,
        /// Which check failed
        reason: String,
    },

    /// The store failed during lookup or deletion
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Adapter over the key store and its unlock prompt
#[derive(Clone)]
pub struct KeyStoreGateway {
    store: Arc<dyn KeyStore>,
    prompt: Arc<dyn LoginPrompt>,
}

impl std::fmt::Debug for KeyStoreGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyStoreGateway")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl KeyStoreGateway {
    /// Create a gateway over `store`, unlocking through `prompt`
    pub fn new(store: Arc<dyn KeyStore>, prompt: Arc<dyn LoginPrompt>) -> Self {
        Self { store, prompt }
    }

    /// The underlying store
    pub fn store(&self) -> &Arc<dyn KeyStore> {
        &self.store
    }

    /// Give an unprovisioned token an empty credential
    fn init_if_needed(&self) -> Result<()> {
        if self.store.needs_user_init()? {
            info!(
                "Initializing token '{}' with an empty credential",
                self.store.token_name()
            );
            if let Err(e) = self.store.init_credential("") {
                // Another caller may have initialized it in the meantime.
                if self.store.needs_user_init()? {
                    return Err(e.into());
                }
                debug!(
                    "Token '{}' was initialized concurrently",
                    self.store.token_name()
                );
            }
        }
        Ok(())
    }

    /// Whether using the token would require the interactive prompt
    ///
    /// Initializes an unprovisioned token but never prompts.
    pub fn is_login_required(&self) -> Result<bool> {
        self.init_if_needed()?;
        Ok(self.store.needs_login()? && !self.store.is_logged_in()?)
    }

    /// Make the token usable, prompting for its credential when locked
    ///
    /// Blocks for as long as the prompt does.
    pub fn ensure_unlocked(&self) -> Result<()> {
        if !self.is_login_required()? {
            return Ok(());
        }

        let token_name = self.store.token_name();
        info!("Token '{}' is locked, prompting for credential", token_name);
        let credential = self.prompt.prompt(token_name).ok_or_else(|| {
            Error::AuthDenied(format!("login to token '{}' was cancelled", token_name))
        })?;

        match self.store.login(&credential) {
            Ok(()) => {
                debug!("Logged in to token '{}'", token_name);
                Ok(())
            }
            Err(StoreError::IncorrectCredential) => {
                warn!("Incorrect credential for token '{}'", token_name);
                Err(Error::AuthDenied(format!(
                    "incorrect credential for token '{}'",
                    token_name
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Look up the certificate stored under `name`
    ///
    /// Stored bytes that do not parse as a certificate are reported as
    /// [`StoreError::InvalidFormat`].
    pub fn find_by_name(&self, name: &str) -> Result<Option<Certificate>> {
        let Some(stored) = self.store.find_by_name(name)? else {
            return Ok(None);
        };
        let cert = Certificate::from_der(stored.der).map_err(|e| {
            StoreError::InvalidFormat(format!("{} under '{}': {}", stored.handle, name, e))
        })?;
        Ok(Some(cert))
    }

    /// Delete every certificate (and its key) stored under `name`
    ///
    /// Succeeds when nothing is left, including when nothing was there. Each
    /// certificate is re-checked before deletion; the first one that is not
    /// a self-signed `CN=<name>` certificate aborts the sweep and stays in
    /// the store.
    pub fn remove_all_for_name(&self, name: &str) -> std::result::Result<(), RemovalError> {
        let expected = LocalCertConfig::subject_for(name);
        let mut previous: Option<CertificateHandle> = None;
        let mut removed = 0usize;

        while let Some(stored) = self.store.find_by_name(name)? {
            if previous.as_ref() == Some(&stored.handle) {
                return Err(RemovalError::Store(StoreError::Storage(format!(
                    "{} is still present after deletion",
                    stored.handle
                ))));
            }

            check_self_issued(&stored, name, &expected)?;
            self.store.delete_by_handle(&stored.handle)?;
            removed += 1;
            previous = Some(stored.handle);
        }

        debug!("Removed {} certificates for '{}'", removed, name);
        Ok(())
    }
}

fn check_self_issued(
    stored: &StoredCertificate,
    name: &str,
    expected: &str,
) -> std::result::Result<(), RemovalError> {
    let unexpected = |reason: String| {
        warn!(
            "Refusing to remove {} under '{}': {}",
            stored.handle, name, reason
        );
        RemovalError::UnexpectedCertificate {
            name: name.to_string(),
            reason,
        }
    };

    let cert = Certificate::from_der(stored.der.clone()).map_err(|e| unexpected(e.to_string()))?;
    if !cert.is_self_signed() {
        return Err(unexpected("certificate is not self-signed".to_string()));
    }
    if cert.subject() != expected {
        return Err(unexpected(format!(
            "subject '{}' does not match '{}'",
            cert.subject(),
            expected
        )));
    }
    if cert.issuer() != expected {
        return Err(unexpected(format!(
            "issuer '{}' does not match '{}'",
            cert.issuer(),
            expected
        )));
    }
    Ok(())
}
