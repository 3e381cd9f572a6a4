//! Certificate lifecycle orchestration
//!
//! [`CertificateLifecycleManager`] is the synchronous core behind the async
//! service. Get-or-create runs a small state machine:
//!
//! ```text
//! Lookup   -> not found: Generate ; found: Validate
//! Validate -> valid: Done(cert)   ; invalid: Generate
//! Generate -> success: Done(cert) ; failure: Failed(error)
//! ```
//!
//! Generation is attempted at most once per call. Nothing is cached between
//! calls; every operation starts from what the store holds.

use crate::certificate::Certificate;
use crate::config::LocalCertConfig;
use crate::error::{Error, Result};
use crate::gateway::KeyStoreGateway;
use crate::generator::CertificateGenerator;
use crate::validator::CertificateValidator;
use tracing::{debug, info};

/// Position in the get-or-create state machine
#[derive(Debug)]
enum State {
    Lookup,
    Validate(Certificate),
    Generate,
}

/// Orchestrates get-or-create and removal for identity names
#[derive(Debug, Clone)]
pub struct CertificateLifecycleManager {
    gateway: KeyStoreGateway,
    validator: CertificateValidator,
    generator: CertificateGenerator,
}

impl CertificateLifecycleManager {
    /// Create a manager over `gateway` using the policy in `config`
    pub fn new(gateway: KeyStoreGateway, config: LocalCertConfig) -> Self {
        Self {
            validator: CertificateValidator::from_config(&config),
            generator: CertificateGenerator::new(gateway.clone(), config),
            gateway,
        }
    }

    /// Gateway to the store this manager works on, for unlocking it up front
    pub fn gateway(&self) -> &KeyStoreGateway {
        &self.gateway
    }

    /// Return a valid certificate for `name`, generating one if needed
    ///
    /// A lookup error is treated like an empty store and falls through to
    /// generation, which surfaces any persistent store failure itself.
    pub fn get_or_create(&self, name: &str) -> Result<Certificate> {
        if name.is_empty() {
            return Err(Error::InvalidArgument("identity name is empty".to_string()));
        }

        let mut state = State::Lookup;
        loop {
            state = match state {
                State::Lookup => match self.gateway.find_by_name(name) {
                    Ok(Some(cert)) => {
                        debug!("Found certificate for '{}', validating", name);
                        State::Validate(cert)
                    }
                    Ok(None) => {
                        debug!("No certificate for '{}', generating", name);
                        State::Generate
                    }
                    Err(e) => {
                        debug!("Lookup for '{}' failed ({}), generating", name, e);
                        State::Generate
                    }
                },
                State::Validate(cert) => match self.validator.validate(&cert, name) {
                    Ok(()) => {
                        debug!("Reusing certificate for '{}' (serial {})", name, cert.serial());
                        return Ok(cert);
                    }
                    Err(reason) => {
                        info!("Regenerating certificate for '{}': {}", name, reason);
                        State::Generate
                    }
                },
                State::Generate => {
                    return self.generator.generate(name).map_err(Error::from);
                }
            };
        }
    }

    /// Remove every certificate and key stored under `name`
    ///
    /// Succeeds when nothing was stored.
    pub fn remove(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::InvalidArgument("identity name is empty".to_string()));
        }

        debug!("Removing certificates for '{}'", name);
        self.gateway.remove_all_for_name(name)?;
        Ok(())
    }

    /// Whether the store would need the interactive prompt
    ///
    /// Initializes an unprovisioned store but never prompts.
    pub fn is_login_required(&self) -> Result<bool> {
        self.gateway.is_login_required()
    }
}
