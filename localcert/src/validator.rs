//! Self-issued identity certificate validation
//!
//! [`CertificateValidator`] decides whether a certificate fetched from the
//! store is still an acceptable identity for a name. It is a pure predicate;
//! a failed validation only ever leads the lifecycle to regenerate.

use crate::certificate::Certificate;
use crate::config::LocalCertConfig;
use chrono::{DateTime, Duration, Utc};

/// Reason a certificate is not a valid managed identity
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// The signature does not verify against the certificate's own key
    #[error("certificate is not self-signed")]
    NotSelfSigned,

    #[error("subject '{subject}' differs from issuer '{issuer}'")]
    SubjectIssuerMismatch { subject: String, issuer: String },

    #[error("subject '{actual}' does not match expected '{expected}'")]
    NameMismatch { expected: String, actual: String },

    /// `now` lies outside `[not_before, not_after - grace]`
    #[error("certificate valid from {not_before} to {not_after} is not usable at {now}")]
    ExpiredOrNotYetValid {
        not_before: DateTime<Utc>,
        not_after: DateTime<Utc>,
        now: DateTime<Utc>,
    },
}

/// Checks certificates against the managed-identity predicate
#[derive(Debug, Clone)]
pub struct CertificateValidator {
    grace: Duration,
}

impl CertificateValidator {
    /// Create a validator with an explicit expiry grace window
    pub fn new(grace: Duration) -> Self {
        Self { grace }
    }

    /// Create a validator using the grace window from `config`
    pub fn from_config(config: &LocalCertConfig) -> Self {
        Self::new(config.expiry_grace())
    }

    /// Time before not-after from which a certificate counts as expired
    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Validate `cert` as the identity for `name` at the current time
    pub fn validate(&self, cert: &Certificate, name: &str) -> Result<(), ValidationError> {
        self.validate_at(cert, name, Utc::now())
    }

    /// Validate `cert` as the identity for `name` at time `now`
    ///
    /// Checks run in order and stop at the first failure: self-signature,
    /// subject equals issuer, subject equals `CN=<name>`, validity window.
    pub fn validate_at(
        &self,
        cert: &Certificate,
        name: &str,
        now: DateTime<Utc>,
    ) -> Result<(), ValidationError> {
        if !cert.is_self_signed() {
            return Err(ValidationError::NotSelfSigned);
        }

        if cert.subject() != cert.issuer() {
            return Err(ValidationError::SubjectIssuerMismatch {
                subject: cert.subject().to_string(),
                issuer: cert.issuer().to_string(),
            });
        }

        let expected = LocalCertConfig::subject_for(name);
        if cert.subject() != expected {
            return Err(ValidationError::NameMismatch {
                expected,
                actual: cert.subject().to_string(),
            });
        }

        // A grace window beyond the representable range leaves nothing usable.
        let usable = match cert.not_after().checked_sub_signed(self.grace) {
            Some(last) => now >= cert.not_before() && now <= last,
            None => false,
        };
        if !usable {
            return Err(ValidationError::ExpiredOrNotYetValid {
                not_before: cert.not_before(),
                not_after: cert.not_after(),
                now,
            });
        }

        Ok(())
    }
}

impl Default for CertificateValidator {
    fn default() -> Self {
        Self::from_config(&LocalCertConfig::default())
    }
}
