//! Configuration for the certificate lifecycle

use crate::error::{Error, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Default number of days a generated certificate is valid for
pub const DEFAULT_VALIDITY_DAYS: i64 = 365;
/// Default number of days the not-before bound is backdated
pub const DEFAULT_BACKDATE_DAYS: i64 = 1;
/// Default number of days before not-after at which a certificate is renewed
pub const DEFAULT_EXPIRY_GRACE_DAYS: i64 = 1;
/// Default serial number length in bytes
pub const DEFAULT_SERIAL_LENGTH: usize = 8;
/// Longest serial number RFC 5280 allows
pub const MAX_SERIAL_LENGTH: usize = 20;
/// Upper bound for any of the day counts, about one hundred years
pub const MAX_PERIOD_DAYS: i64 = 36_500;
/// Prefix joining the identity name into a distinguished name
pub const COMMON_NAME_PREFIX: &str = "CN=";

/// Configuration options for certificate generation and validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalCertConfig {
    /// Days from now until not-after
    pub validity_days: i64,

    /// Days before now for not-before
    pub backdate_days: i64,

    /// Days subtracted from not-after when judging a certificate usable
    pub expiry_grace_days: i64,

    /// Random serial number length in bytes
    pub serial_length: usize,
}

impl LocalCertConfig {
    /// Creates a configuration with the default validity policy
    pub fn new() -> Self {
        Self {
            validity_days: DEFAULT_VALIDITY_DAYS,
            backdate_days: DEFAULT_BACKDATE_DAYS,
            expiry_grace_days: DEFAULT_EXPIRY_GRACE_DAYS,
            serial_length: DEFAULT_SERIAL_LENGTH,
        }
    }

    /// Sets the validity period
    pub fn with_validity_days(mut self, days: i64) -> Self {
        self.validity_days = days;
        self
    }

    /// Sets the not-before backdate
    pub fn with_backdate_days(mut self, days: i64) -> Self {
        self.backdate_days = days;
        self
    }

    /// Sets the expiry grace window
    pub fn with_expiry_grace_days(mut self, days: i64) -> Self {
        self.expiry_grace_days = days;
        self
    }

    /// Sets the serial number length
    pub fn with_serial_length(mut self, len: usize) -> Self {
        self.serial_length = len;
        self
    }

    /// Validity period; saturates for day counts chrono cannot represent
    pub fn validity(&self) -> Duration {
        saturating_days(self.validity_days)
    }

    pub fn backdate(&self) -> Duration {
        saturating_days(self.backdate_days)
    }

    pub fn expiry_grace(&self) -> Duration {
        saturating_days(self.expiry_grace_days)
    }

    /// Distinguished name a managed certificate for `name` carries as both
    /// subject and issuer
    pub fn subject_for(name: &str) -> String {
        format!("{}{}", COMMON_NAME_PREFIX, name)
    }
}

fn saturating_days(days: i64) -> Duration {
    Duration::try_days(days).unwrap_or(if days < 0 { Duration::MIN } else { Duration::MAX })
}

impl Default for LocalCertConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Validates a configuration before it is handed to a service
pub fn validate(config: &LocalCertConfig) -> Result<()> {
    if config.validity_days <= 0 {
        return Err(Error::InvalidArgument(
            "validity_days must be positive".to_string(),
        ));
    }
    if config.backdate_days < 0 || config.expiry_grace_days < 0 {
        return Err(Error::InvalidArgument(
            "backdate_days and expiry_grace_days must not be negative".to_string(),
        ));
    }
    if config.validity_days > MAX_PERIOD_DAYS
        || config.backdate_days > MAX_PERIOD_DAYS
        || config.expiry_grace_days > MAX_PERIOD_DAYS
    {
        return Err(Error::InvalidArgument(format!(
            "day counts must not exceed {}",
            MAX_PERIOD_DAYS
        )));
    }
    // A fresh certificate must pass its own validation.
    if config.expiry_grace_days >= config.validity_days {
        return Err(Error::InvalidArgument(format!(
            "expiry grace of {} days leaves no usable window in {} days of validity",
            config.expiry_grace_days, config.validity_days
        )));
    }
    if config.serial_length == 0 || config.serial_length > MAX_SERIAL_LENGTH {
        return Err(Error::InvalidArgument(format!(
            "serial_length must be between 1 and {} bytes",
            MAX_SERIAL_LENGTH
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_default_policy() {
        let config = LocalCertConfig::default();
        assert_eq!(config.validity(), Duration::days(365));
        assert_eq!(config.backdate(), Duration::days(1));
        assert_eq!(config.expiry_grace(), Duration::days(1));
        assert_eq!(config.serial_length, 8);
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_subject_for() {
        assert_eq!(LocalCertConfig::subject_for("devtools"), "CN=devtools");
    }

    #[test]
    fn test_validate_rejects_unusable_window() {
        let config = LocalCertConfig::new()
            .with_validity_days(2)
            .with_expiry_grace_days(2);
        assert_matches!(validate(&config), Err(Error::InvalidArgument(_)));

        let config = LocalCertConfig::new().with_validity_days(0);
        assert_matches!(validate(&config), Err(Error::InvalidArgument(_)));
    }

    #[test]
    fn test_validate_rejects_huge_periods() {
        let config = LocalCertConfig::new().with_validity_days(i64::MAX);
        assert_matches!(validate(&config), Err(Error::InvalidArgument(_)));
        assert_eq!(config.validity(), Duration::MAX);

        let config = LocalCertConfig::new().with_backdate_days(MAX_PERIOD_DAYS + 1);
        assert_matches!(validate(&config), Err(Error::InvalidArgument(_)));

        let config = LocalCertConfig::new()
            .with_validity_days(MAX_PERIOD_DAYS + 1)
            .with_expiry_grace_days(MAX_PERIOD_DAYS);
        assert_matches!(validate(&config), Err(Error::InvalidArgument(_)));

        let config = LocalCertConfig::new().with_validity_days(MAX_PERIOD_DAYS);
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_validate_serial_length() {
        let config = LocalCertConfig::new().with_serial_length(0);
        assert_matches!(validate(&config), Err(Error::InvalidArgument(_)));

        let config = LocalCertConfig::new().with_serial_length(21);
        assert_matches!(validate(&config), Err(Error::InvalidArgument(_)));

        let config = LocalCertConfig::new().with_serial_length(20);
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_deserialize_partial() {
        let config: LocalCertConfig = serde_json::from_str(r#"{"validity_days": 30}"#).unwrap();
        assert_eq!(config.validity_days, 30);
        assert_eq!(config.expiry_grace_days, DEFAULT_EXPIRY_GRACE_DAYS);
    }
}
