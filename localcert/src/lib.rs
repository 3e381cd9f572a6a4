//! Self-signed local certificate lifecycle
//!
//! This crate keeps a valid self-signed identity certificate available for a
//! symbolic name. Asking for the certificate of a name returns the stored one
//! while it is still acceptable and generates a fresh P-256 key pair and
//! certificate inside the key store when it is missing, expired or not one
//! this crate issued. Removal deletes every certificate and key stored under
//! the name.
//!
//! Private keys never leave the [`KeyStore`]; certificates are signed through
//! it. [`LocalCertService`] is the entry point.

/// Parsed X.509 certificates
pub mod certificate;

/// Generation and validation policy
pub mod config;

/// Error types
pub mod error;

/// Unlock, lookup and removal over the key store
pub mod gateway;

/// Fresh certificate generation
pub mod generator;

/// Get-or-create state machine
pub mod manager;

/// Background execution with single-shot delivery
pub mod runner;

/// Caller-facing service
pub mod service;

/// Key store trait and software backends
pub mod store;

/// Managed certificate validation
pub mod validator;

// Re-export key types for convenience
pub use certificate::Certificate;
pub use config::LocalCertConfig;
pub use error::{Error, Result};
pub use gateway::KeyStoreGateway;
pub use generator::{CertificateGenerator, GenerationError};
pub use manager::CertificateLifecycleManager;
pub use runner::{AsyncTaskRunner, TaskHandle};
pub use service::{CertificateCallback, LocalCertService, RemoveCallback};
pub use store::{FileKeyStore, KeyStore, LoginPrompt, MemoryKeyStore, NoPrompt, StaticPrompt};
pub use validator::{CertificateValidator, ValidationError};

/// Version of localcert
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
