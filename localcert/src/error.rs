//! Error handling for localcert
//!
//! This module provides the crate-level error type delivered to callers of
//! [`LocalCertService`](crate::LocalCertService). Component errors
//! ([`StoreError`], [`GenerationError`], [`RemovalError`]) convert into it.

use crate::gateway::RemovalError;
use crate::generator::GenerationError;
use crate::store::StoreError;
use thiserror::Error;

/// Type alias for Results with localcert errors
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for localcert
#[derive(Error, Debug)]
pub enum Error {
    /// Empty identity name or missing result callback
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The key store could not be unlocked
    #[error("Authentication denied: {0}")]
    AuthDenied(String),

    /// The key store could not be reached
    #[error("Key store unavailable: {0}")]
    StoreUnavailable(String),

    /// A certificate stored under the name was not issued by this manager
    #[error("Unexpected certificate stored under '{name}': {reason}")]
    UnexpectedCertificate {
        /// Identity name the certificate was found under
        name: String,
        /// Which self-issued check failed
        reason: String,
    },

    /// Certificate generation failed
    #[error("Certificate generation failed: {0}")]
    Generation(GenerationError),

    /// Other key store errors
    #[error("Key store error: {0}")]
    Store(StoreError),

    /// The background task did not deliver a result
    #[error("Background task failed: {0}")]
    TaskFailed(String),
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => Error::StoreUnavailable(msg),
            other => Error::Store(other),
        }
    }
}

impl From<RemovalError> for Error {
    fn from(err: RemovalError) -> Self {
        match err {
            RemovalError::UnexpectedCertificate { name, reason } => {
                Error::UnexpectedCertificate { name, reason }
            }
            RemovalError::Store(e) => e.into(),
        }
    }
}

impl From<GenerationError> for Error {
    fn from(err: GenerationError) -> Self {
        match err {
            GenerationError::StoreUnavailable(e) => Error::StoreUnavailable(e.to_string()),
            GenerationError::RemoveExisting(removal) => removal.into(),
            other => Error::Generation(other),
        }
    }
}
