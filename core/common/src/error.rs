//! Common error types for Strata.
//!
//! Every failure the engine surfaces belongs to this closed taxonomy. Adapters map
//! their backend-specific failures into it at the adapter boundary, so nothing above
//! the adapter layer ever sees a raw HTTP or filesystem error type.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Top-level error type for Strata operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A provider with this name is already registered.
    #[error("Provider '{0}' is already registered")]
    DuplicateProvider(String),

    /// No provider with this name is registered.
    #[error("Provider '{0}' is not registered")]
    UnknownProvider(String),

    /// No registered provider can accept the request.
    #[error("No provider available for {size_bytes} bytes")]
    NoProviderAvailable {
        /// Size of the rejected request.
        size_bytes: u64,
    },

    /// Migration found no destination other than the source.
    #[error("No alternative provider to migrate '{object_key}' away from '{source_provider}'")]
    NoAlternativeProvider {
        /// Object being migrated.
        object_key: String,
        /// Provider currently holding the object.
        source_provider: String,
    },

    /// Credential refresh failed; the provider has been marked unavailable.
    #[error("Credential refresh failed for '{provider}': {reason}")]
    CredentialRefresh {
        /// Provider whose credentials could not be refreshed.
        provider: String,
        /// Underlying reason.
        reason: String,
    },

    /// The provider does not support the requested operation.
    #[error("Provider '{provider}' does not support {operation}")]
    UnsupportedOperation {
        /// Provider name.
        provider: String,
        /// Operation name.
        operation: String,
    },

    /// The object exceeds the provider's maximum file size.
    #[error("{size_bytes} bytes exceeds the {limit_bytes} byte limit of '{provider}'")]
    SizeLimitExceeded {
        /// Provider name.
        provider: String,
        /// Requested size.
        size_bytes: u64,
        /// Provider limit.
        limit_bytes: u64,
    },

    /// The provider is at its concurrent transfer limit.
    #[error("Provider '{0}' is at its concurrent transfer limit")]
    ProviderBusy(String),

    /// A transfer reached the adapter and failed there.
    #[error("Transfer against '{provider}' failed ({kind}): {message}")]
    Transfer {
        /// Provider name.
        provider: String,
        /// Classified failure.
        kind: ErrorKind,
        /// Adapter message.
        message: String,
    },

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Network request failed.
    #[error("Network error: {0}")]
    Network(String),

    /// Authentication against a backend failed.
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Backend rejected or failed the operation.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Copied data did not match the source.
    #[error("Verification failed: {0}")]
    Verification(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Classify this error for outcomes and events.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::DuplicateProvider(_) => ErrorKind::DuplicateProvider,
            Error::UnknownProvider(_) => ErrorKind::UnknownProvider,
            Error::NoProviderAvailable { .. } => ErrorKind::NoProviderAvailable,
            Error::NoAlternativeProvider { .. } => ErrorKind::NoAlternativeProvider,
            Error::CredentialRefresh { .. } => ErrorKind::CredentialRefresh,
            Error::UnsupportedOperation { .. } => ErrorKind::UnsupportedOperation,
            Error::SizeLimitExceeded { .. } => ErrorKind::SizeLimitExceeded,
            Error::ProviderBusy(_) => ErrorKind::ProviderBusy,
            Error::Transfer { kind, .. } => *kind,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Network(_) => ErrorKind::Network,
            Error::Authentication(_) => ErrorKind::Authentication,
            Error::Storage(_) => ErrorKind::Storage,
            Error::Verification(_) => ErrorKind::VerificationFailed,
            Error::Io(err) if err.kind() == std::io::ErrorKind::NotFound => ErrorKind::NotFound,
            Error::Io(_) => ErrorKind::Io,
            Error::Serialization(_) => ErrorKind::Serialization,
            Error::InvalidInput(_) => ErrorKind::InvalidInput,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Serializable classification of a failure.
///
/// Carried by transfer outcomes and migration events in place of the error
/// itself, which is neither `Clone` nor serializable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    DuplicateProvider,
    UnknownProvider,
    NoProviderAvailable,
    NoAlternativeProvider,
    CredentialRefresh,
    UnsupportedOperation,
    SizeLimitExceeded,
    ProviderBusy,
    /// Deleting the source after a successful migration failed. Reported, not fatal.
    SourceCleanupFailed,
    NotFound,
    Network,
    Authentication,
    Storage,
    VerificationFailed,
    Io,
    Serialization,
    InvalidInput,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::DuplicateProvider => "DuplicateProvider",
            ErrorKind::UnknownProvider => "UnknownProvider",
            ErrorKind::NoProviderAvailable => "NoProviderAvailable",
            ErrorKind::NoAlternativeProvider => "NoAlternativeProvider",
            ErrorKind::CredentialRefresh => "CredentialRefresh",
            ErrorKind::UnsupportedOperation => "UnsupportedOperation",
            ErrorKind::SizeLimitExceeded => "SizeLimitExceeded",
            ErrorKind::ProviderBusy => "ProviderBusy",
            ErrorKind::SourceCleanupFailed => "SourceCleanupFailed",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::Network => "Network",
            ErrorKind::Authentication => "Authentication",
            ErrorKind::Storage => "Storage",
            ErrorKind::VerificationFailed => "VerificationFailed",
            ErrorKind::Io => "Io",
            ErrorKind::Serialization => "Serialization",
            ErrorKind::InvalidInput => "InvalidInput",
        };
        f.write_str(name)
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
