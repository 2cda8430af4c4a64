//! Error types for quotabar
//!
//! Two error families live here. [`ProviderError`] is the closed taxonomy every
//! provider adapter resolves a failed fetch to; it is stored per instance by the
//! manager, so it is cheap to clone and compare. [`QuotabarError`] covers
//! everything else (configuration, persistence, registry lookups).
//!
//! # Example
//!
//! ```
//! use quotabar_core::error::{QuotabarError, Result};
//!
//! fn example_function() -> Result<()> {
//!     // This will automatically convert io::Error to QuotabarError
//!     let _file = std::fs::read_to_string("nonexistent.txt")?;
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;
use thiserror::Error;

/// Failure of a single provider fetch.
///
/// The set is closed: adapters map every failure onto one of these kinds
/// instead of inventing ad hoc messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The tool or its local data is not present on this machine
    #[error("Provider not available")]
    NotAvailable,

    /// No usable credential exists (first-time setup)
    #[error("Authentication required")]
    AuthenticationRequired,

    /// A credential existed but was rejected (re-authentication needed)
    #[error("Session expired")]
    SessionExpired,

    /// The response or local data could not be interpreted
    #[error("Failed to parse response: {0}")]
    ParseFailed(String),

    /// Transport failure or unexpected HTTP status
    #[error("Network error: {0}")]
    NetworkError(String),

    /// A subprocess or local database access failed
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
}

impl ProviderError {
    /// Short machine-friendly kind name, used in JSON output and logs
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::NotAvailable => "notAvailable",
            ProviderError::AuthenticationRequired => "authenticationRequired",
            ProviderError::SessionExpired => "sessionExpired",
            ProviderError::ParseFailed(_) => "parseFailed",
            ProviderError::NetworkError(_) => "networkError",
            ProviderError::ExecutionFailed(_) => "executionFailed",
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::NetworkError(format!("request timed out: {err}"))
        } else if err.is_decode() {
            ProviderError::ParseFailed(err.to_string())
        } else {
            ProviderError::NetworkError(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        ProviderError::ParseFailed(err.to_string())
    }
}

/// Main error type for quotabar operations outside of provider fetches
#[derive(Error, Debug)]
pub enum QuotabarError {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// Parse error with file context
    #[error("Parse error in {file}: {error}")]
    Parse {
        /// The file that caused the error
        file: PathBuf,
        /// The error message
        error: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// No registry entry for a provider type
    #[error("Unknown provider type: {0}")]
    UnknownProviderType(String),

    /// A second instance of a single-instance provider type was requested
    #[error("Provider type {0} supports only one instance")]
    DuplicateInstance(String),

    /// No configured instance with the given id
    #[error("Instance not found: {0}")]
    InstanceNotFound(String),

    /// Secret store failure
    #[error("Secret store error: {0}")]
    Secret(String),

    /// Invalid argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The manager service task has exited
    #[error("Manager service is not running")]
    ServiceStopped,
}

/// Convenience type alias for Results in quotabar
pub type Result<T> = std::result::Result<T, QuotabarError>;
