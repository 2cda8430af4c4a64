//! Core types, traits, and utilities for quotabar
//!
//! This crate provides the canonical usage model, the provider error taxonomy,
//! the `UsageProvider` adapter trait, per-instance configuration values, and
//! the secret store and detection boundaries shared by every provider crate.

pub mod config;
pub mod detection;
pub mod error;
pub mod format;
pub mod http;
pub mod jwt;
pub mod presence;
pub mod provider;
pub mod secrets;
pub mod timezone;
pub mod types;

#[cfg(test)]
pub mod test_utils;

// Re-export commonly used types
pub use config::{ConfigField, ConfigFieldKind, ConfigValue, ProviderInstanceConfig};
pub use error::{ProviderError, QuotabarError, Result};
pub use provider::{FetchResult, ProviderIdentity, UsageProvider};
pub use secrets::SecretStore;
pub use types::{InstanceId, StatusColor, UsageQuota, UsageSnapshot};
