//! Bearer key resolution through the secret store

use quotabar_core::config::{ConfigField, ProviderInstanceConfig};
use quotabar_core::error::ProviderError;
use quotabar_core::secrets::SecretStore;

/// Config key holding the secret store reference of the API key
pub const API_KEY_FIELD: &str = "keychainKey";

/// Field descriptor of the API key reference
pub const API_KEY: ConfigField =
    ConfigField::secret(API_KEY_FIELD, "API key").with_placeholder("sk-...");

/// Secret store key for an instance's API key
pub fn key_reference(config: &ProviderInstanceConfig) -> String {
    config.secret_reference(API_KEY_FIELD)
}

/// Load the bearer key, failing with `AuthenticationRequired` when absent
pub fn resolve_bearer(secrets: &dyn SecretStore, key_ref: &str) -> Result<String, ProviderError> {
    secrets
        .load(key_ref)
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .ok_or(ProviderError::AuthenticationRequired)
}
