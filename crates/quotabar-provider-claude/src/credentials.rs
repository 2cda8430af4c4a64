//! Claude Code credential file
//!
//! `~/.claude/.credentials.json` (or `$CLAUDE_CONFIG_DIR/.credentials.json`)
//! holds a `claudeAiOauth` object. Fields this crate does not understand are
//! carried through untouched when refreshed tokens are written back.

use chrono::{DateTime, Utc};
use quotabar_core::error::ProviderError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Tokens are treated as expired this long before their stated expiry
pub const EXPIRY_SKEW_MS: i64 = 60_000;

/// Whole credentials file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsFile {
    #[serde(rename = "claudeAiOauth", default, skip_serializing_if = "Option::is_none")]
    pub oauth: Option<OAuthCredentials>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

/// The `claudeAiOauth` object
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthCredentials {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Expiry in milliseconds since the epoch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_type: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl OAuthCredentials {
    /// Whether the access token has passed (or is about to pass) its expiry
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at
            .is_some_and(|exp| exp - EXPIRY_SKEW_MS <= now.timestamp_millis())
    }
}

/// Default credential file location
pub fn default_credentials_path() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var("CLAUDE_CONFIG_DIR") {
        return Some(PathBuf::from(dir).join(".credentials.json"));
    }
    dirs::home_dir().map(|h| h.join(".claude").join(".credentials.json"))
}

/// Read and parse the credential file
pub fn load(path: &Path) -> Result<CredentialsFile, ProviderError> {
    if !path.exists() {
        debug!("Claude credentials not found: {}", path.display());
        return Err(ProviderError::NotAvailable);
    }
    let content = std::fs::read_to_string(path)
        .map_err(|e| ProviderError::ExecutionFailed(format!("{}: {e}", path.display())))?;
    serde_json::from_str(content.trim())
        .map_err(|e| ProviderError::ParseFailed(format!("credentials file: {e}")))
}

/// Write the credential file back, keeping owner-only permissions
pub fn save(path: &Path, file: &CredentialsFile) -> Result<(), ProviderError> {
    let json = serde_json::to_string_pretty(file)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)
        .and_then(|_| {
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))?;
            }
            std::fs::rename(&tmp, path)
        })
        .map_err(|e| ProviderError::ExecutionFailed(format!("{}: {e}", path.display())))
}
