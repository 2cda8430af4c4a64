//! OAuth token refresh

use chrono::{DateTime, Utc};
use quotabar_core::error::ProviderError;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Token endpoint
pub const TOKEN_URL: &str = "https://console.anthropic.com/v1/oauth/token";

/// Public client id of Claude Code
pub const CLIENT_ID: &str = "9d1c250a-e61b-44d9-88ed-5944d1962f5e";

#[derive(Serialize)]
struct RefreshRequest<'a> {
    grant_type: &'static str,
    refresh_token: &'a str,
    client_id: &'static str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Refreshed token set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshedTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Milliseconds since the epoch
    pub expires_at: Option<i64>,
}

/// Exchange a refresh token for a new access token
///
/// Any failure maps to `AuthenticationRequired`: a refresh that cannot complete
/// means the user has to log in again.
pub async fn refresh_access_token(
    client: &reqwest::Client,
    token_url: &str,
    refresh_token: &str,
    now: DateTime<Utc>,
) -> Result<RefreshedTokens, ProviderError> {
    let body = RefreshRequest {
        grant_type: "refresh_token",
        refresh_token,
        client_id: CLIENT_ID,
    };

    let response = client.post(token_url).json(&body).send().await.map_err(|e| {
        warn!("Claude token refresh request failed: {}", e);
        ProviderError::AuthenticationRequired
    })?;

    let status = response.status();
    if !status.is_success() {
        warn!("Claude token refresh rejected with {}", status);
        return Err(ProviderError::AuthenticationRequired);
    }

    let token: TokenResponse = response.json().await.map_err(|e| {
        warn!("Claude token refresh returned an unreadable body: {}", e);
        ProviderError::AuthenticationRequired
    })?;

    debug!("Claude access token refreshed");
    Ok(RefreshedTokens {
        access_token: token.access_token,
        refresh_token: token.refresh_token,
        expires_at: token
            .expires_in
            .filter(|secs| *secs > 0)
            .map(|secs| now.timestamp_millis() + secs * 1000),
    })
}
