//! Claude usage limits
//!
//! Token lifecycle: `Valid → Expired → Refreshing → Valid | Invalid`.
//! An expired token is refreshed before the request; a 401 triggers one
//! refresh and exactly one retry. A failed refresh leaves the token `Invalid`
//! and later fetches short-circuit until the credential file changes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quotabar_core::config::ConfigField;
use quotabar_core::error::ProviderError;
use quotabar_core::format;
use quotabar_core::http;
use quotabar_core::provider::{FetchResult, ProviderIdentity, UsageProvider};
use quotabar_core::types::{InstanceId, UsageQuota, UsageSnapshot};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, info, warn};

use crate::credentials::{self, CredentialsFile};
use crate::oauth;

/// Usage endpoint
pub const USAGE_URL: &str = "https://api.anthropic.com/api/oauth/usage";

const BETA_HEADER: &str = "anthropic-beta";
const BETA_VALUE: &str = "oauth-2025-04-20";

/// Claude reads everything from the local credential file
pub const CONFIG_FIELDS: &[ConfigField] = &[];

/// Lifecycle of the access token held by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    Valid,
    Expired,
    Refreshing,
    Invalid,
}

struct TokenTracker {
    state: TokenState,
    /// Access token that failed to refresh; retried only once the file changes
    rejected: Option<String>,
}

/// Provider for Claude subscription usage windows.
pub struct ClaudeProvider {
    identity: ProviderIdentity,
    credentials_path: Option<PathBuf>,
    usage_url: String,
    token_url: String,
    client: reqwest::Client,
    tracker: Mutex<TokenTracker>,
}

impl ClaudeProvider {
    pub fn new(identity: ProviderIdentity) -> Self {
        Self {
            identity,
            credentials_path: credentials::default_credentials_path(),
            usage_url: USAGE_URL.to_string(),
            token_url: oauth::TOKEN_URL.to_string(),
            client: http::build_client(),
            tracker: Mutex::new(TokenTracker {
                state: TokenState::Valid,
                rejected: None,
            }),
        }
    }

    pub fn with_credentials_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.credentials_path = Some(path.into());
        self
    }

    pub fn with_endpoints(mut self, usage_url: impl Into<String>, token_url: impl Into<String>) -> Self {
        self.usage_url = usage_url.into();
        self.token_url = token_url.into();
        self
    }

    /// Current token state
    pub fn token_state(&self) -> TokenState {
        self.tracker
            .lock()
            .map(|t| t.state)
            .unwrap_or(TokenState::Invalid)
    }

    fn set_state(&self, state: TokenState) {
        if let Ok(mut tracker) = self.tracker.lock() {
            tracker.state = state;
        }
    }

    fn reject(&self, access_token: &str) {
        if let Ok(mut tracker) = self.tracker.lock() {
            tracker.state = TokenState::Invalid;
            tracker.rejected = Some(access_token.to_string());
        }
    }

    fn is_rejected(&self, access_token: &str) -> bool {
        self.tracker
            .lock()
            .map(|t| t.rejected.as_deref() == Some(access_token))
            .unwrap_or(false)
    }

    fn path(&self) -> Result<&PathBuf, ProviderError> {
        self.credentials_path
            .as_ref()
            .ok_or(ProviderError::NotAvailable)
    }

    /// Refresh the token in `file`, persisting the result
    async fn refresh(&self, file: &mut CredentialsFile) -> Result<String, ProviderError> {
        let Some(oauth_creds) = file.oauth.as_mut() else {
            return Err(ProviderError::AuthenticationRequired);
        };
        let Some(refresh_token) = oauth_creds.refresh_token.clone() else {
            self.reject(&oauth_creds.access_token);
            return Err(ProviderError::AuthenticationRequired);
        };

        self.set_state(TokenState::Refreshing);
        let refreshed = match oauth::refresh_access_token(
            &self.client,
            &self.token_url,
            &refresh_token,
            Utc::now(),
        )
        .await
        {
            Ok(tokens) => tokens,
            Err(e) => {
                self.reject(&oauth_creds.access_token);
                return Err(e);
            }
        };

        oauth_creds.access_token = refreshed.access_token.clone();
        if refreshed.refresh_token.is_some() {
            oauth_creds.refresh_token = refreshed.refresh_token;
        }
        oauth_creds.expires_at = refreshed.expires_at;

        let path = self.path()?;
        if let Err(e) = credentials::save(path, file) {
            warn!("Failed to persist refreshed Claude credentials: {}", e);
        }
        self.set_state(TokenState::Valid);
        info!("Refreshed Claude OAuth token for {}", self.identity.id);
        Ok(refreshed.access_token)
    }

    async fn request_usage(&self, access_token: &str) -> Result<UsageResponse, ProviderError> {
        let request = self
            .client
            .get(&self.usage_url)
            .bearer_auth(access_token)
            .header(BETA_HEADER, BETA_VALUE);
        http::send_json(request).await
    }
}

#[async_trait]
impl UsageProvider for ClaudeProvider {
    fn identity(&self) -> &ProviderIdentity {
        &self.identity
    }

    fn is_available(&self) -> bool {
        self.credentials_path.as_ref().is_some_and(|p| p.exists())
    }

    async fn fetch_usage(&self) -> FetchResult {
        let path = self.path()?.clone();
        let mut file = credentials::load(&path)?;
        let Some(oauth_creds) = file.oauth.as_ref() else {
            return Err(ProviderError::AuthenticationRequired);
        };
        let tier = oauth_creds.subscription_type.clone();

        if self.is_rejected(&oauth_creds.access_token) {
            debug!("Claude token was rejected earlier; waiting for a new login");
            return Err(ProviderError::AuthenticationRequired);
        }

        let mut access_token = oauth_creds.access_token.clone();
        if oauth_creds.is_expired(Utc::now()) {
            self.set_state(TokenState::Expired);
            debug!("Claude token expired, refreshing before request");
            access_token = self.refresh(&mut file).await?;
        }

        let response = match self.request_usage(&access_token).await {
            Err(ProviderError::AuthenticationRequired) => {
                debug!("Claude usage returned 401, refreshing once");
                self.set_state(TokenState::Expired);
                let refreshed = self.refresh(&mut file).await?;
                match self.request_usage(&refreshed).await {
                    Err(ProviderError::AuthenticationRequired) => {
                        self.reject(&refreshed);
                        return Err(ProviderError::SessionExpired);
                    }
                    other => other?,
                }
            }
            other => other?,
        };

        self.set_state(TokenState::Valid);
        map_usage(&self.identity.id, &response, tier)
    }
}

// ---------------------------------------------------------------------------
// Response schema
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct UsageResponse {
    five_hour: Option<UsageWindow>,
    seven_day: Option<UsageWindow>,
    seven_day_opus: Option<UsageWindow>,
    extra_usage: Option<ExtraUsage>,
}

#[derive(Debug, Deserialize)]
struct UsageWindow {
    utilization: f64,
    resets_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExtraUsage {
    #[serde(default)]
    is_enabled: bool,
    /// Cents
    monthly_limit: Option<f64>,
    /// Cents
    used_credits: Option<f64>,
    utilization: Option<f64>,
}

// ---------------------------------------------------------------------------
// Mapping
// ---------------------------------------------------------------------------

fn parse_reset(raw: Option<&str>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn window_quota(window: &UsageWindow, label: &str) -> UsageQuota {
    UsageQuota::new(window.utilization, label)
        .with_optional_resets_at(parse_reset(window.resets_at.as_deref()))
}

fn map_usage(id: &InstanceId, response: &UsageResponse, tier: Option<String>) -> FetchResult {
    let mut quotas = Vec::new();
    if let Some(w) = &response.five_hour {
        quotas.push(window_quota(w, "5h Window"));
    }
    if let Some(w) = &response.seven_day {
        quotas.push(window_quota(w, "Weekly"));
    }
    if let Some(w) = &response.seven_day_opus {
        quotas.push(window_quota(w, "Weekly Opus"));
    }
    if let Some(extra) = response.extra_usage.as_ref().filter(|e| e.is_enabled) {
        let used = extra.used_credits.unwrap_or(0.0) / 100.0;
        let mut quota = match (extra.utilization, extra.monthly_limit) {
            (Some(pct), _) => UsageQuota::new(pct, "On-Demand"),
            (None, Some(limit)) if limit > 0.0 => {
                UsageQuota::new(used / (limit / 100.0) * 100.0, "On-Demand")
            }
            _ => UsageQuota::informational("On-Demand").with_menu_bar_override(format::usd(used)),
        };
        quota.detail_text = Some(match extra.monthly_limit {
            Some(limit) => format!("{} / {}", format::usd(used), format::usd(limit / 100.0)),
            None => format!("{} used", format::usd(used)),
        });
        quotas.push(quota);
    }
    Ok(UsageSnapshot::new(id, quotas)?.with_account_tier(tier))
}
