use async_trait::async_trait;
use chrono::{DateTime, Months, Utc};
use quotabar_core::config::ConfigField;
use quotabar_core::error::ProviderError;
use quotabar_core::http;
use quotabar_core::jwt;
use quotabar_core::provider::{FetchResult, ProviderIdentity, UsageProvider};
use quotabar_core::types::{InstanceId, UsageQuota, UsageSnapshot};
use serde::Deserialize;
use tracing::debug;

use crate::state_db::{self, StateDb};

/// Usage endpoint
pub const USAGE_URL: &str = "https://cursor.com/api/usage";

/// Cookie carrying the session
pub const SESSION_COOKIE: &str = "WorkosCursorSessionToken";

/// Cursor has nothing to configure; the session comes from the editor
pub const CONFIG_FIELDS: &[ConfigField] = &[];

/// Provider for Cursor's monthly premium request allowance.
pub struct CursorProvider {
    identity: ProviderIdentity,
    db: Option<StateDb>,
    endpoint: String,
    client: reqwest::Client,
}

impl CursorProvider {
    pub fn new(identity: ProviderIdentity) -> Self {
        Self {
            identity,
            db: state_db::default_db_path().map(StateDb::new),
            endpoint: USAGE_URL.to_string(),
            client: http::build_client(),
        }
    }

    pub fn with_state_db(mut self, db: StateDb) -> Self {
        self.db = Some(db);
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl UsageProvider for CursorProvider {
    fn identity(&self) -> &ProviderIdentity {
        &self.identity
    }

    fn is_available(&self) -> bool {
        self.db.as_ref().is_some_and(StateDb::exists)
    }

    async fn fetch_usage(&self) -> FetchResult {
        let db = self.db.as_ref().ok_or(ProviderError::NotAvailable)?;
        let token = db.access_token().await?;
        let user_id = user_id_from_token(&token)?;

        let url = format!("{}?user={}", self.endpoint, user_id);
        let request = self
            .client
            .get(url)
            .header(reqwest::header::COOKIE, session_cookie(&user_id, &token));
        let usage: UsageResponse = http::send_json(request).await?;
        debug!("Cursor usage fetched for {}", self.identity.id);
        map_usage(&self.identity.id, &usage)
    }
}

/// User id from the `sub` claim, which looks like `auth0|user_01ABC`
pub fn user_id_from_token(token: &str) -> Result<String, ProviderError> {
    let sub = jwt::subject(token)?;
    let user_id = sub.rsplit('|').next().unwrap_or(&sub);
    if user_id.is_empty() {
        return Err(ProviderError::ParseFailed(format!(
            "unexpected subject format: {sub}"
        )));
    }
    Ok(user_id.to_string())
}

/// `WorkosCursorSessionToken=<user_id>%3A%3A<jwt>`
pub fn session_cookie(user_id: &str, token: &str) -> String {
    format!("{SESSION_COOKIE}={user_id}%3A%3A{token}")
}

// ---------------------------------------------------------------------------
// Response schema
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct UsageResponse {
    #[serde(rename = "gpt-4")]
    premium: Option<ModelUsage>,
    #[serde(rename = "startOfMonth")]
    start_of_month: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelUsage {
    #[serde(default)]
    num_requests: u64,
    max_request_usage: Option<u64>,
}

fn map_usage(id: &InstanceId, usage: &UsageResponse) -> FetchResult {
    let premium = usage
        .premium
        .as_ref()
        .ok_or_else(|| ProviderError::ParseFailed("missing gpt-4 usage".to_string()))?;

    let resets_at = usage
        .start_of_month
        .as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .and_then(|start| start.with_timezone(&Utc).checked_add_months(Months::new(1)));

    let quota = match premium.max_request_usage.filter(|max| *max > 0) {
        Some(max) => UsageQuota::new(
            premium.num_requests as f64 / max as f64 * 100.0,
            "Monthly",
        )
        .with_detail(format!("{} / {} requests", premium.num_requests, max)),
        None => UsageQuota::informational("Monthly")
            .with_menu_bar_override(format!("{} req", premium.num_requests))
            .with_detail(format!("{} requests, no limit", premium.num_requests)),
    }
    .with_optional_resets_at(resets_at);

    UsageSnapshot::new(id, vec![quota])
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use chrono::TimeZone;

    fn token_with(claims: &str) -> String {
        let engine = base64::engine::general_purpose::URL_SAFE_NO_PAD;
        format!(
            "{}.{}.sig",
            engine.encode(br#"{"alg":"HS256"}"#),
            engine.encode(claims)
        )
    }

    #[test]
    fn test_user_id_and_cookie() {
        let token = token_with(r#"{"sub": "auth0|user_01J8XYZ", "time": "1"}"#);
        let user = user_id_from_token(&token).unwrap();
        assert_eq!(user, "user_01J8XYZ");
        assert_eq!(
            session_cookie(&user, &token),
            format!("WorkosCursorSessionToken=user_01J8XYZ%3A%3A{token}")
        );
    }

    #[test]
    fn test_subject_without_provider_prefix() {
        let token = token_with(r#"{"sub": "user_plain"}"#);
        assert_eq!(user_id_from_token(&token).unwrap(), "user_plain");
        assert!(user_id_from_token(&token_with(r#"{"sub": "github|"}"#)).is_err());
    }

    #[test]
    fn test_map_usage() {
        let usage: UsageResponse = serde_json::from_str(
            r#"{
                "gpt-4": {"numRequests": 210, "numRequestsTotal": 240, "numTokens": 9000,
                          "maxRequestUsage": 500, "maxTokenUsage": null},
                "gpt-3.5-turbo": {"numRequests": 3, "maxRequestUsage": null},
                "startOfMonth": "2025-05-14T10:22:31.000Z"
            }"#,
        )
        .unwrap();
        let snapshot = map_usage(&InstanceId::new("cursor"), &usage).unwrap();
        let quota = &snapshot.quotas[0];
        assert_eq!(quota.label, "Monthly");
        assert_eq!(quota.percent_used, 42.0);
        assert_eq!(quota.detail_text.as_deref(), Some("210 / 500 requests"));
        assert_eq!(
            quota.resets_at,
            Some(Utc.with_ymd_and_hms(2025, 6, 14, 10, 22, 31).unwrap())
        );
    }

    #[test]
    fn test_unlimited_plan_is_informational() {
        let usage: UsageResponse =
            serde_json::from_str(r#"{"gpt-4": {"numRequests": 12, "maxRequestUsage": null}}"#)
                .unwrap();
        let snapshot = map_usage(&InstanceId::new("cursor"), &usage).unwrap();
        assert!(snapshot.quotas[0].is_informational());
        assert_eq!(snapshot.quotas[0].menu_bar_override.as_deref(), Some("12 req"));
    }

    #[test]
    fn test_missing_usage_is_parse_failure() {
        let usage: UsageResponse = serde_json::from_str(r#"{"startOfMonth": null}"#).unwrap();
        assert!(matches!(
            map_usage(&InstanceId::new("cursor"), &usage),
            Err(ProviderError::ParseFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_database_not_available() {
        let provider = CursorProvider::new(ProviderIdentity::new("cursor", "Cursor", "cursor", None))
            .with_state_db(StateDb::new("/nonexistent/state.vscdb"));
        assert!(!provider.is_available());
        assert_eq!(provider.fetch_usage().await, Err(ProviderError::NotAvailable));
    }
}
