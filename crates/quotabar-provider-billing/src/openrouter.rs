//! OpenRouter credit balance

use async_trait::async_trait;
use quotabar_core::config::{ConfigField, ProviderInstanceConfig};
use quotabar_core::format;
use quotabar_core::http;
use quotabar_core::provider::{FetchResult, ProviderIdentity, UsageProvider};
use quotabar_core::secrets::SecretStore;
use quotabar_core::types::{InstanceId, UsageQuota, UsageSnapshot};
use serde::Deserialize;
use std::sync::Arc;

use crate::credentials::{self, API_KEY};

/// Credits endpoint
pub const CREDITS_URL: &str = "https://openrouter.ai/api/v1/credits";

pub const CONFIG_FIELDS: &[ConfigField] = &[API_KEY];

/// Provider for an OpenRouter account balance.
pub struct OpenRouterProvider {
    identity: ProviderIdentity,
    secrets: Arc<dyn SecretStore>,
    key_ref: String,
    endpoint: String,
    client: reqwest::Client,
}

impl OpenRouterProvider {
    pub fn new(
        identity: ProviderIdentity,
        config: &ProviderInstanceConfig,
        secrets: Arc<dyn SecretStore>,
    ) -> Self {
        Self {
            identity,
            secrets,
            key_ref: credentials::key_reference(config),
            endpoint: CREDITS_URL.to_string(),
            client: http::build_client(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl UsageProvider for OpenRouterProvider {
    fn identity(&self) -> &ProviderIdentity {
        &self.identity
    }

    fn is_available(&self) -> bool {
        self.secrets.contains(&self.key_ref)
    }

    async fn fetch_usage(&self) -> FetchResult {
        let key = credentials::resolve_bearer(self.secrets.as_ref(), &self.key_ref)?;
        let request = self.client.get(&self.endpoint).bearer_auth(key);
        let response: CreditsResponse = http::send_json(request).await?;
        map_credits(&self.identity.id, &response.data)
    }
}

#[derive(Debug, Deserialize)]
struct CreditsResponse {
    data: Credits,
}

#[derive(Debug, Deserialize)]
struct Credits {
    #[serde(default)]
    total_credits: f64,
    #[serde(default)]
    total_usage: f64,
}

fn map_credits(id: &InstanceId, credits: &Credits) -> FetchResult {
    let remaining = credits.total_credits - credits.total_usage;
    let quota = if credits.total_credits > 0.0 {
        UsageQuota::new(
            credits.total_usage / credits.total_credits * 100.0,
            "Balance",
        )
        .with_detail(format!(
            "{} of {} used, {} left",
            format::usd(credits.total_usage),
            format::usd(credits.total_credits),
            format::usd(remaining)
        ))
    } else {
        UsageQuota::informational("Balance")
            .with_menu_bar_override(format::usd(remaining))
            .with_detail(format!("{} used", format::usd(credits.total_usage)))
    };
    UsageSnapshot::new(id, vec![quota])
}
