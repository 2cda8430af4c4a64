//! OpenAI organization costs
//!
//! Queries `/v1/organization/costs` from the start of the current month with
//! an admin key and sums every bucket. A configured monthly budget turns the
//! spend into a percentage quota; without one the spend is informational.

use async_trait::async_trait;
use chrono::Utc;
use quotabar_core::config::{ConfigField, ProviderInstanceConfig};
use quotabar_core::error::ProviderError;
use quotabar_core::format;
use quotabar_core::http;
use quotabar_core::provider::{FetchResult, ProviderIdentity, UsageProvider};
use quotabar_core::secrets::SecretStore;
use quotabar_core::timezone::TimezoneConfig;
use quotabar_core::types::{InstanceId, UsageQuota, UsageSnapshot};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

use crate::credentials::{self, API_KEY};

/// Organization costs endpoint
pub const COSTS_URL: &str = "https://api.openai.com/v1/organization/costs";

pub const ORGANIZATION_FIELD: &str = "organizationId";
pub const BUDGET_FIELD: &str = "monthlyBudget";

/// Configurable fields of the OpenAI type
pub const CONFIG_FIELDS: &[ConfigField] = &[
    API_KEY,
    ConfigField::text(ORGANIZATION_FIELD, "Organization ID").with_placeholder("org-..."),
    ConfigField::number(BUDGET_FIELD, "Monthly budget (USD)"),
];

/// Data loader for OpenAI organization spend.
pub struct OpenAiBillingProvider {
    identity: ProviderIdentity,
    secrets: Arc<dyn SecretStore>,
    key_ref: String,
    organization_id: Option<String>,
    monthly_budget: Option<f64>,
    endpoint: String,
    timezone: TimezoneConfig,
    client: reqwest::Client,
}

impl OpenAiBillingProvider {
    pub fn new(
        identity: ProviderIdentity,
        config: &ProviderInstanceConfig,
        secrets: Arc<dyn SecretStore>,
    ) -> Self {
        Self {
            identity,
            secrets,
            key_ref: credentials::key_reference(config),
            organization_id: config.string(ORGANIZATION_FIELD).map(str::to_string),
            monthly_budget: config.double(BUDGET_FIELD).filter(|b| *b > 0.0),
            endpoint: COSTS_URL.to_string(),
            timezone: TimezoneConfig::utc(),
            client: http::build_client(),
        }
    }

    /// Point the adapter at another endpoint
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl UsageProvider for OpenAiBillingProvider {
    fn identity(&self) -> &ProviderIdentity {
        &self.identity
    }

    fn is_available(&self) -> bool {
        self.secrets.contains(&self.key_ref)
    }

    async fn fetch_usage(&self) -> FetchResult {
        let key = credentials::resolve_bearer(self.secrets.as_ref(), &self.key_ref)?;
        let month_start = self.timezone.start_of_month(Utc::now());

        let url = format!(
            "{}?start_time={}&bucket_width=1d&limit=31",
            self.endpoint,
            month_start.timestamp()
        );
        let mut request = self.client.get(url).bearer_auth(key);
        if let Some(org) = &self.organization_id {
            request = request.header("OpenAI-Organization", org);
        }

        let page: CostsPage = http::send_json(request).await?;
        debug!(
            "OpenAI costs for {}: {} buckets",
            self.identity.id,
            page.data.len()
        );
        map_costs(&self.identity.id, &page, self.monthly_budget)
    }
}

// ---------------------------------------------------------------------------
// Response schema
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CostsPage {
    #[serde(default)]
    data: Vec<CostBucket>,
}

#[derive(Debug, Deserialize)]
struct CostBucket {
    #[serde(default)]
    results: Vec<CostResult>,
}

#[derive(Debug, Deserialize)]
struct CostResult {
    amount: Option<CostAmount>,
}

#[derive(Debug, Deserialize)]
struct CostAmount {
    #[serde(default)]
    value: f64,
}

// ---------------------------------------------------------------------------
// Mapping
// ---------------------------------------------------------------------------

fn map_costs(id: &InstanceId, page: &CostsPage, budget: Option<f64>) -> FetchResult {
    let spend: f64 = page
        .data
        .iter()
        .flat_map(|bucket| &bucket.results)
        .filter_map(|r| r.amount.as_ref())
        .map(|a| a.value)
        .sum();

    if !spend.is_finite() {
        return Err(ProviderError::ParseFailed(
            "cost total is not a number".to_string(),
        ));
    }

    let quota = match budget {
        Some(budget) => UsageQuota::new(spend / budget * 100.0, "Monthly Budget")
            .with_detail(format!("{} / {}", format::usd(spend), format::usd(budget))),
        None => UsageQuota::informational("Monthly Spend")
            .with_menu_bar_override(format::usd(spend))
            .with_detail(format!("{} this month", format::usd(spend))),
    };

    UsageSnapshot::new(id, vec![quota])
}
