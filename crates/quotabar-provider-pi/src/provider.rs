use async_trait::async_trait;
use chrono::Utc;
use quotabar_core::config::ConfigField;
use quotabar_core::error::ProviderError;
use quotabar_core::format;
use quotabar_core::provider::{FetchResult, ProviderIdentity, UsageProvider};
use quotabar_core::timezone::TimezoneConfig;
use quotabar_core::types::{InstanceId, UsageQuota, UsageSnapshot};
use std::path::PathBuf;
use tracing::debug;

use crate::sessions::{self, Aggregate, UsageTotals};

pub const CONFIG_FIELDS: &[ConfigField] = &[];

/// Provider summarizing local Pi agent usage.
pub struct PiUsageProvider {
    identity: ProviderIdentity,
    sessions_dir: Option<PathBuf>,
    timezone: TimezoneConfig,
}

impl PiUsageProvider {
    pub fn new(identity: ProviderIdentity) -> Self {
        Self {
            identity,
            sessions_dir: sessions::agent_dir().map(|d| d.join("sessions")),
            timezone: TimezoneConfig::default(),
        }
    }

    pub fn with_sessions_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.sessions_dir = Some(dir.into());
        self
    }

    pub fn with_timezone(mut self, timezone: TimezoneConfig) -> Self {
        self.timezone = timezone;
        self
    }
}

#[async_trait]
impl UsageProvider for PiUsageProvider {
    fn identity(&self) -> &ProviderIdentity {
        &self.identity
    }

    fn is_available(&self) -> bool {
        self.sessions_dir.as_ref().is_some_and(|d| d.is_dir())
    }

    async fn fetch_usage(&self) -> FetchResult {
        let dir = self
            .sessions_dir
            .as_ref()
            .filter(|d| d.is_dir())
            .ok_or(ProviderError::NotAvailable)?;
        let day_start = self.timezone.start_of_day(Utc::now());
        let aggregate = sessions::aggregate(dir, day_start).await;
        debug!(
            "Pi usage: {} sessions, {} messages",
            aggregate.sessions, aggregate.all_time.messages
        );
        map_aggregate(&self.identity.id, &aggregate)
    }
}

fn totals_quota(label: &str, totals: &UsageTotals) -> UsageQuota {
    UsageQuota::informational(label)
        .with_menu_bar_override(format::usd(totals.cost))
        .with_detail(format!(
            "{} tokens ({} in, {} out), {} messages",
            format::tokens(totals.total_tokens()),
            format::tokens(totals.input_tokens),
            format::tokens(totals.output_tokens),
            totals.messages
        ))
}

fn map_aggregate(id: &InstanceId, aggregate: &Aggregate) -> FetchResult {
    UsageSnapshot::new(
        id,
        vec![
            totals_quota("Today", &aggregate.today),
            totals_quota("All Time", &aggregate.all_time),
        ],
    )
}
