//! Core domain types for quotabar
//!
//! This module contains the canonical usage model every provider adapter maps
//! its vendor response onto: a [`UsageSnapshot`] holding an ordered list of
//! [`UsageQuota`] values, plus the strongly-typed [`InstanceId`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

use crate::error::ProviderError;

/// Labels of quotas that never block usage when exhausted.
pub const SUPPLEMENTARY_LABELS: [&str; 2] = ["Credits", "On-Demand"];

/// `percent_used` value marking a quota that is not percentage based.
pub const INFORMATIONAL_PERCENT: f64 = -1.0;

/// Below this usage a quota is shown as good
pub const WARNING_THRESHOLD: f64 = 50.0;

/// At or above this usage a quota is shown as critical
pub const CRITICAL_THRESHOLD: f64 = 80.0;

/// Strongly-typed provider instance id
///
/// Distinct from the provider *type* id: several instances of one vendor type
/// can be configured side by side.
///
/// # Examples
/// ```
/// use quotabar_core::types::InstanceId;
///
/// let id = InstanceId::new("openai-3f2a9c1d");
/// assert_eq!(id.as_str(), "openai-3f2a9c1d");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    /// Create a new InstanceId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for InstanceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for InstanceId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for InstanceId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Display color bucket for a quota
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusColor {
    /// Less than half used
    Good,
    /// 50% to just under 80%
    Warning,
    /// 80% and above
    Critical,
    /// Informational quota without a percentage
    Unknown,
}

/// One measured limit within a snapshot
///
/// # Examples
/// ```
/// use quotabar_core::types::{StatusColor, UsageQuota};
///
/// let quota = UsageQuota::new(62.5, "Weekly");
/// assert_eq!(quota.percent_remaining(), 37.5);
/// assert_eq!(quota.status_color(), StatusColor::Warning);
///
/// let spend = UsageQuota::informational("Monthly Spend").with_menu_bar_override("$12.40");
/// assert_eq!(spend.display_value(false), "$12.40");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageQuota {
    /// Percentage used in `[0, 100]`, or exactly `-1` for informational quotas
    pub percent_used: f64,
    /// Free-form category name
    pub label: String,
    /// Human-readable raw numbers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail_text: Option<String>,
    /// When the quota window refreshes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resets_at: Option<DateTime<Utc>>,
    /// Literal display string used instead of a percentage for informational quotas
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub menu_bar_override: Option<String>,
}

impl UsageQuota {
    /// Create a percentage quota; values are clamped into `[0, 100]`
    pub fn new(percent_used: f64, label: impl Into<String>) -> Self {
        let percent_used = if percent_used.is_finite() {
            percent_used.clamp(0.0, 100.0)
        } else {
            0.0
        };
        Self {
            percent_used,
            label: label.into(),
            detail_text: None,
            resets_at: None,
            menu_bar_override: None,
        }
    }

    /// Create a quota that carries no percentage
    pub fn informational(label: impl Into<String>) -> Self {
        Self {
            percent_used: INFORMATIONAL_PERCENT,
            label: label.into(),
            detail_text: None,
            resets_at: None,
            menu_bar_override: None,
        }
    }

    /// Builder: set the detail text
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail_text = Some(detail.into());
        self
    }

    /// Builder: set the reset time
    pub fn with_resets_at(mut self, resets_at: DateTime<Utc>) -> Self {
        self.resets_at = Some(resets_at);
        self
    }

    /// Builder: set an optional reset time
    pub fn with_optional_resets_at(mut self, resets_at: Option<DateTime<Utc>>) -> Self {
        self.resets_at = resets_at;
        self
    }

    /// Builder: set the menu bar override string
    pub fn with_menu_bar_override(mut self, text: impl Into<String>) -> Self {
        self.menu_bar_override = Some(text.into());
        self
    }

    /// Remaining percentage, never negative
    pub fn percent_remaining(&self) -> f64 {
        (100.0 - self.percent_used).max(0.0)
    }

    /// Whether this quota carries no percentage
    pub fn is_informational(&self) -> bool {
        self.percent_used < 0.0
    }

    /// Whether this quota is one of the non-blocking supplementary labels
    pub fn is_supplementary(&self) -> bool {
        SUPPLEMENTARY_LABELS.contains(&self.label.as_str())
    }

    /// Whether this is a blocking, measurable quota
    pub fn is_primary(&self) -> bool {
        !self.is_supplementary() && !self.is_informational()
    }

    /// Whether the quota has been used up
    pub fn is_exhausted(&self) -> bool {
        !self.is_informational() && self.percent_used >= 100.0
    }

    /// Color bucket for the quota
    pub fn status_color(&self) -> StatusColor {
        if self.percent_used < 0.0 {
            StatusColor::Unknown
        } else if self.percent_used < WARNING_THRESHOLD {
            StatusColor::Good
        } else if self.percent_used < CRITICAL_THRESHOLD {
            StatusColor::Warning
        } else {
            StatusColor::Critical
        }
    }

    /// Compact value for the menu bar
    pub fn display_value(&self, show_remaining: bool) -> String {
        if self.is_informational() {
            return self
                .menu_bar_override
                .clone()
                .unwrap_or_else(|| "—".to_string());
        }
        let value = if show_remaining {
            self.percent_remaining()
        } else {
            self.percent_used
        };
        format!("{value:.0}%")
    }
}

/// One provider instance's usage at a point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSnapshot {
    /// Instance id (not the type id)
    pub provider_id: InstanceId,
    /// Quotas in display order; the first is the legacy primary
    pub quotas: Vec<UsageQuota>,
    /// When the data was captured
    pub captured_at: DateTime<Utc>,
    /// Plan or tier name when the vendor reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_tier: Option<String>,
}

impl UsageSnapshot {
    /// Create a snapshot captured now
    ///
    /// An empty quota list is rejected: "no data" is reported as a failure.
    pub fn new(
        provider_id: impl Into<InstanceId>,
        quotas: Vec<UsageQuota>,
    ) -> Result<Self, ProviderError> {
        if quotas.is_empty() {
            return Err(ProviderError::ParseFailed(
                "response contained no usage quotas".to_string(),
            ));
        }
        Ok(Self {
            provider_id: provider_id.into(),
            quotas,
            captured_at: Utc::now(),
            account_tier: None,
        })
    }

    /// Builder: set the account tier
    pub fn with_account_tier(mut self, tier: Option<String>) -> Self {
        self.account_tier = tier;
        self
    }

    /// Builder: override the capture time
    pub fn captured_at(mut self, at: DateTime<Utc>) -> Self {
        self.captured_at = at;
        self
    }

    /// Blocking, measurable quotas
    pub fn primary_quotas(&self) -> impl Iterator<Item = &UsageQuota> {
        self.quotas.iter().filter(|q| q.is_primary())
    }

    /// Whether at least one primary quota is present
    pub fn has_primary(&self) -> bool {
        self.primary_quotas().next().is_some()
    }

    /// Whether any primary quota is used up
    pub fn is_exhausted(&self) -> bool {
        self.primary_quotas().any(UsageQuota::is_exhausted)
    }

    /// The primary quota with the highest usage
    pub fn most_constraining_primary(&self) -> Option<&UsageQuota> {
        self.primary_quotas()
            .max_by(|a, b| a.percent_used.total_cmp(&b.percent_used))
    }

    /// First quota, as shown in single-quota contexts
    pub fn first_quota(&self) -> Option<&UsageQuota> {
        self.quotas.first()
    }
}

impl From<String> for InstanceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&InstanceId> for InstanceId {
    fn from(id: &InstanceId) -> Self {
        id.clone()
    }
}
