//! Rate limit model shared by the RPC and session-log readers

use chrono::{DateTime, Utc};
use quotabar_core::format;
use quotabar_core::types::UsageQuota;

/// One rolling window
#[derive(Debug, Clone, PartialEq)]
pub struct RateWindow {
    pub used_percent: f64,
    pub window_minutes: Option<i64>,
    pub resets_at: Option<DateTime<Utc>>,
}

/// Credit balance attached to the account
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CreditBalance {
    pub has_credits: bool,
    pub unlimited: bool,
    pub balance: Option<String>,
}

/// Everything one read reports
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RateLimits {
    pub primary: Option<RateWindow>,
    pub secondary: Option<RateWindow>,
    pub credits: Option<CreditBalance>,
}

impl RateLimits {
    pub fn is_empty(&self) -> bool {
        self.primary.is_none() && self.secondary.is_none()
    }

    /// Quotas in display order: primary window, secondary window, credits
    pub fn to_quotas(&self) -> Vec<UsageQuota> {
        let mut quotas = Vec::new();
        if let Some(w) = &self.primary {
            quotas.push(window_quota(w, "Primary"));
        }
        if let Some(w) = &self.secondary {
            quotas.push(window_quota(w, "Secondary"));
        }
        if let Some(quota) = self.credits.as_ref().and_then(credits_quota) {
            quotas.push(quota);
        }
        quotas
    }
}

/// Label for a window length
pub fn window_label(minutes: Option<i64>, fallback: &str) -> String {
    match minutes {
        Some(300) => "5h Window".to_string(),
        Some(10080) => "Weekly".to_string(),
        Some(m) if m > 0 && m % 1440 == 0 => format!("{}d Window", m / 1440),
        Some(m) if m > 0 && m % 60 == 0 => format!("{}h Window", m / 60),
        Some(m) if m > 0 => format!("{m}m Window"),
        _ => fallback.to_string(),
    }
}

fn window_quota(window: &RateWindow, fallback: &str) -> UsageQuota {
    UsageQuota::new(window.used_percent, window_label(window.window_minutes, fallback))
        .with_optional_resets_at(window.resets_at)
}

fn credits_quota(credits: &CreditBalance) -> Option<UsageQuota> {
    if credits.unlimited {
        return Some(
            UsageQuota::informational("Credits")
                .with_menu_bar_override("∞")
                .with_detail("Unlimited credits"),
        );
    }
    if !credits.has_credits {
        return None;
    }
    let balance = credits.balance.as_deref().unwrap_or("0");
    let display = balance
        .parse::<f64>()
        .map(format::usd)
        .unwrap_or_else(|_| balance.to_string());
    Some(
        UsageQuota::informational("Credits")
            .with_detail(format!("{display} remaining"))
            .with_menu_bar_override(display),
    )
}
