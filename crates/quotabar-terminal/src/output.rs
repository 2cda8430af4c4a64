//! Output formatting for quotabar
//!
//! Formatters render the manager's state for the terminal:
//! - Table format for human-readable output
//! - JSON format for scripts and status bars
//!
//! # Examples
//!
//! ```
//! use quotabar_core::{ProviderInstanceConfig, UsageQuota, UsageSnapshot};
//! use quotabar_terminal::{StatusEntry, get_formatter};
//!
//! let config = ProviderInstanceConfig::new("cursor", "cursor", "Cursor").enabled(true);
//! let snapshot = UsageSnapshot::new("cursor", vec![UsageQuota::new(42.0, "Monthly")]).unwrap();
//! let entries = vec![StatusEntry {
//!     config: &config,
//!     snapshot: Some(&snapshot),
//!     error: None,
//!     loading: false,
//! }];
//!
//! let json = get_formatter(true, false).format_status(&entries);
//! assert!(json.contains("\"percentUsed\": 42.0"));
//! ```

use chrono::{DateTime, Utc};
use colored::*;
use prettytable::{Table, format, row};
use quotabar_core::{ProviderError, ProviderInstanceConfig, StatusColor, UsageQuota, UsageSnapshot};
use serde_json::json;

/// One enabled instance with its latest state
#[derive(Debug, Clone, Copy)]
pub struct StatusEntry<'a> {
    pub config: &'a ProviderInstanceConfig,
    pub snapshot: Option<&'a UsageSnapshot>,
    pub error: Option<&'a ProviderError>,
    pub loading: bool,
}

/// One provider type of the catalog
#[derive(Debug, Clone)]
pub struct TypeEntry {
    pub type_id: String,
    pub name: String,
    pub category: String,
    pub multiple_instances: bool,
    pub detected: bool,
    pub config_keys: Vec<String>,
}

/// Trait for output formatters
pub trait OutputFormatter {
    /// Format the latest usage of each instance
    fn format_status(&self, entries: &[StatusEntry<'_>]) -> String;

    /// Format the configured instances
    fn format_instances(&self, configs: &[ProviderInstanceConfig]) -> String;

    /// Format the provider type catalog
    fn format_types(&self, types: &[TypeEntry]) -> String;
}

/// Table formatter for human-readable output
pub struct TableFormatter {
    /// Show remaining instead of used percentage
    pub show_remaining: bool,
    /// Whether to use colored output (respects NO_COLOR environment variable)
    colored_output: bool,
}

impl TableFormatter {
    pub fn new(show_remaining: bool) -> Self {
        Self {
            show_remaining,
            colored_output: std::env::var("NO_COLOR").is_err(),
        }
    }

    /// Disable ANSI colors regardless of the environment
    pub fn plain(mut self) -> Self {
        self.colored_output = false;
        self
    }

    fn paint(&self, text: String, color: StatusColor) -> String {
        if !self.colored_output {
            return text;
        }
        match color {
            StatusColor::Good => text.green().to_string(),
            StatusColor::Warning => text.yellow().to_string(),
            StatusColor::Critical => text.red().bold().to_string(),
            StatusColor::Unknown => text.dimmed().to_string(),
        }
    }

    /// Relative reset time such as `2h 5m` or `3d 4h`
    fn format_reset(resets_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
        let Some(at) = resets_at else {
            return "-".to_string();
        };
        let remaining = at - now;
        if remaining.num_seconds() <= 0 {
            return "now".to_string();
        }
        let days = remaining.num_days();
        let hours = remaining.num_hours() % 24;
        let minutes = remaining.num_minutes() % 60;
        if days > 0 {
            format!("{days}d {hours}h")
        } else if remaining.num_hours() > 0 {
            format!("{hours}h {minutes}m")
        } else {
            format!("{}m", minutes.max(1))
        }
    }

    fn quota_row_values(&self, quota: &UsageQuota, now: DateTime<Utc>) -> [String; 4] {
        [
            quota.label.clone(),
            self.paint(quota.display_value(self.show_remaining), quota.status_color()),
            Self::format_reset(quota.resets_at, now),
            quota.detail_text.clone().unwrap_or_default(),
        ]
    }

    /// Format status with a fixed current time (for testing)
    pub(crate) fn format_status_with_now(
        &self,
        entries: &[StatusEntry<'_>],
        now: DateTime<Utc>,
    ) -> String {
        let mut table = Table::new();
        table.set_format(*format::consts::FORMAT_NO_LINESEP_WITH_TITLE);
        table.set_titles(row![
            b -> "Instance",
            b -> "Quota",
            b -> if self.show_remaining { "Left" } else { "Used" },
            b -> "Resets In",
            b -> "Detail"
        ]);

        for entry in entries {
            let mut name = entry.config.label.clone();
            if let Some(tier) = entry.snapshot.and_then(|s| s.account_tier.as_deref()) {
                name = format!("{name} ({tier})");
            }

            match entry.snapshot {
                Some(snapshot) => {
                    for (i, quota) in snapshot.quotas.iter().enumerate() {
                        let [label, value, reset, detail] = self.quota_row_values(quota, now);
                        let first = if i == 0 { name.clone() } else { String::new() };
                        table.add_row(row![first, label, r -> value, reset, detail]);
                    }
                }
                None if entry.loading => {
                    table.add_row(row![name, "", "", "", "loading..."]);
                }
                None if entry.error.is_none() => {
                    table.add_row(row![name, "", "", "", "no data yet"]);
                }
                None => {}
            }

            if let Some(error) = entry.error {
                let first = if entry.snapshot.is_some() {
                    String::new()
                } else {
                    entry.config.label.clone()
                };
                let message = if self.colored_output {
                    error.to_string().red().to_string()
                } else {
                    error.to_string()
                };
                table.add_row(row![first, "error", "", "", message]);
            }
        }

        table.to_string()
    }
}

impl OutputFormatter for TableFormatter {
    fn format_status(&self, entries: &[StatusEntry<'_>]) -> String {
        if entries.is_empty() {
            return "No enabled providers. Use `quotabar add <type>` or `quotabar enable <id>`.\n"
                .to_string();
        }
        self.format_status_with_now(entries, Utc::now())
    }

    fn format_instances(&self, configs: &[ProviderInstanceConfig]) -> String {
        let mut table = Table::new();
        table.set_format(*format::consts::FORMAT_NO_LINESEP_WITH_TITLE);
        table.set_titles(row![
            b -> "#",
            b -> "ID",
            b -> "Type",
            b -> "Label",
            b -> "Enabled",
            b -> "Detected",
            b -> "Settings"
        ]);

        for (i, config) in configs.iter().enumerate() {
            let settings = config
                .provider_config
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(", ");
            table.add_row(row![
                r -> config.sort_order.unwrap_or(i as i64),
                config.id,
                config.type_id,
                config.label,
                c -> if config.enabled { "yes" } else { "no" },
                c -> if config.is_auto_detected { "yes" } else { "" },
                settings
            ]);
        }

        table.to_string()
    }

    fn format_types(&self, types: &[TypeEntry]) -> String {
        let mut table = Table::new();
        table.set_format(*format::consts::FORMAT_NO_LINESEP_WITH_TITLE);
        table.set_titles(row![
            b -> "Type",
            b -> "Name",
            b -> "Category",
            b -> "Multi",
            b -> "Detected",
            b -> "Fields"
        ]);
        for t in types {
            table.add_row(row![
                t.type_id,
                t.name,
                t.category,
                c -> if t.multiple_instances { "yes" } else { "" },
                c -> if t.detected { "yes" } else { "" },
                t.config_keys.join(", ")
            ]);
        }
        table.to_string()
    }
}

/// JSON formatter for machine-readable output
pub struct JsonFormatter;

impl OutputFormatter for JsonFormatter {
    fn format_status(&self, entries: &[StatusEntry<'_>]) -> String {
        let instances: Vec<_> = entries
            .iter()
            .map(|entry| {
                json!({
                    "id": entry.config.id,
                    "typeId": entry.config.type_id,
                    "label": entry.config.label,
                    "loading": entry.loading,
                    "snapshot": entry.snapshot,
                    "error": entry.error.map(|e| json!({
                        "kind": e.kind(),
                        "message": e.to_string(),
                    })),
                })
            })
            .collect();
        serde_json::to_string_pretty(&json!({ "instances": instances }))
            .unwrap_or_else(|_| "{}".to_string())
    }

    fn format_instances(&self, configs: &[ProviderInstanceConfig]) -> String {
        serde_json::to_string_pretty(configs).unwrap_or_else(|_| "[]".to_string())
    }

    fn format_types(&self, types: &[TypeEntry]) -> String {
        let types: Vec<_> = types
            .iter()
            .map(|t| {
                json!({
                    "typeId": t.type_id,
                    "name": t.name,
                    "category": t.category,
                    "supportsMultipleInstances": t.multiple_instances,
                    "detected": t.detected,
                    "configFields": t.config_keys,
                })
            })
            .collect();
        serde_json::to_string_pretty(&types).unwrap_or_else(|_| "[]".to_string())
    }
}

/// Get the appropriate formatter
pub fn get_formatter(json_output: bool, show_remaining: bool) -> Box<dyn OutputFormatter> {
    if json_output {
        Box::new(JsonFormatter)
    } else {
        Box::new(TableFormatter::new(show_remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_format_reset() {
        let now = now();
        assert_eq!(TableFormatter::format_reset(None, now), "-");
        assert_eq!(
            TableFormatter::format_reset(Some(now - Duration::minutes(1)), now),
            "now"
        );
        assert_eq!(
            TableFormatter::format_reset(Some(now + Duration::minutes(125)), now),
            "2h 5m"
        );
        assert_eq!(
            TableFormatter::format_reset(Some(now + Duration::hours(76)), now),
            "3d 4h"
        );
        assert_eq!(
            TableFormatter::format_reset(Some(now + Duration::seconds(20)), now),
            "1m"
        );
    }

    #[test]
    fn test_status_table_keeps_snapshot_next_to_error() {
        let config = ProviderInstanceConfig::new("claude", "claude", "Claude").enabled(true);
        let snapshot = UsageSnapshot::new(
            "claude",
            vec![
                UsageQuota::new(37.0, "5h Window").with_resets_at(now() + Duration::minutes(90)),
                UsageQuota::new(12.0, "Weekly"),
            ],
        )
        .unwrap()
        .with_account_tier(Some("max".into()));
        let error = ProviderError::NetworkError("HTTP 502".into());
        let entries = [StatusEntry {
            config: &config,
            snapshot: Some(&snapshot),
            error: Some(&error),
            loading: false,
        }];

        let out = TableFormatter::new(false)
            .plain()
            .format_status_with_now(&entries, now());
        assert!(out.contains("Claude (max)"));
        assert!(out.contains("5h Window"));
        assert!(out.contains("37%"));
        assert!(out.contains("1h 30m"));
        assert!(out.contains("Network error: HTTP 502"));
    }

    #[test]
    fn test_remaining_mode_and_loading() {
        let a = ProviderInstanceConfig::new("cursor", "cursor", "Cursor").enabled(true);
        let b = ProviderInstanceConfig::new("pi", "pi", "Pi").enabled(true);
        let snapshot = UsageSnapshot::new("cursor", vec![UsageQuota::new(42.0, "Monthly")]).unwrap();
        let entries = [
            StatusEntry {
                config: &a,
                snapshot: Some(&snapshot),
                error: None,
                loading: false,
            },
            StatusEntry {
                config: &b,
                snapshot: None,
                error: None,
                loading: true,
            },
        ];
        let out = TableFormatter::new(true)
            .plain()
            .format_status_with_now(&entries, now());
        assert!(out.contains("58%"));
        assert!(out.contains("Left"));
        assert!(out.contains("loading..."));
    }

    #[test]
    fn test_json_status() {
        let config = ProviderInstanceConfig::new("openai", "openai", "OpenAI").enabled(true);
        let error = ProviderError::AuthenticationRequired;
        let entries = [StatusEntry {
            config: &config,
            snapshot: None,
            error: Some(&error),
            loading: false,
        }];
        let out = JsonFormatter.format_status(&entries);
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        let first = &value["instances"][0];
        assert_eq!(first["id"], "openai");
        assert!(first["snapshot"].is_null());
        assert_eq!(first["error"]["kind"], "authenticationRequired");
    }

    #[test]
    fn test_instances_table() {
        let configs = vec![
            ProviderInstanceConfig::new("openai", "openai", "OpenAI")
                .enabled(true)
                .with_value("monthlyBudget", 20i64),
            ProviderInstanceConfig::new("windsurf", "windsurf", "Windsurf").auto_detected(true),
        ];
        let out = TableFormatter::new(false).plain().format_instances(&configs);
        assert!(out.contains("monthlyBudget=20"));
        assert!(out.contains("windsurf"));
    }
}
