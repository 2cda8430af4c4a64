//! Sort views over configured instances
//!
//! Sorting is a pure function of the enabled instance configs, the last known
//! snapshots and a [`SortMode`]. Every mode breaks ties by manual order, and
//! instances without usable data always sort to the end.

use chrono::{DateTime, Utc};
use quotabar_core::config::ProviderInstanceConfig;
use quotabar_core::types::{InstanceId, UsageQuota, UsageSnapshot};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// How the instance list is ordered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortMode {
    /// Stored array order
    #[default]
    Manual,
    /// Most remaining on the tightest primary quota first
    MostAvailableNow,
    /// Most remaining on the longest-lived quota first
    MostAvailableLongTerm,
    /// Soonest reset first
    ResetTimeAscending,
    /// Latest reset first
    ResetTimeDescending,
    /// By label
    Alphabetical,
}

impl SortMode {
    pub const ALL: [SortMode; 6] = [
        SortMode::Manual,
        SortMode::MostAvailableNow,
        SortMode::MostAvailableLongTerm,
        SortMode::ResetTimeAscending,
        SortMode::ResetTimeDescending,
        SortMode::Alphabetical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SortMode::Manual => "manual",
            SortMode::MostAvailableNow => "mostAvailableNow",
            SortMode::MostAvailableLongTerm => "mostAvailableLongTerm",
            SortMode::ResetTimeAscending => "resetTimeAscending",
            SortMode::ResetTimeDescending => "resetTimeDescending",
            SortMode::Alphabetical => "alphabetical",
        }
    }
}

impl fmt::Display for SortMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortMode {
    type Err = String;

    /// Accepts the persisted camelCase names and kebab-case CLI spellings
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_lowercase();
        SortMode::ALL
            .into_iter()
            .find(|mode| mode.as_str().to_lowercase() == normalized)
            .ok_or_else(|| format!("Unknown sort mode: {s}"))
    }
}

/// Availability class of one instance
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Availability {
    /// Remaining percentage of the most constraining primary quota
    Available { remaining: f64 },
    /// Some primary quota is at or above 100%
    Exhausted,
    /// No snapshot, or a snapshot without any primary quota
    NoData,
}

/// Classify a snapshot for the "available now" view
pub fn classify(snapshot: Option<&UsageSnapshot>) -> Availability {
    let Some(snapshot) = snapshot else {
        return Availability::NoData;
    };
    if snapshot.is_exhausted() {
        return Availability::Exhausted;
    }
    match snapshot.most_constraining_primary() {
        Some(quota) => Availability::Available {
            remaining: quota.percent_remaining(),
        },
        None => Availability::NoData,
    }
}

/// Remaining percentage on the quota with the furthest reset, or on the
/// least-used quota when no quota reports a reset
pub fn long_term_remaining(snapshot: &UsageSnapshot) -> Option<f64> {
    let measurable = || snapshot.quotas.iter().filter(|q| !q.is_informational());
    let furthest = measurable()
        .filter(|q| q.resets_at.is_some())
        .max_by_key(|q| q.resets_at);
    furthest
        .or_else(|| measurable().min_by(|a, b| a.percent_used.total_cmp(&b.percent_used)))
        .map(UsageQuota::percent_remaining)
}

/// Earliest reset time of any quota in the snapshot
pub fn next_reset(snapshot: &UsageSnapshot) -> Option<DateTime<Utc>> {
    snapshot.quotas.iter().filter_map(|q| q.resets_at).min()
}

/// Rank within a mode: bucket first, then score, both ascending
#[derive(Debug, Clone, Copy, PartialEq)]
struct Rank {
    bucket: u8,
    score: f64,
}

impl Rank {
    const LAST: Rank = Rank {
        bucket: u8::MAX,
        score: 0.0,
    };

    fn new(bucket: u8, score: f64) -> Self {
        Self { bucket, score }
    }

    fn cmp(&self, other: &Rank) -> Ordering {
        self.bucket
            .cmp(&other.bucket)
            .then_with(|| self.score.total_cmp(&other.score))
    }
}

fn rank(mode: SortMode, snapshot: Option<&UsageSnapshot>) -> Rank {
    match mode {
        SortMode::Manual | SortMode::Alphabetical => Rank::new(0, 0.0),
        SortMode::MostAvailableNow => match classify(snapshot) {
            Availability::Available { remaining } => Rank::new(0, -remaining),
            Availability::Exhausted => Rank::new(1, 0.0),
            Availability::NoData => Rank::LAST,
        },
        SortMode::MostAvailableLongTerm => snapshot
            .and_then(long_term_remaining)
            .map_or(Rank::LAST, |remaining| Rank::new(0, -remaining)),
        SortMode::ResetTimeAscending => snapshot
            .and_then(next_reset)
            .map_or(Rank::LAST, |at| Rank::new(0, at.timestamp_millis() as f64)),
        SortMode::ResetTimeDescending => snapshot
            .and_then(next_reset)
            .map_or(Rank::LAST, |at| Rank::new(0, -(at.timestamp_millis() as f64))),
    }
}

/// Enabled instances in display order for `mode`
pub fn sorted_instances<'a>(
    configs: &'a [ProviderInstanceConfig],
    snapshots: &HashMap<InstanceId, UsageSnapshot>,
    mode: SortMode,
) -> Vec<&'a ProviderInstanceConfig> {
    let mut ranked: Vec<(usize, Rank, &ProviderInstanceConfig)> = configs
        .iter()
        .enumerate()
        .filter(|(_, config)| config.enabled)
        .map(|(index, config)| {
            let snapshot = snapshots.get(config.id.as_str());
            (index, rank(mode, snapshot), config)
        })
        .collect();

    ranked.sort_by(|(ia, ra, ca), (ib, rb, cb)| {
        let primary = if mode == SortMode::Alphabetical {
            ca.label.to_lowercase().cmp(&cb.label.to_lowercase())
        } else {
            ra.cmp(rb)
        };
        primary.then(ia.cmp(ib))
    });

    ranked.into_iter().map(|(_, _, config)| config).collect()
}
