//! Property-based tests for instance sorting using proptest

use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;
use quotabar::SortMode;
use quotabar::sorting::{Availability, classify, sorted_instances};
use quotabar_core::{InstanceId, ProviderInstanceConfig, UsageQuota, UsageSnapshot};
use std::collections::HashMap;

// One generated instance: enabled flag, label, and optional usage with a reset offset
type Row = (bool, String, Option<(f64, Option<i64>)>);

fn arb_sort_mode() -> impl Strategy<Value = SortMode> {
    prop::sample::select(SortMode::ALL.to_vec())
}

prop_compose! {
    fn arb_row()(
        enabled in any::<bool>(),
        label in "[A-Za-z]{1,8}",
        usage in prop::option::of((0.0f64..130.0, prop::option::of(1i64..10_000))),
    ) -> Row {
        (enabled, label, usage)
    }
}

fn build(rows: &[Row]) -> (Vec<ProviderInstanceConfig>, HashMap<InstanceId, UsageSnapshot>) {
    let base = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
    let mut configs = Vec::new();
    let mut snapshots = HashMap::new();
    for (i, (enabled, label, usage)) in rows.iter().enumerate() {
        let id = format!("cursor-{i:08x}");
        configs.push(ProviderInstanceConfig::new(&id, "cursor", label).enabled(*enabled));
        if let Some((percent, reset_minutes)) = usage {
            let quota = UsageQuota::new(*percent, "Monthly")
                .with_optional_resets_at(reset_minutes.map(|m| base + Duration::minutes(m)));
            let snapshot = UsageSnapshot::new(id.as_str(), vec![quota]).unwrap();
            snapshots.insert(InstanceId::new(&id), snapshot);
        }
    }
    (configs, snapshots)
}

fn ids(sorted: &[&ProviderInstanceConfig]) -> Vec<String> {
    sorted.iter().map(|c| c.id.clone()).collect()
}

fn bucket(availability: Availability) -> u8 {
    match availability {
        Availability::Available { .. } => 0,
        Availability::Exhausted => 1,
        Availability::NoData => 2,
    }
}

proptest! {
    #[test]
    fn test_sorted_contains_exactly_enabled_instances(
        rows in prop::collection::vec(arb_row(), 0..16),
        mode in arb_sort_mode(),
    ) {
        let (configs, snapshots) = build(&rows);
        let mut sorted = ids(&sorted_instances(&configs, &snapshots, mode));
        let mut expected: Vec<String> = configs
            .iter()
            .filter(|c| c.enabled)
            .map(|c| c.id.clone())
            .collect();

        sorted.sort();
        expected.sort();
        prop_assert_eq!(sorted, expected);
    }

    #[test]
    fn test_sorting_is_deterministic(
        rows in prop::collection::vec(arb_row(), 0..16),
        mode in arb_sort_mode(),
    ) {
        let (configs, snapshots) = build(&rows);
        let first = ids(&sorted_instances(&configs, &snapshots, mode));
        let second = ids(&sorted_instances(&configs, &snapshots, mode));
        prop_assert_eq!(first, second);
    }

    #[test]
    fn test_manual_order_preserves_stored_order(
        rows in prop::collection::vec(arb_row(), 0..16),
    ) {
        let (configs, snapshots) = build(&rows);
        let sorted = ids(&sorted_instances(&configs, &snapshots, SortMode::Manual));
        let expected: Vec<String> = configs
            .iter()
            .filter(|c| c.enabled)
            .map(|c| c.id.clone())
            .collect();
        prop_assert_eq!(sorted, expected);
    }

    #[test]
    fn test_available_before_exhausted_before_no_data(
        rows in prop::collection::vec(arb_row(), 0..16),
    ) {
        let (configs, snapshots) = build(&rows);
        let sorted = sorted_instances(&configs, &snapshots, SortMode::MostAvailableNow);
        let buckets: Vec<u8> = sorted
            .iter()
            .map(|c| bucket(classify(snapshots.get(c.id.as_str()))))
            .collect();
        prop_assert!(buckets.windows(2).all(|w| w[0] <= w[1]));

        // Within the available bucket, more remaining comes first
        let remaining: Vec<f64> = sorted
            .iter()
            .filter_map(|c| match classify(snapshots.get(c.id.as_str())) {
                Availability::Available { remaining } => Some(remaining),
                _ => None,
            })
            .collect();
        prop_assert!(remaining.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn test_reset_ascending_is_reverse_of_descending_for_distinct_resets(
        offsets in prop::collection::hash_set(1i64..10_000, 0..12),
    ) {
        let rows: Vec<Row> = offsets
            .into_iter()
            .map(|m| (true, "x".to_string(), Some((10.0, Some(m)))))
            .collect();
        let (configs, snapshots) = build(&rows);

        let ascending = ids(&sorted_instances(&configs, &snapshots, SortMode::ResetTimeAscending));
        let mut descending =
            ids(&sorted_instances(&configs, &snapshots, SortMode::ResetTimeDescending));
        descending.reverse();
        prop_assert_eq!(ascending, descending);
    }
}
