//! Integration tests for the usage manager: visibility transitions, instance
//! isolation, polling outcomes and restoration events.

mod common;

use common::{FakeProvider, Harness, disabled, enabled};
use quotabar::config_store::ConfigStore;
use quotabar::registry::{ProviderContext, ProviderRegistry};
use quotabar::{CycleSummary, ManagerEvent, QuotabarError, UsageManager};
use quotabar_core::secrets::{MemorySecretStore, SecretStore};
use quotabar_core::{InstanceId, ProviderError, ProviderInstanceConfig};
use quotabar_provider_codex::WorkspaceCache;
use quotabar_provider_codex::provider::{DEFAULT_FIELD, ORGANIZATION_FIELD};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

#[test]
fn test_enable_fires_exactly_one_visible_event() {
    let mut h = Harness::new(vec![disabled("cursor")]);

    let job = h.manager.set_enabled("cursor", true).unwrap();
    assert!(job.is_some());
    assert_eq!(h.visibility_events(), vec![("cursor".to_string(), true)]);

    drop(job);
    h.manager.set_enabled("cursor", false).unwrap();
    assert_eq!(h.visibility_events(), vec![("cursor".to_string(), false)]);
}

#[test]
fn test_setting_same_state_fires_nothing() {
    let mut h = Harness::new(vec![enabled("cursor"), disabled("claude")]);

    assert!(h.manager.set_enabled("cursor", true).unwrap().is_none());
    assert!(h.manager.set_enabled("claude", false).unwrap().is_none());
    assert!(h.drain_events().is_empty());
}

#[test]
fn test_toggle_flips_state() {
    let mut h = Harness::new(vec![disabled("cursor")]);
    let _ = h.manager.toggle("cursor").unwrap();
    assert!(h.manager.config("cursor").unwrap().enabled);
    let _ = h.manager.toggle("cursor").unwrap();
    assert!(!h.manager.config("cursor").unwrap().enabled);
    assert_eq!(
        h.visibility_events(),
        vec![("cursor".to_string(), true), ("cursor".to_string(), false)]
    );
}

#[test]
fn test_enabling_one_instance_leaves_others_alone() {
    let first = ProviderInstanceConfig::new("openai", "openai", "Personal");
    let second = ProviderInstanceConfig::new("openai-1a2b3c4d", "openai", "Work")
        .with_value("organizationId", "org-work");
    let mut h = Harness::new(vec![first.clone(), second.clone()]);

    let _ = h.manager.set_enabled("openai-1a2b3c4d", true).unwrap();

    assert_eq!(
        h.visibility_events(),
        vec![("openai-1a2b3c4d".to_string(), true)]
    );
    assert_eq!(h.manager.config("openai"), Some(&first));
    assert!(!h.manager.is_loading("openai"));
    assert!(h.manager.is_loading("openai-1a2b3c4d"));
}

#[test]
fn test_mutations_are_persisted() {
    let mut h = Harness::new(vec![disabled("cursor")]);
    let _ = h.manager.set_enabled("cursor", true).unwrap();

    let persisted = h.store.load_instances().unwrap().unwrap();
    assert!(persisted[0].enabled);
}

#[test]
fn test_unknown_instance_is_an_error() {
    let mut h = Harness::new(vec![]);
    assert!(matches!(
        h.manager.set_enabled("nope", true),
        Err(QuotabarError::InstanceNotFound(_))
    ));
    assert!(h.drain_events().is_empty());
}

#[test]
fn test_remove_nonexistent_still_hides() {
    let mut h = Harness::new(vec![enabled("cursor")]);
    h.manager.remove_instance("ghost").unwrap();

    assert_eq!(h.visibility_events(), vec![("ghost".to_string(), false)]);
    assert_eq!(h.manager.configs(), &[enabled("cursor")]);
}

#[test]
fn test_remove_releases_secrets() {
    let work = ProviderInstanceConfig::new("openai-1a2b3c4d", "openai", "Work")
        .enabled(true)
        .with_value("keychainKey", "openai.work");
    let mut h = Harness::new(vec![enabled("openai"), work]);
    h.secrets.save("openai.work", "sk-work").unwrap();
    h.secrets.save("openai.keychainKey", "sk-default").unwrap();

    h.manager.remove_instance("openai-1a2b3c4d").unwrap();

    assert!(h.secrets.load("openai.work").is_none());
    // Derived reference of the remaining instance is untouched
    assert!(h.secrets.load("openai.keychainKey").is_some());
    assert!(h.manager.config("openai-1a2b3c4d").is_none());
    assert!(h.manager.provider("openai-1a2b3c4d").is_none());
    assert_eq!(
        h.visibility_events(),
        vec![("openai-1a2b3c4d".to_string(), false)]
    );
}

#[test]
fn test_remove_keeps_shared_secret() {
    let a = ProviderInstanceConfig::new("openrouter", "openrouter", "A")
        .with_value("keychainKey", "shared");
    let b = ProviderInstanceConfig::new("openrouter-2", "openrouter", "B")
        .with_value("keychainKey", "shared");
    let mut h = Harness::new(vec![a, b]);
    h.secrets.save("shared", "sk-or").unwrap();

    h.manager.remove_instance("openrouter").unwrap();
    assert!(h.secrets.load("shared").is_some());
}

#[tokio::test]
async fn test_success_stores_snapshot_and_clears_error() {
    let mut h = Harness::new(vec![enabled("cursor")]);
    h.fake(
        FakeProvider::new("cursor")
            .then_error(ProviderError::NetworkError("HTTP 500".into()))
            .then_quotas(&[(42.0, "Monthly")]),
    );

    h.manager.poll_cycle().await;
    assert!(h.manager.snapshot("cursor").is_none());
    assert_eq!(
        h.manager.error("cursor"),
        Some(&ProviderError::NetworkError("HTTP 500".into()))
    );

    h.manager.poll_cycle().await;
    assert_eq!(h.manager.snapshot("cursor").unwrap().quotas[0].percent_used, 42.0);
    assert!(h.manager.error("cursor").is_none());
    assert!(!h.manager.is_loading("cursor"));
}

#[tokio::test]
async fn test_failure_keeps_previous_snapshot() {
    let mut h = Harness::new(vec![enabled("claude")]);
    h.fake(
        FakeProvider::new("claude")
            .then_quotas(&[(10.0, "5h Window")])
            .then_error(ProviderError::SessionExpired),
    );

    h.manager.poll_cycle().await;
    h.manager.poll_cycle().await;

    assert_eq!(
        h.manager.snapshot("claude").unwrap().quotas[0].percent_used,
        10.0
    );
    assert_eq!(h.manager.error("claude"), Some(&ProviderError::SessionExpired));
}

#[tokio::test]
async fn test_disabled_instances_are_not_polled() {
    let mut h = Harness::new(vec![enabled("cursor"), disabled("claude")]);
    let cursor = h.fake(FakeProvider::new("cursor").then_quotas(&[(1.0, "Monthly")]));
    let claude = h.fake(FakeProvider::new("claude").then_quotas(&[(1.0, "Weekly")]));

    let summary = h.manager.poll_cycle().await;

    assert_eq!(summary, CycleSummary { succeeded: 1, failed: 0 });
    assert_eq!(cursor.calls(), 1);
    assert_eq!(claude.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_slow_instance_does_not_hold_back_others() {
    let mut h = Harness::new(vec![enabled("claude"), enabled("cursor"), enabled("codex")]);
    h.fake(
        FakeProvider::new("claude")
            .then_quotas(&[(5.0, "5h Window")])
            .with_delay(Duration::from_secs(60)),
    );
    h.fake(FakeProvider::new("cursor").then_quotas(&[(42.0, "Monthly")]));
    h.fake(FakeProvider::new("codex").then_error(ProviderError::ExecutionFailed("boom".into())));

    let summary = h.manager.poll_cycle().await;
    assert_eq!(summary, CycleSummary { succeeded: 2, failed: 1 });

    let updates: Vec<String> = h
        .drain_events()
        .into_iter()
        .filter_map(|event| match event {
            ManagerEvent::SnapshotUpdated { id } => Some(id.to_string()),
            _ => None,
        })
        .collect();
    assert_eq!(updates, ["cursor", "claude"]);
    assert!(h.manager.snapshot("cursor").is_some());
    assert!(h.manager.error("codex").is_some());
}

#[tokio::test]
async fn test_enable_transition_fetches_immediately() {
    let mut h = Harness::new(vec![disabled("cursor")]);
    let fake = h.fake(FakeProvider::new("cursor").then_quotas(&[(12.0, "Monthly")]));

    let job = h.manager.set_enabled("cursor", true).unwrap().unwrap();
    assert!(h.manager.is_loading("cursor"));
    let (id, result) = job.run().await;
    h.manager.apply_outcome(id, result);

    assert_eq!(fake.calls(), 1);
    assert!(h.manager.snapshot("cursor").is_some());
}

#[tokio::test]
async fn test_restoration_fires_once() {
    let mut h = Harness::new(vec![enabled("claude")]);
    h.fake(
        FakeProvider::new("claude")
            .then_quotas(&[(100.0, "5h Window"), (20.0, "Credits")])
            .then_quotas(&[(40.0, "5h Window"), (20.0, "Credits")])
            .then_quotas(&[(40.0, "5h Window"), (20.0, "Credits")]),
    );

    let mut restored = 0;
    for _ in 0..3 {
        h.manager.poll_cycle().await;
        restored += h
            .drain_events()
            .iter()
            .filter(|e| **e == ManagerEvent::TokensRestored { id: InstanceId::new("claude") })
            .count();
    }
    assert_eq!(restored, 1);
}

#[tokio::test]
async fn test_supplementary_exhaustion_is_not_restoration() {
    let mut h = Harness::new(vec![enabled("codex")]);
    h.fake(
        FakeProvider::new("codex")
            .then_quotas(&[(10.0, "5h Window"), (100.0, "Credits")])
            .then_quotas(&[(10.0, "5h Window"), (0.0, "Credits")]),
    );

    h.manager.poll_cycle().await;
    h.manager.poll_cycle().await;
    assert!(
        !h.drain_events()
            .iter()
            .any(|e| matches!(e, ManagerEvent::TokensRestored { .. }))
    );
}

#[tokio::test]
async fn test_results_for_removed_instances_are_dropped() {
    let mut h = Harness::new(vec![enabled("cursor")]);
    h.fake(FakeProvider::new("cursor").then_quotas(&[(1.0, "Monthly")]));

    let job = h.manager.start_fetch("cursor").unwrap();
    h.manager.remove_instance("cursor").unwrap();
    let (id, result) = job.run().await;
    h.manager.apply_outcome(id, result);

    assert!(h.manager.snapshot("cursor").is_none());
}

#[test]
fn test_update_rebuilds_and_refetches() {
    let mut h = Harness::new(vec![enabled("openai")]);
    let mut config = h.manager.config("openai").unwrap().clone();

    // Unchanged config is a no-op
    assert!(h.manager.update_instance(config.clone()).unwrap().is_none());

    config.label = "Personal".to_string();
    let job = h.manager.update_instance(config).unwrap();
    assert!(job.is_some());
    assert_eq!(h.manager.config("openai").unwrap().label, "Personal");
    assert!(h.visibility_events().is_empty());
}

#[test]
fn test_update_disabling_hides() {
    let mut h = Harness::new(vec![enabled("cursor")]);
    let config = h.manager.config("cursor").unwrap().clone().enabled(false);

    assert!(h.manager.update_instance(config).unwrap().is_none());
    assert_eq!(h.visibility_events(), vec![("cursor".to_string(), false)]);
}

#[test]
fn test_add_instance_becomes_visible() {
    let mut h = Harness::new(vec![]);
    let (id, job) = h
        .manager
        .add_instance("openrouter", Some("Credits"), Default::default())
        .unwrap();

    assert_eq!(id.as_str(), "openrouter");
    assert!(job.is_some());
    assert_eq!(h.visibility_events(), vec![("openrouter".to_string(), true)]);
    assert_eq!(h.store.load_instances().unwrap().unwrap().len(), 1);
}

#[tokio::test]
async fn test_fetch_outliving_removal_blocks_duplicate() {
    let mut h = Harness::new(vec![enabled("openrouter")]);
    h.fake(FakeProvider::new("openrouter").then_quotas(&[(5.0, "Monthly")]));

    let stale = h.manager.start_fetch("openrouter").unwrap();
    h.manager.remove_instance("openrouter").unwrap();

    // Re-added under the same id while the old fetch is still running
    let (id, job) = h
        .manager
        .add_instance("openrouter", None, Default::default())
        .unwrap();
    assert_eq!(id.as_str(), "openrouter");
    assert!(job.is_none());
    assert!(h.manager.start_fetch("openrouter").is_none());

    // The old result belongs to the removed instance
    let (id, result) = stale.run().await;
    h.manager.apply_outcome(id, result);
    assert!(h.manager.snapshot("openrouter").is_none());
    assert!(h.manager.start_fetch("openrouter").is_some());
}

fn codex_config(id: &str, org: &str, is_default: bool) -> ProviderInstanceConfig {
    ProviderInstanceConfig::new(id, "codex", id)
        .enabled(true)
        .with_value(ORGANIZATION_FIELD, org)
        .with_value(DEFAULT_FIELD, is_default)
}

fn codex_manager(configs: Vec<ProviderInstanceConfig>) -> (UsageManager, Arc<WorkspaceCache>) {
    let store = ConfigStore::in_memory();
    store.save_instances(&configs).unwrap();
    let cache = Arc::new(WorkspaceCache::new());
    let context =
        ProviderContext::new(Arc::new(MemorySecretStore::new())).with_workspace_cache(cache.clone());
    let mut manager = UsageManager::new(ProviderRegistry::builtin(), context, store);
    manager.startup(BTreeSet::new()).unwrap();
    (manager, cache)
}

#[test]
fn test_workspace_orgs_follow_updated_instance() {
    let (mut manager, cache) = codex_manager(vec![codex_config("codex", "org-a", false)]);

    let config = manager
        .config("codex")
        .unwrap()
        .clone()
        .with_value(ORGANIZATION_FIELD, "org-b");
    let _ = manager.update_instance(config).unwrap();

    assert_eq!(cache.learn("ws-1"), Some("org-b".to_string()));
    assert_eq!(cache.workspace_for("org-a"), None);
}

#[test]
fn test_workspace_orgs_follow_removed_instances() {
    let (mut manager, cache) = codex_manager(vec![
        codex_config("codex", "org-a", true),
        codex_config("codex-2", "org-b", false),
        codex_config("codex-3", "org-c", false),
    ]);

    // Removing the default leaves two candidates and no tie-breaker
    manager.remove_instance("codex").unwrap();
    assert_eq!(cache.learn("ws-1"), None);
    assert_eq!(cache.workspace_for("org-a"), None);

    manager.remove_instance("codex-3").unwrap();
    assert_eq!(cache.learn("ws-1"), Some("org-b".to_string()));
}

#[test]
fn test_clearing_default_flag_drops_default_org() {
    let (mut manager, cache) = codex_manager(vec![
        codex_config("codex", "org-a", true),
        codex_config("codex-2", "org-b", false),
    ]);

    let config = manager
        .config("codex")
        .unwrap()
        .clone()
        .with_value(DEFAULT_FIELD, false);
    let _ = manager.update_instance(config).unwrap();

    assert_eq!(cache.learn("ws-1"), None);
}
