//! Integration tests for instance configuration persistence

use quotabar::config_store::{ConfigStore, INSTANCES_KEY, JsonFilePreferences, PreferenceStore};
use quotabar::registry::{ProviderContext, ProviderRegistry};
use quotabar::{SortMode, UsageManager};
use quotabar_core::detection::StaticProbe;
use quotabar_core::secrets::MemorySecretStore;
use quotabar_core::{ConfigValue, ProviderInstanceConfig};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

fn base() -> ProviderInstanceConfig {
    ProviderInstanceConfig::new("openai-1a2b3c4d", "openai", "Work")
        .enabled(true)
        .with_value("organizationId", "org-work")
        .with_value("monthlyBudget", 200i64)
}

#[test]
fn test_equality_considers_every_field() {
    assert_eq!(base(), base());
    assert_ne!(base(), base().enabled(false));

    let mut relabeled = base();
    relabeled.label = "Personal".to_string();
    assert_ne!(base(), relabeled);

    assert_ne!(base(), base().with_value("monthlyBudget", 201i64));
    assert_ne!(base(), base().with_value("keychainKey", "openai.work"));
}

#[test]
fn test_legacy_records_match_generic_records() {
    let prefs = Arc::new(quotabar::config_store::MemoryPreferences::new());
    prefs
        .set(
            INSTANCES_KEY,
            json!([
                {
                    "id": "openai-1a2b3c4d",
                    "typeId": "openai",
                    "label": "Work",
                    "enabled": true,
                    "isAutoDetected": false,
                    "keychainKey": "openai.work",
                    "organizationId": "org-work",
                    "monthlyBudget": 200.0
                },
                {
                    "id": "openai-1a2b3c4d",
                    "typeId": "openai",
                    "label": "Work",
                    "enabled": true,
                    "isAutoDetected": false,
                    "providerConfig": {
                        "keychainKey": "openai.work",
                        "organizationId": "org-work",
                        "monthlyBudget": 200
                    }
                }
            ]),
        )
        .unwrap();

    let configs = ConfigStore::new(prefs).load_instances().unwrap().unwrap();
    assert_eq!(configs[0], configs[1]);
    assert_eq!(
        configs[0].value("monthlyBudget"),
        Some(&ConfigValue::Int(200))
    );
    assert_eq!(configs[0].string("keychainKey"), Some("openai.work"));
}

#[test]
fn test_generic_map_wins_over_legacy_fields() {
    let prefs = Arc::new(quotabar::config_store::MemoryPreferences::new());
    prefs
        .set(
            INSTANCES_KEY,
            json!([{
                "id": "openai",
                "typeId": "openai",
                "label": "OpenAI",
                "enabled": false,
                "isAutoDetected": false,
                "organizationId": "org-legacy",
                "providerConfig": {"organizationId": "org-new"}
            }]),
        )
        .unwrap();

    let configs = ConfigStore::new(prefs).load_instances().unwrap().unwrap();
    assert_eq!(configs[0].string("organizationId"), Some("org-new"));
}

#[test]
fn test_saved_records_use_generic_format() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("preferences.json");
    let store = ConfigStore::new(Arc::new(JsonFilePreferences::new(&path)));
    store.save_instances(&[base()]).unwrap();

    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    let record = &raw[INSTANCES_KEY][0];
    assert_eq!(record["typeId"], "openai");
    assert_eq!(record["providerConfig"]["organizationId"], "org-work");
    assert!(record.get("organizationId").is_none());
}

#[test]
fn test_startup_with_detection_persists_across_runs() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("preferences.json");
    let open = || {
        let store = ConfigStore::new(Arc::new(JsonFilePreferences::new(&path)));
        let context = ProviderContext::new(Arc::new(MemorySecretStore::new()));
        UsageManager::new(ProviderRegistry::builtin(), context, store)
    };

    // First run: detected trackable tools are enabled
    let probe = StaticProbe::default()
        .with_command("claude")
        .with_command("aider");
    let mut manager = open();
    manager.detect_and_start(&probe).unwrap();
    assert!(manager.config("claude").unwrap().enabled);
    assert!(!manager.config("aider").unwrap().enabled);

    // User disables Claude; a later run keeps that choice and adds new tools disabled
    manager.set_enabled("claude", false).unwrap();
    manager.set_sort_mode(SortMode::ResetTimeAscending).unwrap();
    drop(manager);

    let probe = probe.with_command("cursor");
    let mut manager = open();
    manager.detect_and_start(&probe).unwrap();
    assert!(!manager.config("claude").unwrap().enabled);
    assert!(!manager.config("cursor").unwrap().enabled);
    assert!(manager.config("cursor").unwrap().is_auto_detected);
    assert_eq!(manager.sort_mode(), SortMode::ResetTimeAscending);

    // Tools no longer detected keep their rows but lose the detected flag
    let mut manager = open();
    manager.detect_and_start(&StaticProbe::default()).unwrap();
    assert!(manager.config("aider").is_some());
    assert!(!manager.config("aider").unwrap().is_auto_detected);
}
