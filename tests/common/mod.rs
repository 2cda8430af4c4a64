//! Common test utilities and helpers for quotabar tests
//!
//! This module provides a scriptable fake provider, config builders and a
//! harness wiring a manager to in-memory stores.

#![allow(dead_code)]

use async_trait::async_trait;
use quotabar::{
    ManagerEvent, UsageManager,
    config_store::ConfigStore,
    registry::{ProviderContext, ProviderRegistry},
};
use quotabar_core::{
    FetchResult, ProviderError, ProviderIdentity, ProviderInstanceConfig, UsageProvider,
    UsageQuota, UsageSnapshot, secrets::MemorySecretStore,
};
use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

/// Provider returning scripted results; the last result repeats
pub struct FakeProvider {
    identity: ProviderIdentity,
    script: Mutex<VecDeque<FetchResult>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl FakeProvider {
    pub fn new(id: &str) -> Self {
        Self {
            identity: ProviderIdentity::new(id, id, id, None),
            script: Mutex::new(VecDeque::new()),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Queue a result
    pub fn then(self, result: FetchResult) -> Self {
        self.script.lock().unwrap().push_back(result);
        self
    }

    /// Queue a snapshot with the given `(percent_used, label)` quotas
    pub fn then_quotas(self, quotas: &[(f64, &str)]) -> Self {
        let result = snapshot(self.identity.id.as_str(), quotas);
        self.then(result)
    }

    pub fn then_error(self, error: ProviderError) -> Self {
        self.then(Err(error))
    }

    /// Sleep before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UsageProvider for FakeProvider {
    fn identity(&self) -> &ProviderIdentity {
        &self.identity
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn fetch_usage(&self) -> FetchResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let mut script = self.script.lock().unwrap();
        if script.len() > 1 {
            script.pop_front().unwrap()
        } else {
            script
                .front()
                .cloned()
                .unwrap_or(Err(ProviderError::NotAvailable))
        }
    }
}

/// Successful fetch result with `(percent_used, label)` quotas
pub fn snapshot(id: &str, quotas: &[(f64, &str)]) -> FetchResult {
    UsageSnapshot::new(
        id,
        quotas
            .iter()
            .map(|(pct, label)| UsageQuota::new(*pct, *label))
            .collect(),
    )
}

/// Enabled single-instance config whose id equals its type id
pub fn enabled(type_id: &str) -> ProviderInstanceConfig {
    ProviderInstanceConfig::new(type_id, type_id, type_id).enabled(true)
}

pub fn disabled(type_id: &str) -> ProviderInstanceConfig {
    ProviderInstanceConfig::new(type_id, type_id, type_id)
}

/// A manager over in-memory stores with direct access to both
pub struct Harness {
    pub manager: UsageManager,
    pub secrets: Arc<MemorySecretStore>,
    pub store: ConfigStore,
    pub events: broadcast::Receiver<ManagerEvent>,
}

impl Harness {
    /// Start a manager over `configs` as if they had been persisted earlier
    pub fn new(configs: Vec<ProviderInstanceConfig>) -> Self {
        let secrets = Arc::new(MemorySecretStore::new());
        let store = ConfigStore::in_memory();
        store.save_instances(&configs).unwrap();

        let context = ProviderContext::new(secrets.clone());
        let mut manager = UsageManager::new(ProviderRegistry::builtin(), context, store.clone());
        manager.startup(BTreeSet::new()).unwrap();
        let events = manager.subscribe();

        Self {
            manager,
            secrets,
            store,
            events,
        }
    }

    /// Swap in a fake adapter for an instance
    pub fn fake(&mut self, provider: FakeProvider) -> Arc<FakeProvider> {
        let provider = Arc::new(provider);
        let id = provider.identity().id.to_string();
        self.manager.install_provider(&id, provider.clone()).unwrap();
        provider
    }

    /// Events published since the last drain
    pub fn drain_events(&mut self) -> Vec<ManagerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// Visibility transitions among the drained events
    pub fn visibility_events(&mut self) -> Vec<(String, bool)> {
        self.drain_events()
            .into_iter()
            .filter_map(|event| match event {
                ManagerEvent::VisibilityChanged { id, visible } => Some((id.to_string(), visible)),
                _ => None,
            })
            .collect()
    }
}
