//! Usage manager
//!
//! [`UsageManager`] owns the configured instances, their live adapters and
//! every piece of derived state: last snapshots, last errors, loading flags
//! and the restoration tracker. All mutation goes through `&mut self`, so the
//! owner (a single coordination task, see [`crate::service`]) is the only
//! writer. Adapters run inside [`FetchJob`]s on background tasks and hand their
//! results back through [`UsageManager::apply_outcome`].
//!
//! State changes are published as [`ManagerEvent`]s on a broadcast channel.

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use quotabar_core::config::{ProviderConfigMap, ProviderInstanceConfig};
use quotabar_core::detection::DetectionProbe;
use quotabar_core::error::{ProviderError, QuotabarError, Result};
use quotabar_core::provider::{FetchResult, UsageProvider};
use quotabar_core::types::{InstanceId, UsageSnapshot};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config_store::ConfigStore;
use crate::registry::{ProviderContext, ProviderRegistry};
use crate::restoration::RestorationTracker;
use crate::sorting::{self, SortMode};

const EVENT_CAPACITY: usize = 64;

/// Counts for one finished poll cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleSummary {
    pub succeeded: usize,
    pub failed: usize,
}

/// Notification published by the manager
#[derive(Debug, Clone, PartialEq)]
pub enum ManagerEvent {
    /// An instance became visible (enabled) or hidden
    VisibilityChanged { id: InstanceId, visible: bool },
    /// A previously exhausted instance is usable again
    TokensRestored { id: InstanceId },
    SnapshotUpdated { id: InstanceId },
    FetchFailed { id: InstanceId, error: ProviderError },
    CycleCompleted(CycleSummary),
}

/// One pending fetch, detached from the manager
#[must_use = "a fetch job does nothing unless run"]
pub struct FetchJob {
    id: InstanceId,
    provider: Arc<dyn UsageProvider>,
}

impl FetchJob {
    pub fn id(&self) -> &InstanceId {
        &self.id
    }

    /// Run the adapter's fetch
    pub async fn run(self) -> (InstanceId, FetchResult) {
        let result = self.provider.fetch_usage().await;
        (self.id, result)
    }

    /// Run on its own task so a panicking adapter still yields an outcome
    pub async fn run_isolated(self) -> (InstanceId, FetchResult) {
        let id = self.id.clone();
        match tokio::spawn(self.run()).await {
            Ok(outcome) => outcome,
            Err(e) => (
                id,
                Err(ProviderError::ExecutionFailed(format!("fetch task failed: {e}"))),
            ),
        }
    }
}

/// Cloned view of the manager's state for display
#[derive(Debug, Clone, Default)]
pub struct ManagerState {
    pub instances: Vec<ProviderInstanceConfig>,
    pub snapshots: HashMap<InstanceId, UsageSnapshot>,
    pub errors: HashMap<InstanceId, ProviderError>,
    pub loading: HashSet<InstanceId>,
    pub detected: BTreeSet<String>,
    pub sort_mode: SortMode,
    pub poll_interval: Duration,
}

impl ManagerState {
    /// Enabled instances in the current sort order
    pub fn sorted(&self) -> Vec<&ProviderInstanceConfig> {
        sorting::sorted_instances(&self.instances, &self.snapshots, self.sort_mode)
    }

    pub fn snapshot(&self, id: &str) -> Option<&UsageSnapshot> {
        self.snapshots.get(id)
    }

    pub fn error(&self, id: &str) -> Option<&ProviderError> {
        self.errors.get(id)
    }

    pub fn is_loading(&self, id: &str) -> bool {
        self.loading.contains(id)
    }
}

/// Orchestrator over all configured provider instances
pub struct UsageManager {
    registry: ProviderRegistry,
    context: ProviderContext,
    store: ConfigStore,
    configs: Vec<ProviderInstanceConfig>,
    providers: HashMap<InstanceId, Arc<dyn UsageProvider>>,
    snapshots: HashMap<InstanceId, UsageSnapshot>,
    errors: HashMap<InstanceId, ProviderError>,
    loading: HashSet<InstanceId>,
    in_flight: HashSet<InstanceId>,
    // Removed while a fetch was running; its result is stale
    orphaned: HashSet<InstanceId>,
    detected: BTreeSet<String>,
    restoration: RestorationTracker,
    sort_mode: SortMode,
    events: broadcast::Sender<ManagerEvent>,
}

impl UsageManager {
    pub fn new(registry: ProviderRegistry, context: ProviderContext, store: ConfigStore) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let sort_mode = store.sort_mode();
        Self {
            registry,
            context,
            store,
            configs: Vec::new(),
            providers: HashMap::new(),
            snapshots: HashMap::new(),
            errors: HashMap::new(),
            loading: HashSet::new(),
            in_flight: HashSet::new(),
            orphaned: HashSet::new(),
            detected: BTreeSet::new(),
            restoration: RestorationTracker::new(),
            sort_mode,
            events,
        }
    }

    // ------------------------------------------------------------------
    // Startup
    // ------------------------------------------------------------------

    /// Run detection against `probe`, then [`startup`](Self::startup)
    pub fn detect_and_start(&mut self, probe: &dyn DetectionProbe) -> Result<()> {
        let detected = self.registry.installed_type_ids(probe);
        self.startup(detected)
    }

    /// Load persisted instances, merge detected types and build adapters
    ///
    /// Detected types without an instance get one. Trackable types are
    /// enabled only on the very first run (nothing persisted yet); every
    /// other new instance starts disabled.
    pub fn startup(&mut self, detected: BTreeSet<String>) -> Result<()> {
        let persisted = self.store.load_instances()?;
        let first_run = persisted.is_none();
        let mut configs = persisted.unwrap_or_default();

        for config in &mut configs {
            config.is_auto_detected = detected.contains(&config.type_id);
        }

        for type_id in &detected {
            if configs.iter().any(|c| &c.type_id == type_id) {
                continue;
            }
            let Some(descriptor) = self.registry.get(type_id) else {
                continue;
            };
            let enabled = first_run && descriptor.is_trackable();
            info!(
                "Adding detected provider {} ({})",
                type_id,
                if enabled { "enabled" } else { "disabled" }
            );
            configs.push(
                ProviderInstanceConfig {
                    sort_order: Some(configs.len() as i64),
                    ..ProviderInstanceConfig::new(type_id.as_str(), type_id.as_str(), descriptor.name)
                }
                .enabled(enabled)
                .auto_detected(true),
            );
        }

        self.configs = configs;
        self.detected = detected;
        self.providers.clear();
        for index in 0..self.configs.len() {
            self.instantiate(index);
        }
        self.context.sync_instances(&self.configs);
        self.persist()?;
        info!(
            "Manager started with {} instances ({} enabled)",
            self.configs.len(),
            self.configs.iter().filter(|c| c.enabled).count()
        );
        Ok(())
    }

    fn instantiate(&mut self, index: usize) {
        let config = &self.configs[index];
        match self.registry.get(&config.type_id) {
            Some(descriptor) => {
                let provider = descriptor.instantiate(&self.context, config);
                self.providers.insert(InstanceId::new(config.id.as_str()), provider);
            }
            None => warn!(
                "Skipping instance {}: unknown provider type {}",
                config.id, config.type_id
            ),
        }
    }

    /// Replace the adapter of an existing instance
    pub fn install_provider(&mut self, id: &str, provider: Arc<dyn UsageProvider>) -> Result<()> {
        if self.config(id).is_none() {
            return Err(QuotabarError::InstanceNotFound(id.to_string()));
        }
        self.providers.insert(InstanceId::new(id), provider);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Polling
    // ------------------------------------------------------------------

    /// Prepare a fetch for one enabled instance
    ///
    /// Returns `None` for unknown, disabled or adapter-less instances, and
    /// when a fetch for the instance is already in flight. A fetch started
    /// before the instance was removed still counts until its result arrives.
    pub fn start_fetch(&mut self, id: &str) -> Option<FetchJob> {
        let config = self.configs.iter().find(|c| c.id == id && c.enabled)?;
        let trackable = self
            .registry
            .get(&config.type_id)
            .is_some_and(|d| d.is_trackable());
        let provider = self.providers.get(id)?.clone();

        let id = InstanceId::new(id);
        if !self.in_flight.insert(id.clone()) {
            debug!("Fetch for {} already in flight, skipping", id);
            return None;
        }
        if trackable {
            self.loading.insert(id.clone());
        }
        Some(FetchJob { id, provider })
    }

    /// Prepare fetches for every enabled instance
    pub fn begin_cycle(&mut self) -> Vec<FetchJob> {
        let ids: Vec<String> = self
            .configs
            .iter()
            .filter(|c| c.enabled)
            .map(|c| c.id.clone())
            .collect();
        ids.iter().filter_map(|id| self.start_fetch(id)).collect()
    }

    /// Merge one fetch result into the state. Returns whether it succeeded.
    ///
    /// A failure records the error and keeps the previous snapshot.
    pub fn apply_outcome(&mut self, id: InstanceId, result: FetchResult) -> bool {
        self.loading.remove(&id);
        self.in_flight.remove(&id);
        if self.orphaned.remove(&id) || self.config(id.as_str()).is_none() {
            debug!("Discarding result for removed instance {}", id);
            return result.is_ok();
        }

        match result {
            Ok(snapshot) => {
                debug!("Fetched {} quotas for {}", snapshot.quotas.len(), id);
                self.errors.remove(&id);
                let restored = self.restoration.observe(&id, &snapshot);
                self.snapshots.insert(id.clone(), snapshot);
                self.emit(ManagerEvent::SnapshotUpdated { id: id.clone() });
                if restored {
                    self.emit(ManagerEvent::TokensRestored { id });
                }
                true
            }
            Err(error) => {
                warn!("Fetch failed for {}: {}", id, error);
                self.errors.insert(id.clone(), error.clone());
                self.emit(ManagerEvent::FetchFailed { id, error });
                false
            }
        }
    }

    /// Fetch every enabled instance concurrently and merge the results
    pub async fn poll_cycle(&mut self) -> CycleSummary {
        let jobs = self.begin_cycle();
        info!("Polling {} instances", jobs.len());

        let mut pending: FuturesUnordered<_> = jobs.into_iter().map(FetchJob::run_isolated).collect();
        let mut summary = CycleSummary::default();
        while let Some((id, result)) = pending.next().await {
            if self.apply_outcome(id, result) {
                summary.succeeded += 1;
            } else {
                summary.failed += 1;
            }
        }

        self.complete_cycle(summary);
        summary
    }

    /// Publish the end of a poll cycle
    pub fn complete_cycle(&self, summary: CycleSummary) {
        info!(
            "Poll cycle finished: {} succeeded, {} failed",
            summary.succeeded, summary.failed
        );
        self.emit(ManagerEvent::CycleCompleted(summary));
    }

    // ------------------------------------------------------------------
    // Instance mutations
    // ------------------------------------------------------------------

    /// Enable or disable an instance; enabling returns the fetch to run
    pub fn set_enabled(&mut self, id: &str, enabled: bool) -> Result<Option<FetchJob>> {
        let config = self
            .configs
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| QuotabarError::InstanceNotFound(id.to_string()))?;
        let was_enabled = config.enabled;
        config.enabled = enabled;

        self.persist()?;
        self.after_visibility_change(id, was_enabled, enabled)
    }

    pub fn toggle(&mut self, id: &str) -> Result<Option<FetchJob>> {
        let enabled = self
            .config(id)
            .map(|c| c.enabled)
            .ok_or_else(|| QuotabarError::InstanceNotFound(id.to_string()))?;
        self.set_enabled(id, !enabled)
    }

    /// Add an enabled instance of `type_id`
    ///
    /// The first instance of a type takes the type id as its id; further
    /// instances of multi-instance types get `<type>-<8 hex chars>`.
    pub fn add_instance(
        &mut self,
        type_id: &str,
        label: Option<&str>,
        provider_config: ProviderConfigMap,
    ) -> Result<(InstanceId, Option<FetchJob>)> {
        let descriptor = self
            .registry
            .get(type_id)
            .ok_or_else(|| QuotabarError::UnknownProviderType(type_id.to_string()))?;

        let has_type = self.configs.iter().any(|c| c.type_id == type_id);
        if has_type && !descriptor.supports_multiple_instances {
            return Err(QuotabarError::DuplicateInstance(type_id.to_string()));
        }
        let id = if self.config(type_id).is_none() {
            type_id.to_string()
        } else {
            let suffix = Uuid::new_v4().simple().to_string();
            format!("{}-{}", type_id, &suffix[..8])
        };
        let label = label
            .filter(|l| !l.trim().is_empty())
            .unwrap_or(descriptor.name);

        let config = ProviderInstanceConfig {
            is_auto_detected: self.detected.contains(type_id),
            sort_order: Some(self.next_sort_order()),
            provider_config,
            ..ProviderInstanceConfig::new(id.as_str(), type_id, label)
        }
        .enabled(true);
        info!("Adding instance {} of type {}", id, type_id);

        self.configs.push(config);
        self.instantiate(self.configs.len() - 1);
        self.context.sync_instances(&self.configs);
        self.persist()?;
        let job = self.after_visibility_change(&id, false, true)?;
        Ok((InstanceId::new(id), job))
    }

    /// Replace an instance's config and rebuild its adapter
    ///
    /// Returns a fetch when the instance is enabled afterwards and either was
    /// disabled before or its settings changed.
    pub fn update_instance(&mut self, config: ProviderInstanceConfig) -> Result<Option<FetchJob>> {
        let index = self
            .configs
            .iter()
            .position(|c| c.id == config.id)
            .ok_or_else(|| QuotabarError::InstanceNotFound(config.id.clone()))?;
        let previous = &self.configs[index];
        if previous.type_id != config.type_id {
            return Err(QuotabarError::InvalidArgument(format!(
                "cannot change the type of {} from {} to {}",
                config.id, previous.type_id, config.type_id
            )));
        }
        if *previous == config {
            return Ok(None);
        }
        let was_enabled = previous.enabled;
        let id = config.id.clone();
        let enabled = config.enabled;

        self.configs[index] = config;
        self.instantiate(index);
        self.context.sync_instances(&self.configs);
        self.persist()?;

        let job = self.after_visibility_change(&id, was_enabled, enabled)?;
        if job.is_none() && enabled && was_enabled {
            return Ok(self.start_fetch(&id));
        }
        Ok(job)
    }

    /// Remove an instance and release its secrets
    ///
    /// Always publishes a hidden visibility event, even for unknown ids.
    pub fn remove_instance(&mut self, id: &str) -> Result<()> {
        if let Some(index) = self.configs.iter().position(|c| c.id == id) {
            let config = self.configs.remove(index);
            self.release_secrets(&config);
            self.providers.remove(id);
            self.snapshots.remove(id);
            self.errors.remove(id);
            self.loading.remove(id);
            if self.in_flight.contains(id) {
                self.orphaned.insert(InstanceId::new(id));
            }
            self.restoration.forget(id);
            self.context.sync_instances(&self.configs);
            info!("Removed instance {}", id);
            self.persist()?;
        } else {
            debug!("Remove requested for unknown instance {}", id);
        }

        self.emit(ManagerEvent::VisibilityChanged {
            id: InstanceId::new(id),
            visible: false,
        });
        Ok(())
    }

    fn release_secrets(&self, removed: &ProviderInstanceConfig) {
        let Some(descriptor) = self.registry.get(&removed.type_id) else {
            return;
        };
        for key in descriptor.secret_references(removed) {
            let shared = self.configs.iter().any(|other| {
                self.registry
                    .get(&other.type_id)
                    .is_some_and(|d| d.secret_references(other).contains(&key))
            });
            if shared {
                debug!("Keeping secret {} still referenced by another instance", key);
                continue;
            }
            if let Err(e) = self.context.secrets.delete(&key) {
                warn!("Failed to delete secret {}: {}", key, e);
            }
        }
    }

    /// Move the listed instances to the front, in the given order
    ///
    /// Unlisted instances keep their relative order after them; unknown ids
    /// are ignored.
    pub fn reorder_instances(&mut self, ids: &[String]) -> Result<()> {
        let mut remaining = std::mem::take(&mut self.configs);
        let mut ordered = Vec::with_capacity(remaining.len());
        for id in ids {
            if let Some(index) = remaining.iter().position(|c| &c.id == id) {
                ordered.push(remaining.remove(index));
            }
        }
        ordered.append(&mut remaining);
        for (index, config) in ordered.iter_mut().enumerate() {
            config.sort_order = Some(index as i64);
        }
        self.configs = ordered;
        self.persist()
    }

    pub fn set_sort_mode(&mut self, mode: SortMode) -> Result<()> {
        self.store.set_sort_mode(mode)?;
        self.sort_mode = mode;
        Ok(())
    }

    /// Store a new poll interval; returns the clamped value
    pub fn set_poll_interval(&mut self, interval: Duration) -> Result<Duration> {
        self.store.set_poll_interval(interval)
    }

    fn after_visibility_change(
        &mut self,
        id: &str,
        was_visible: bool,
        visible: bool,
    ) -> Result<Option<FetchJob>> {
        if was_visible == visible {
            return Ok(None);
        }
        self.emit(ManagerEvent::VisibilityChanged {
            id: InstanceId::new(id),
            visible,
        });
        if visible {
            Ok(self.start_fetch(id))
        } else {
            self.loading.remove(id);
            Ok(None)
        }
    }

    fn next_sort_order(&self) -> i64 {
        self.configs
            .iter()
            .filter_map(|c| c.sort_order)
            .max()
            .map_or(self.configs.len() as i64, |max| max + 1)
    }

    fn persist(&self) -> Result<()> {
        self.store.save_instances(&self.configs)
    }

    fn emit(&self, event: ManagerEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn subscribe(&self) -> broadcast::Receiver<ManagerEvent> {
        self.events.subscribe()
    }

    pub(crate) fn event_sender(&self) -> broadcast::Sender<ManagerEvent> {
        self.events.clone()
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    pub fn configs(&self) -> &[ProviderInstanceConfig] {
        &self.configs
    }

    pub fn config(&self, id: &str) -> Option<&ProviderInstanceConfig> {
        self.configs.iter().find(|c| c.id == id)
    }

    pub fn provider(&self, id: &str) -> Option<&Arc<dyn UsageProvider>> {
        self.providers.get(id)
    }

    pub fn snapshot(&self, id: &str) -> Option<&UsageSnapshot> {
        self.snapshots.get(id)
    }

    pub fn error(&self, id: &str) -> Option<&ProviderError> {
        self.errors.get(id)
    }

    pub fn is_loading(&self, id: &str) -> bool {
        self.loading.contains(id)
    }

    pub fn detected(&self) -> &BTreeSet<String> {
        &self.detected
    }

    pub fn sort_mode(&self) -> SortMode {
        self.sort_mode
    }

    /// Enabled instances in the current sort order
    pub fn sorted_instances(&self) -> Vec<&ProviderInstanceConfig> {
        sorting::sorted_instances(&self.configs, &self.snapshots, self.sort_mode)
    }

    pub fn state(&self) -> ManagerState {
        ManagerState {
            instances: self.configs.clone(),
            snapshots: self.snapshots.clone(),
            errors: self.errors.clone(),
            loading: self.loading.clone(),
            detected: self.detected.clone(),
            sort_mode: self.sort_mode,
            poll_interval: self.store.poll_interval(),
        }
    }
}
