//! Instance configuration store
//!
//! Persists the configured instance list as a single JSON array under one
//! well-known key, next to a handful of scalar preferences. The backing
//! key/value facility is the [`PreferenceStore`] trait; the CLI uses a JSON
//! file, tests use [`MemoryPreferences`].
//!
//! Decoding of legacy fixed-field instance records is handled by
//! [`ProviderInstanceConfig`]'s deserializer, so older files load transparently.

use quotabar_core::config::ProviderInstanceConfig;
use quotabar_core::error::{QuotabarError, Result};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

use crate::sorting::SortMode;

pub const INSTANCES_KEY: &str = "providerInstances";
pub const POLL_INTERVAL_KEY: &str = "pollIntervalSeconds";
pub const SORT_MODE_KEY: &str = "sortMode";
pub const SHOW_PERCENTAGE_KEY: &str = "menuBarShowPercentage";
pub const SHOW_REMAINING_KEY: &str = "menuBarShowRemaining";
pub const NOTIFY_ON_RESTORE_KEY: &str = "notifyOnRestore";

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 300;
pub const MIN_POLL_INTERVAL_SECS: u64 = 30;

/// quotabar's configuration directory, honoring `QUOTABAR_CONFIG_DIR`
pub fn config_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var("QUOTABAR_CONFIG_DIR") {
        return Some(PathBuf::from(dir));
    }
    dirs::config_dir().map(|d| d.join("quotabar"))
}

/// External key/value persistence facility
pub trait PreferenceStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&self, key: &str, value: Value) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// In-memory preferences
#[derive(Debug, Default)]
pub struct MemoryPreferences {
    values: RwLock<Map<String, Value>>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryPreferences {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.read().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        self.values
            .write()
            .map_err(|e| QuotabarError::Config(e.to_string()))?
            .insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.values
            .write()
            .map_err(|e| QuotabarError::Config(e.to_string()))?
            .remove(key);
        Ok(())
    }
}

/// Preferences kept as one JSON object file
pub struct JsonFilePreferences {
    path: PathBuf,
    lock: RwLock<()>,
}

impl JsonFilePreferences {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: RwLock::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<Map<String, Value>> {
        if !self.path.exists() {
            return Ok(Map::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(Map::new());
        }
        serde_json::from_str(&content).map_err(|e| QuotabarError::Parse {
            file: self.path.clone(),
            error: e.to_string(),
        })
    }

    fn write_all(&self, values: &Map<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(values)?)?;
        debug!("Wrote preferences to {}", self.path.display());
        Ok(())
    }

    fn update(&self, apply: impl FnOnce(&mut Map<String, Value>)) -> Result<()> {
        let _guard = self
            .lock
            .write()
            .map_err(|e| QuotabarError::Config(e.to_string()))?;
        let mut values = self.read_all()?;
        apply(&mut values);
        self.write_all(&values)
    }
}

impl PreferenceStore for JsonFilePreferences {
    fn get(&self, key: &str) -> Option<Value> {
        let _guard = self.lock.read().ok()?;
        match self.read_all() {
            Ok(mut values) => values.remove(key),
            Err(e) => {
                warn!("Failed to read preferences: {}", e);
                None
            }
        }
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        self.update(|values| {
            values.insert(key.to_string(), value);
        })
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.update(|values| {
            values.remove(key);
        })
    }
}

/// Typed view over a [`PreferenceStore`]
#[derive(Clone)]
pub struct ConfigStore {
    prefs: Arc<dyn PreferenceStore>,
}

impl ConfigStore {
    pub fn new(prefs: Arc<dyn PreferenceStore>) -> Self {
        Self { prefs }
    }

    /// Store backed by an in-memory facility
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryPreferences::new()))
    }

    /// Persisted instance list; `None` when nothing was ever saved
    pub fn load_instances(&self) -> Result<Option<Vec<ProviderInstanceConfig>>> {
        let Some(value) = self.prefs.get(INSTANCES_KEY) else {
            return Ok(None);
        };
        let configs: Vec<ProviderInstanceConfig> = serde_json::from_value(value)
            .map_err(|e| QuotabarError::Config(format!("invalid {INSTANCES_KEY}: {e}")))?;
        debug!("Loaded {} provider instances", configs.len());
        Ok(Some(configs))
    }

    pub fn save_instances(&self, configs: &[ProviderInstanceConfig]) -> Result<()> {
        self.prefs.set(INSTANCES_KEY, serde_json::to_value(configs)?)
    }

    /// Poll interval, clamped to the minimum
    pub fn poll_interval(&self) -> Duration {
        let secs = self
            .prefs
            .get(POLL_INTERVAL_KEY)
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_POLL_INTERVAL_SECS);
        Duration::from_secs(secs.max(MIN_POLL_INTERVAL_SECS))
    }

    /// Store a poll interval; returns the clamped value actually stored
    pub fn set_poll_interval(&self, interval: Duration) -> Result<Duration> {
        let secs = interval.as_secs().max(MIN_POLL_INTERVAL_SECS);
        self.prefs.set(POLL_INTERVAL_KEY, Value::from(secs))?;
        Ok(Duration::from_secs(secs))
    }

    pub fn sort_mode(&self) -> SortMode {
        self.prefs
            .get(SORT_MODE_KEY)
            .and_then(|v| v.as_str().and_then(|s| s.parse().ok()))
            .unwrap_or_default()
    }

    pub fn set_sort_mode(&self, mode: SortMode) -> Result<()> {
        self.prefs.set(SORT_MODE_KEY, Value::from(mode.as_str()))
    }

    pub fn show_percentage(&self) -> bool {
        self.flag(SHOW_PERCENTAGE_KEY, true)
    }

    pub fn show_remaining(&self) -> bool {
        self.flag(SHOW_REMAINING_KEY, false)
    }

    pub fn notify_on_restore(&self) -> bool {
        self.flag(NOTIFY_ON_RESTORE_KEY, true)
    }

    pub fn set_flag(&self, key: &str, value: bool) -> Result<()> {
        self.prefs.set(key, Value::from(value))
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        self.prefs
            .get(key)
            .and_then(|v| v.as_bool())
            .unwrap_or(default)
    }
}
