//! Secret store boundary
//!
//! Instance configs only hold *references* (keys) into a [`SecretStore`]. The
//! OS credential vault is an external collaborator; this module ships an
//! in-memory store for tests and a JSON file store for the CLI.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::debug;

use crate::error::{QuotabarError, Result};

/// Keyed secret storage
pub trait SecretStore: Send + Sync {
    /// Load a secret, `None` when absent
    fn load(&self, key: &str) -> Option<String>;

    /// Create or replace a secret
    fn save(&self, key: &str, value: &str) -> Result<()>;

    /// Delete a secret; deleting a missing key succeeds
    fn delete(&self, key: &str) -> Result<()>;

    fn contains(&self, key: &str) -> bool {
        self.load(key).is_some()
    }
}

/// Process-local secret store
#[derive(Default)]
pub struct MemorySecretStore {
    secrets: RwLock<BTreeMap<String, String>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored secrets
    pub fn len(&self) -> usize {
        self.secrets.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SecretStore for MemorySecretStore {
    fn load(&self, key: &str) -> Option<String> {
        self.secrets.read().ok()?.get(key).cloned()
    }

    fn save(&self, key: &str, value: &str) -> Result<()> {
        self.secrets
            .write()
            .map_err(|e| QuotabarError::Secret(e.to_string()))?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.secrets
            .write()
            .map_err(|e| QuotabarError::Secret(e.to_string()))?
            .remove(key);
        Ok(())
    }
}

/// Secrets kept in a single JSON object file with owner-only permissions
pub struct FileSecretStore {
    path: PathBuf,
    lock: RwLock<()>,
}

impl FileSecretStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: RwLock::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&content).map_err(|e| QuotabarError::Parse {
            file: self.path.clone(),
            error: e.to_string(),
        })
    }

    fn write_all(&self, secrets: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(secrets)?)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))?;
        }
        debug!("Wrote {} secrets to {}", secrets.len(), self.path.display());
        Ok(())
    }
}

impl SecretStore for FileSecretStore {
    fn load(&self, key: &str) -> Option<String> {
        let _guard = self.lock.read().ok()?;
        self.read_all().ok()?.get(key).cloned()
    }

    fn save(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self
            .lock
            .write()
            .map_err(|e| QuotabarError::Secret(e.to_string()))?;
        let mut secrets = self.read_all()?;
        secrets.insert(key.to_string(), value.to_string());
        self.write_all(&secrets)
    }

    fn delete(&self, key: &str) -> Result<()> {
        let _guard = self
            .lock
            .write()
            .map_err(|e| QuotabarError::Secret(e.to_string()))?;
        let mut secrets = self.read_all()?;
        if secrets.remove(key).is_some() {
            self.write_all(&secrets)?;
        }
        Ok(())
    }
}
