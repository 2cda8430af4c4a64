//! Organization → workspace identity cache
//!
//! Workspaces are only visible as the opaque account id of whichever login
//! the CLI currently holds. Each time a login is observed the cache tries to
//! attribute it to an organization by elimination:
//!
//! - a workspace that is already mapped is left alone;
//! - if exactly one known organization is unmapped, it takes the workspace;
//! - otherwise the default organization takes it, if still unmapped.
//!
//! Known mappings are never overwritten.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheState {
    #[serde(default)]
    mappings: BTreeMap<String, String>,
    #[serde(skip)]
    known_orgs: BTreeSet<String>,
    #[serde(skip)]
    default_org: Option<String>,
}

/// Shared, optionally persisted workspace cache.
#[derive(Debug, Default)]
pub struct WorkspaceCache {
    state: Mutex<CacheState>,
    path: Option<PathBuf>,
}

impl WorkspaceCache {
    /// In-memory cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache persisted as JSON at `path`; a missing or unreadable file starts empty
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!("Ignoring unreadable workspace cache {}: {}", path.display(), e);
                CacheState::default()
            }),
            Err(_) => CacheState::default(),
        };
        Self {
            state: Mutex::new(state),
            path: Some(path),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Replace the set of configured organizations
    ///
    /// Called whenever instances change; organizations no longer configured
    /// stop taking part in elimination. Learned mappings are kept.
    pub fn set_orgs<I, S>(&self, known: I, default_org: Option<&str>)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Ok(mut state) = self.state.lock() {
            let known: BTreeSet<String> = known.into_iter().map(Into::into).collect();
            state.default_org = default_org
                .filter(|d| known.contains(*d))
                .map(str::to_string);
            state.known_orgs = known;
        }
    }

    /// Workspace learned for `org`
    pub fn workspace_for(&self, org: &str) -> Option<String> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.mappings.get(org).cloned())
    }

    /// Attribute the currently logged-in workspace; returns the org it was
    /// assigned to, if this call created a mapping
    pub fn learn(&self, workspace_id: &str) -> Option<String> {
        let mut state = self.state.lock().ok()?;
        if state.mappings.values().any(|w| w == workspace_id) {
            return None;
        }

        let unmapped: Vec<&String> = state
            .known_orgs
            .iter()
            .filter(|org| !state.mappings.contains_key(*org))
            .collect();

        let org = match unmapped.as_slice() {
            [only] => Some((*only).clone()),
            _ => state
                .default_org
                .clone()
                .filter(|d| !state.mappings.contains_key(d)),
        }?;

        info!("Learned Codex workspace {} for organization {}", workspace_id, org);
        state.mappings.insert(org.clone(), workspace_id.to_string());
        self.persist(&state);
        Some(org)
    }

    fn persist(&self, state: &CacheState) {
        let Some(path) = &self.path else {
            return;
        };
        let result = serde_json::to_string_pretty(state)
            .map_err(std::io::Error::other)
            .and_then(|json| {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(path, json)
            });
        match result {
            Ok(()) => debug!("Saved workspace cache to {}", path.display()),
            Err(e) => warn!("Failed to save workspace cache {}: {}", path.display(), e),
        }
    }
}
