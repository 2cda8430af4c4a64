//! Restoration detection
//!
//! Tracks which instances are currently exhausted and reports the edge where
//! an exhausted instance becomes usable again.

use quotabar_core::types::{InstanceId, UsageSnapshot};
use std::collections::HashSet;
use tracing::info;

#[derive(Debug, Default, Clone)]
pub struct RestorationTracker {
    exhausted: HashSet<InstanceId>,
}

impl RestorationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful fetch. Returns true exactly once per
    /// exhausted → available transition.
    ///
    /// Snapshots without any primary quota carry no availability signal and
    /// leave the tracked state untouched.
    pub fn observe(&mut self, id: &InstanceId, snapshot: &UsageSnapshot) -> bool {
        if !snapshot.has_primary() {
            return false;
        }
        if snapshot.is_exhausted() {
            self.exhausted.insert(id.clone());
            return false;
        }
        let restored = self.exhausted.remove(id);
        if restored {
            info!("Tokens restored for {}", id);
        }
        restored
    }

    pub fn is_exhausted(&self, id: &str) -> bool {
        self.exhausted.contains(id)
    }

    pub fn forget(&mut self, id: &str) {
        self.exhausted.remove(id);
    }
}
