//! Presence-only adapter for detected tools without a usage API

use async_trait::async_trait;

use crate::provider::{FetchResult, ProviderIdentity, UsageProvider};
use crate::types::{UsageQuota, UsageSnapshot};

/// Label of the synthetic quota reported by [`PresenceProvider`]
pub const INSTALLED_LABEL: &str = "Installed";

/// Reports a single informational "Installed" quota and nothing else.
pub struct PresenceProvider {
    identity: ProviderIdentity,
}

impl PresenceProvider {
    pub fn new(identity: ProviderIdentity) -> Self {
        Self { identity }
    }
}

#[async_trait]
impl UsageProvider for PresenceProvider {
    fn identity(&self) -> &ProviderIdentity {
        &self.identity
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn fetch_usage(&self) -> FetchResult {
        UsageSnapshot::new(
            &self.identity.id,
            vec![UsageQuota::informational(INSTALLED_LABEL).with_menu_bar_override("✓")],
        )
    }
}
