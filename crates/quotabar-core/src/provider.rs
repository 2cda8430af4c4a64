//! Provider adapter trait
//!
//! This module defines the `UsageProvider` trait every adapter implements. The
//! manager only ever calls [`UsageProvider::fetch_usage`] on poll cycles; the
//! identity fields and [`UsageProvider::is_available`] feed the display layer.

use crate::error::ProviderError;
use crate::types::{InstanceId, UsageSnapshot};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

/// Result of one fetch
pub type FetchResult = std::result::Result<UsageSnapshot, ProviderError>;

/// Network timeout every adapter applies to its own requests
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(15);

/// Display identity of an adapter instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderIdentity {
    /// Instance id
    pub id: InstanceId,
    /// Display name (the instance label)
    pub name: String,
    /// Icon reference understood by the display layer
    pub icon: String,
    /// Vendor dashboard for manual inspection
    pub dashboard_url: Option<String>,
}

impl ProviderIdentity {
    pub fn new(
        id: impl Into<InstanceId>,
        name: impl Into<String>,
        icon: impl Into<String>,
        dashboard_url: Option<&str>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            icon: icon.into(),
            dashboard_url: dashboard_url.map(str::to_string),
        }
    }
}

/// Trait for provider-specific usage adapters.
///
/// Implementations must tolerate being called concurrently with *other*
/// instances' fetches; a single instance is never fetched twice at once.
#[async_trait]
pub trait UsageProvider: Send + Sync {
    /// Identity of this instance
    fn identity(&self) -> &ProviderIdentity;

    /// Cheap local check (file exists, secret present). Never touches the network.
    fn is_available(&self) -> bool;

    /// Fetch current usage. Always resolves; never blocks past its own deadline.
    async fn fetch_usage(&self) -> FetchResult;

    fn id(&self) -> &InstanceId {
        &self.identity().id
    }

    fn name(&self) -> &str {
        &self.identity().name
    }

    fn icon(&self) -> &str {
        &self.identity().icon
    }

    fn dashboard_url(&self) -> Option<&str> {
        self.identity().dashboard_url.as_deref()
    }
}

/// Run a fetch under a hard deadline, mapping expiry to a network error
pub async fn with_deadline<F>(deadline: Duration, fut: F) -> FetchResult
where
    F: Future<Output = FetchResult>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::NetworkError(format!(
            "timed out after {}s",
            deadline.as_secs()
        ))),
    }
}
