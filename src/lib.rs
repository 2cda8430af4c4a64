//! quotabar - Track quota and usage of AI coding tools
//!
//! This library provides:
//! - A registry of provider types with detection rules and adapter factories
//! - Persisted instance configuration with legacy record migration
//! - A manager polling every enabled instance concurrently
//! - Sort views, availability classification and restoration events
//! - A service task that owns the manager and drives the poll timer
//!
//! # Examples
//!
//! ```no_run
//! use quotabar::{
//!     config_store::ConfigStore,
//!     manager::UsageManager,
//!     registry::{ProviderContext, ProviderRegistry},
//! };
//! use quotabar_core::detection::SystemProbe;
//! use quotabar_core::secrets::MemorySecretStore;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> quotabar::Result<()> {
//!     let context = ProviderContext::new(Arc::new(MemorySecretStore::new()));
//!     let mut manager =
//!         UsageManager::new(ProviderRegistry::builtin(), context, ConfigStore::in_memory());
//!     manager.detect_and_start(&SystemProbe::new())?;
//!
//!     let summary = manager.poll_cycle().await;
//!     println!("{} instances polled", summary.succeeded + summary.failed);
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config_store;
pub mod manager;
pub mod registry;
pub mod restoration;
pub mod service;
pub mod sorting;

// Re-export commonly used types
pub use manager::{CycleSummary, FetchJob, ManagerEvent, ManagerState, UsageManager};
pub use quotabar_core::error::{QuotabarError, Result};
pub use registry::{ProviderCategory, ProviderContext, ProviderDescriptor, ProviderRegistry};
pub use service::{ManagerHandle, ManagerService};
pub use sorting::SortMode;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
