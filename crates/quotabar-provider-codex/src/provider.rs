use async_trait::async_trait;
use quotabar_core::config::{ConfigField, ProviderInstanceConfig};
use quotabar_core::error::ProviderError;
use quotabar_core::provider::{FetchResult, ProviderIdentity, UsageProvider};
use quotabar_core::types::UsageSnapshot;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::auth;
use crate::rpc;
use crate::session_log;
use crate::workspace::WorkspaceCache;

pub const ORGANIZATION_FIELD: &str = "organizationId";
pub const DEFAULT_FIELD: &str = "isDefault";

pub const CONFIG_FIELDS: &[ConfigField] = &[
    ConfigField::text(ORGANIZATION_FIELD, "Organization ID").with_placeholder("org-..."),
    ConfigField::toggle(DEFAULT_FIELD, "Default organization"),
];

/// Provider for Codex CLI rate limit windows.
pub struct CodexProvider {
    identity: ProviderIdentity,
    organization_id: Option<String>,
    home: Option<PathBuf>,
    program: PathBuf,
    rpc_deadline: Duration,
    workspaces: Arc<WorkspaceCache>,
}

impl CodexProvider {
    pub fn new(
        identity: ProviderIdentity,
        config: &ProviderInstanceConfig,
        workspaces: Arc<WorkspaceCache>,
    ) -> Self {
        Self {
            identity,
            organization_id: config.string(ORGANIZATION_FIELD).map(str::to_string),
            home: auth::codex_home(),
            program: PathBuf::from("codex"),
            rpc_deadline: rpc::RPC_DEADLINE,
            workspaces,
        }
    }

    pub fn with_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.home = Some(home.into());
        self
    }

    pub fn with_program(mut self, program: impl Into<PathBuf>, deadline: Duration) -> Self {
        self.program = program.into();
        self.rpc_deadline = deadline;
        self
    }

    /// Check the logged-in workspace against this instance's organization
    fn check_workspace(&self, current: Option<&str>) -> Result<(), ProviderError> {
        let Some(current) = current else {
            return Ok(());
        };
        self.workspaces.learn(current);

        let Some(org) = &self.organization_id else {
            return Ok(());
        };
        match self.workspaces.workspace_for(org) {
            Some(expected) if expected != current => {
                debug!(
                    "Codex is logged into {}, not {} for {}",
                    current, expected, self.identity.id
                );
                Err(ProviderError::NotAvailable)
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl UsageProvider for CodexProvider {
    fn identity(&self) -> &ProviderIdentity {
        &self.identity
    }

    fn is_available(&self) -> bool {
        self.home.as_ref().is_some_and(|h| h.join("auth.json").exists())
            || which::which(&self.program).is_ok()
    }

    async fn fetch_usage(&self) -> FetchResult {
        let home = self.home.as_ref().ok_or(ProviderError::NotAvailable)?;
        let login = auth::current_login(&home.join("auth.json"));
        self.check_workspace(login.as_ref().and_then(|l| l.workspace_id.as_deref()))?;

        let limits = match rpc::read_rate_limits(&self.program, self.rpc_deadline).await {
            Ok(limits) if !limits.is_empty() => limits,
            Ok(_) => {
                debug!("Codex app-server reported no windows, trying session logs");
                session_log::latest_rate_limits(&home.join("sessions")).ok_or_else(|| {
                    ProviderError::ParseFailed("no rate limit windows reported".to_string())
                })?
            }
            Err(e) => {
                warn!("Codex app-server failed for {}: {}", self.identity.id, e);
                session_log::latest_rate_limits(&home.join("sessions")).ok_or(e)?
            }
        };

        let snapshot = UsageSnapshot::new(&self.identity.id, limits.to_quotas())?;
        Ok(snapshot.with_account_tier(login.and_then(|l| l.plan_type)))
    }
}
