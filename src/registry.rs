//! Provider type registry
//!
//! A static, append-only table of provider type descriptors. Each descriptor
//! carries the type's display metadata, its detection rules, the config fields
//! an instance of it accepts, and a factory building the adapter for a
//! configured instance.
//!
//! Two archetypes share defaults:
//! - [`ProviderDescriptor::detection_only`]: no config fields, always backed
//!   by the presence-only adapter
//! - [`ProviderDescriptor::trackable`]: supplies its own fields and factory

use quotabar_core::config::{ConfigField, ProviderInstanceConfig};
use quotabar_core::detection::{DetectionProbe, DetectionSpec};
use quotabar_core::error::{QuotabarError, Result};
use quotabar_core::presence::PresenceProvider;
use quotabar_core::provider::{ProviderIdentity, UsageProvider};
use quotabar_core::secrets::SecretStore;
use quotabar_provider_billing::{OpenAiBillingProvider, OpenRouterProvider, openai, openrouter};
use quotabar_provider_claude::ClaudeProvider;
use quotabar_provider_codex::provider::{DEFAULT_FIELD, ORGANIZATION_FIELD};
use quotabar_provider_codex::{CodexProvider, WorkspaceCache};
use quotabar_provider_cursor::CursorProvider;
use quotabar_provider_pi::PiUsageProvider;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Shared collaborators handed to every factory
#[derive(Clone)]
pub struct ProviderContext {
    pub secrets: Arc<dyn SecretStore>,
    pub workspaces: Arc<WorkspaceCache>,
}

impl ProviderContext {
    pub fn new(secrets: Arc<dyn SecretStore>) -> Self {
        Self {
            secrets,
            workspaces: Arc::new(WorkspaceCache::new()),
        }
    }

    pub fn with_workspace_cache(mut self, cache: Arc<WorkspaceCache>) -> Self {
        self.workspaces = cache;
        self
    }

    /// Bring shared caches in line with the current instance list
    pub fn sync_instances(&self, configs: &[ProviderInstanceConfig]) {
        let codex = configs.iter().filter(|c| c.type_id == "codex");
        let orgs: BTreeSet<&str> = codex
            .clone()
            .filter_map(|c| c.string(ORGANIZATION_FIELD))
            .collect();
        let default_org = codex
            .filter(|c| c.bool(DEFAULT_FIELD).unwrap_or(false))
            .find_map(|c| c.string(ORGANIZATION_FIELD));
        debug!("Codex organizations: {:?} (default {:?})", orgs, default_org);
        self.workspaces.set_orgs(orgs, default_org);
    }
}

/// Builds the adapter for one configured instance
pub type ProviderFactory =
    fn(&ProviderContext, ProviderIdentity, &ProviderInstanceConfig) -> Arc<dyn UsageProvider>;

/// Whether a type measures anything
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ProviderCategory {
    /// Live usage is fetched
    Trackable,
    /// Only presence on the machine is reported
    DetectedOnly,
}

impl fmt::Display for ProviderCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderCategory::Trackable => write!(f, "trackable"),
            ProviderCategory::DetectedOnly => write!(f, "detectedOnly"),
        }
    }
}

/// Static metadata of one provider type
#[derive(Clone, Copy)]
pub struct ProviderDescriptor {
    pub type_id: &'static str,
    pub name: &'static str,
    pub icon: &'static str,
    pub dashboard_url: Option<&'static str>,
    pub category: ProviderCategory,
    pub supports_multiple_instances: bool,
    pub detection: DetectionSpec,
    pub config_fields: &'static [ConfigField],
    pub factory: ProviderFactory,
}

fn presence_factory(
    _ctx: &ProviderContext,
    identity: ProviderIdentity,
    _config: &ProviderInstanceConfig,
) -> Arc<dyn UsageProvider> {
    Arc::new(PresenceProvider::new(identity))
}

impl ProviderDescriptor {
    pub const fn detection_only(
        type_id: &'static str,
        name: &'static str,
        dashboard_url: Option<&'static str>,
        detection: DetectionSpec,
    ) -> Self {
        Self {
            type_id,
            name,
            icon: type_id,
            dashboard_url,
            category: ProviderCategory::DetectedOnly,
            supports_multiple_instances: false,
            detection,
            config_fields: &[],
            factory: presence_factory,
        }
    }

    pub const fn trackable(
        type_id: &'static str,
        name: &'static str,
        dashboard_url: Option<&'static str>,
        detection: DetectionSpec,
        config_fields: &'static [ConfigField],
        factory: ProviderFactory,
    ) -> Self {
        Self {
            type_id,
            name,
            icon: type_id,
            dashboard_url,
            category: ProviderCategory::Trackable,
            supports_multiple_instances: false,
            detection,
            config_fields,
            factory,
        }
    }

    pub const fn multiple_instances(mut self) -> Self {
        self.supports_multiple_instances = true;
        self
    }

    pub fn is_trackable(&self) -> bool {
        self.category == ProviderCategory::Trackable
    }

    /// Build the adapter for `config`
    pub fn instantiate(
        &self,
        ctx: &ProviderContext,
        config: &ProviderInstanceConfig,
    ) -> Arc<dyn UsageProvider> {
        let identity = ProviderIdentity::new(
            config.id.as_str(),
            config.label.clone(),
            self.icon,
            self.dashboard_url,
        );
        (self.factory)(ctx, identity, config)
    }

    /// Secret store keys referenced by an instance of this type
    pub fn secret_references(&self, config: &ProviderInstanceConfig) -> Vec<String> {
        self.config_fields
            .iter()
            .filter(|f| f.is_secret())
            .map(|f| config.secret_reference(f.key))
            .collect()
    }

    pub fn field(&self, key: &str) -> Option<&ConfigField> {
        self.config_fields.iter().find(|f| f.key == key)
    }
}

impl fmt::Debug for ProviderDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderDescriptor")
            .field("type_id", &self.type_id)
            .field("category", &self.category)
            .field("supports_multiple_instances", &self.supports_multiple_instances)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Built-in types
// ---------------------------------------------------------------------------

fn claude_factory(
    _ctx: &ProviderContext,
    identity: ProviderIdentity,
    _config: &ProviderInstanceConfig,
) -> Arc<dyn UsageProvider> {
    Arc::new(ClaudeProvider::new(identity))
}

fn codex_factory(
    ctx: &ProviderContext,
    identity: ProviderIdentity,
    config: &ProviderInstanceConfig,
) -> Arc<dyn UsageProvider> {
    Arc::new(CodexProvider::new(identity, config, ctx.workspaces.clone()))
}

fn cursor_factory(
    _ctx: &ProviderContext,
    identity: ProviderIdentity,
    _config: &ProviderInstanceConfig,
) -> Arc<dyn UsageProvider> {
    Arc::new(CursorProvider::new(identity))
}

fn openai_factory(
    ctx: &ProviderContext,
    identity: ProviderIdentity,
    config: &ProviderInstanceConfig,
) -> Arc<dyn UsageProvider> {
    Arc::new(OpenAiBillingProvider::new(identity, config, ctx.secrets.clone()))
}

fn openrouter_factory(
    ctx: &ProviderContext,
    identity: ProviderIdentity,
    config: &ProviderInstanceConfig,
) -> Arc<dyn UsageProvider> {
    Arc::new(OpenRouterProvider::new(identity, config, ctx.secrets.clone()))
}

fn pi_factory(
    _ctx: &ProviderContext,
    identity: ProviderIdentity,
    _config: &ProviderInstanceConfig,
) -> Arc<dyn UsageProvider> {
    Arc::new(PiUsageProvider::new(identity))
}

/// Types shipped with quotabar, in catalog order
pub const BUILTIN_TYPES: &[ProviderDescriptor] = &[
    ProviderDescriptor::trackable(
        "claude",
        "Claude",
        Some("https://claude.ai/settings/usage"),
        DetectionSpec::none()
            .paths(&["~/.claude"])
            .commands(&["claude"]),
        quotabar_provider_claude::provider::CONFIG_FIELDS,
        claude_factory,
    ),
    ProviderDescriptor::trackable(
        "codex",
        "Codex",
        Some("https://chatgpt.com/codex/settings/usage"),
        DetectionSpec::none().paths(&["~/.codex"]).commands(&["codex"]),
        quotabar_provider_codex::provider::CONFIG_FIELDS,
        codex_factory,
    )
    .multiple_instances(),
    ProviderDescriptor::trackable(
        "cursor",
        "Cursor",
        Some("https://cursor.com/dashboard"),
        DetectionSpec::none()
            .paths(&["~/.cursor"])
            .commands(&["cursor"]),
        quotabar_provider_cursor::provider::CONFIG_FIELDS,
        cursor_factory,
    ),
    ProviderDescriptor::trackable(
        "openai",
        "OpenAI API",
        Some("https://platform.openai.com/usage"),
        DetectionSpec::none(),
        openai::CONFIG_FIELDS,
        openai_factory,
    )
    .multiple_instances(),
    ProviderDescriptor::trackable(
        "openrouter",
        "OpenRouter",
        Some("https://openrouter.ai/activity"),
        DetectionSpec::none(),
        openrouter::CONFIG_FIELDS,
        openrouter_factory,
    )
    .multiple_instances(),
    ProviderDescriptor::trackable(
        "pi",
        "Pi",
        None,
        DetectionSpec::none()
            .paths(&["~/.pi/agent"])
            .commands(&["pi"]),
        quotabar_provider_pi::provider::CONFIG_FIELDS,
        pi_factory,
    ),
    ProviderDescriptor::detection_only(
        "windsurf",
        "Windsurf",
        Some("https://windsurf.com/subscription/usage"),
        DetectionSpec::none()
            .paths(&["~/.codeium/windsurf"])
            .commands(&["windsurf"]),
    ),
    ProviderDescriptor::detection_only(
        "copilot",
        "GitHub Copilot",
        Some("https://github.com/settings/copilot"),
        DetectionSpec::none().extensions(&["github.copilot"]),
    ),
    ProviderDescriptor::detection_only(
        "gemini",
        "Gemini CLI",
        None,
        DetectionSpec::none().paths(&["~/.gemini"]).commands(&["gemini"]),
    ),
    ProviderDescriptor::detection_only(
        "aider",
        "Aider",
        None,
        DetectionSpec::none().commands(&["aider"]),
    ),
];

/// Lookup table of provider types.
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    descriptors: Vec<ProviderDescriptor>,
}

impl ProviderRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding [`BUILTIN_TYPES`]
    pub fn builtin() -> Self {
        Self {
            descriptors: BUILTIN_TYPES.to_vec(),
        }
    }

    /// Append a type; ids are unique and entries are never replaced
    pub fn register(&mut self, descriptor: ProviderDescriptor) -> Result<()> {
        if self.get(descriptor.type_id).is_some() {
            return Err(QuotabarError::Config(format!(
                "provider type {} is already registered",
                descriptor.type_id
            )));
        }
        self.descriptors.push(descriptor);
        Ok(())
    }

    /// Exact type id lookup
    pub fn get(&self, type_id: &str) -> Option<&ProviderDescriptor> {
        self.descriptors.iter().find(|d| d.type_id == type_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProviderDescriptor> {
        self.descriptors.iter()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Types whose detection rules match on this host
    pub fn installed_type_ids(&self, probe: &dyn DetectionProbe) -> BTreeSet<String> {
        let detected: BTreeSet<String> = self
            .descriptors
            .iter()
            .filter(|d| !d.detection.is_empty() && d.detection.matches(probe))
            .map(|d| d.type_id.to_string())
            .collect();
        debug!("Detected provider types: {:?}", detected);
        detected
    }
}
