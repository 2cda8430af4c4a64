//! Local tool detection
//!
//! Each provider type declares a [`DetectionSpec`]: filesystem paths, CLI
//! command names and editor extension id prefixes. A [`DetectionProbe`]
//! answers whether each of those is present; a type counts as detected when
//! any of its rules match. Detection never touches the network.

use std::collections::HashSet;
use std::path::PathBuf;
use tracing::debug;

/// Detection rules of one provider type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetectionSpec {
    /// Paths, `~` expanded against the home directory
    pub paths: &'static [&'static str],
    /// Executables looked up on `PATH`
    pub commands: &'static [&'static str],
    /// Editor extension id prefixes (e.g. `github.copilot`)
    pub extension_prefixes: &'static [&'static str],
}

impl DetectionSpec {
    pub const fn none() -> Self {
        Self {
            paths: &[],
            commands: &[],
            extension_prefixes: &[],
        }
    }

    pub const fn paths(mut self, paths: &'static [&'static str]) -> Self {
        self.paths = paths;
        self
    }

    pub const fn commands(mut self, commands: &'static [&'static str]) -> Self {
        self.commands = commands;
        self
    }

    pub const fn extensions(mut self, prefixes: &'static [&'static str]) -> Self {
        self.extension_prefixes = prefixes;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty() && self.commands.is_empty() && self.extension_prefixes.is_empty()
    }

    /// Evaluate the rules against a probe
    pub fn matches(&self, probe: &dyn DetectionProbe) -> bool {
        self.paths.iter().any(|p| probe.path_exists(p))
            || self.commands.iter().any(|c| probe.command_exists(c))
            || self
                .extension_prefixes
                .iter()
                .any(|e| probe.extension_installed(e))
    }
}

/// Host presence checks
pub trait DetectionProbe: Send + Sync {
    fn path_exists(&self, path: &str) -> bool;
    fn command_exists(&self, command: &str) -> bool;
    fn extension_installed(&self, prefix: &str) -> bool;
}

/// Probe backed by the local filesystem and `PATH`
pub struct SystemProbe {
    home: Option<PathBuf>,
    extension_dirs: Vec<PathBuf>,
}

impl SystemProbe {
    pub fn new() -> Self {
        let home = dirs::home_dir();
        let extension_dirs = home
            .as_ref()
            .map(|h| {
                [".vscode", ".cursor", ".windsurf", ".vscode-insiders"]
                    .iter()
                    .map(|d| h.join(d).join("extensions"))
                    .collect()
            })
            .unwrap_or_default();
        Self {
            home,
            extension_dirs,
        }
    }

    fn expand(&self, path: &str) -> Option<PathBuf> {
        match path.strip_prefix("~/") {
            Some(rest) => self.home.as_ref().map(|h| h.join(rest)),
            None => Some(PathBuf::from(path)),
        }
    }
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectionProbe for SystemProbe {
    fn path_exists(&self, path: &str) -> bool {
        self.expand(path).is_some_and(|p| p.exists())
    }

    fn command_exists(&self, command: &str) -> bool {
        which::which(command).is_ok()
    }

    fn extension_installed(&self, prefix: &str) -> bool {
        let prefix = prefix.to_lowercase();
        self.extension_dirs.iter().any(|dir| {
            std::fs::read_dir(dir)
                .map(|entries| {
                    entries.filter_map(|e| e.ok()).any(|entry| {
                        entry
                            .file_name()
                            .to_str()
                            .is_some_and(|name| name.to_lowercase().starts_with(&prefix))
                    })
                })
                .unwrap_or(false)
        })
    }
}

/// Probe answering from fixed sets, for tests and demos
#[derive(Debug, Default, Clone)]
pub struct StaticProbe {
    pub paths: HashSet<String>,
    pub commands: HashSet<String>,
    pub extensions: HashSet<String>,
}

impl StaticProbe {
    pub fn with_command(mut self, command: &str) -> Self {
        self.commands.insert(command.to_string());
        self
    }

    pub fn with_path(mut self, path: &str) -> Self {
        self.paths.insert(path.to_string());
        self
    }

    pub fn with_extension(mut self, id: &str) -> Self {
        self.extensions.insert(id.to_string());
        self
    }
}

impl DetectionProbe for StaticProbe {
    fn path_exists(&self, path: &str) -> bool {
        self.paths.contains(path)
    }

    fn command_exists(&self, command: &str) -> bool {
        self.commands.contains(command)
    }

    fn extension_installed(&self, prefix: &str) -> bool {
        let found = self.extensions.iter().any(|e| e.starts_with(prefix));
        if found {
            debug!("Static probe matched extension prefix {}", prefix);
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPEC: DetectionSpec = DetectionSpec::none()
        .paths(&["~/.codex"])
        .commands(&["codex"]);

    #[test]
    fn test_matches_any_rule() {
        let probe = StaticProbe::default().with_command("codex");
        assert!(SPEC.matches(&probe));

        let probe = StaticProbe::default().with_path("~/.codex");
        assert!(SPEC.matches(&probe));

        assert!(!SPEC.matches(&StaticProbe::default()));
    }

    #[test]
    fn test_extension_prefix() {
        let spec = DetectionSpec::none().extensions(&["github.copilot"]);
        let probe = StaticProbe::default().with_extension("github.copilot-chat-0.22.0");
        assert!(spec.matches(&probe));
    }

    #[test]
    fn test_empty_spec_never_matches() {
        assert!(DetectionSpec::none().is_empty());
        let probe = StaticProbe::default().with_command("anything");
        assert!(!DetectionSpec::none().matches(&probe));
    }

    #[test]
    fn test_system_probe_absolute_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let probe = SystemProbe::new();
        assert!(probe.path_exists(dir.path().to_str().unwrap()));
        assert!(!probe.path_exists("/nonexistent/quotabar/path"));
    }
}
