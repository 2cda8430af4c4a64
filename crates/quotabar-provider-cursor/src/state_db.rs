//! Read-only access to Cursor's `state.vscdb`

use quotabar_core::error::ProviderError;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Key holding the session JWT
pub const ACCESS_TOKEN_KEY: &str = "cursorAuth/accessToken";

const QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Default location of the state database
///
/// `CURSOR_STATE_DB` overrides the platform default.
pub fn default_db_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("CURSOR_STATE_DB") {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir().map(|dir| {
        dir.join("Cursor")
            .join("User")
            .join("globalStorage")
            .join("state.vscdb")
    })
}

/// Handle on the state database and the `sqlite3` binary used to read it
#[derive(Debug, Clone)]
pub struct StateDb {
    path: PathBuf,
    program: PathBuf,
}

impl StateDb {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            program: PathBuf::from("sqlite3"),
        }
    }

    /// Use another `sqlite3`-compatible executable
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Read one value from `ItemTable`
    pub async fn read_item(&self, key: &str) -> Result<Option<String>, ProviderError> {
        if !self.exists() {
            return Err(ProviderError::NotAvailable);
        }
        let query = format!(
            "SELECT value FROM ItemTable WHERE key = '{}'",
            key.replace('\'', "''")
        );

        let mut command = Command::new(&self.program);
        command
            .arg("-readonly")
            .arg(&self.path)
            .arg(&query)
            .kill_on_drop(true);

        let output = tokio::time::timeout(QUERY_TIMEOUT, command.output())
            .await
            .map_err(|_| ProviderError::ExecutionFailed("sqlite3 query timed out".to_string()))?
            .map_err(|e| {
                ProviderError::ExecutionFailed(format!(
                    "failed to run {}: {e}",
                    self.program.display()
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProviderError::ExecutionFailed(format!(
                "sqlite3 exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
        debug!("Read {} ({} bytes) from {}", key, value.len(), self.path.display());
        Ok((!value.is_empty()).then_some(value))
    }

    /// The stored access token, with any JSON string quoting removed
    pub async fn access_token(&self) -> Result<String, ProviderError> {
        let raw = self
            .read_item(ACCESS_TOKEN_KEY)
            .await?
            .ok_or(ProviderError::AuthenticationRequired)?;
        let token = raw.trim_matches('"').to_string();
        if token.is_empty() {
            return Err(ProviderError::AuthenticationRequired);
        }
        Ok(token)
    }
}
