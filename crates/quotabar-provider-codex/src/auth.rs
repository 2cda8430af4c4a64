//! Codex login state (`auth.json`)

use quotabar_core::jwt;
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

const AUTH_CLAIM: &str = "https://api.openai.com/auth";

/// Codex home directory, honoring `CODEX_HOME`
pub fn codex_home() -> Option<PathBuf> {
    if let Ok(home) = std::env::var("CODEX_HOME") {
        return Some(PathBuf::from(home));
    }
    dirs::home_dir().map(|h| h.join(".codex"))
}

#[derive(Debug, Deserialize)]
struct AuthFile {
    tokens: Option<Tokens>,
}

#[derive(Debug, Deserialize)]
struct Tokens {
    #[serde(alias = "idToken")]
    id_token: Option<String>,
    #[serde(alias = "accountId")]
    account_id: Option<String>,
}

/// Who the CLI is currently logged in as
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LoginIdentity {
    /// ChatGPT workspace (account) id
    pub workspace_id: Option<String>,
    pub plan_type: Option<String>,
}

/// Read the current login from `auth.json`; `None` when absent or unreadable
pub fn current_login(auth_path: &Path) -> Option<LoginIdentity> {
    let content = std::fs::read_to_string(auth_path).ok()?;
    let file: AuthFile = match serde_json::from_str(&content) {
        Ok(f) => f,
        Err(e) => {
            debug!("Unreadable Codex auth file {}: {}", auth_path.display(), e);
            return None;
        }
    };
    let tokens = file.tokens?;

    let claims = tokens
        .id_token
        .as_deref()
        .and_then(|t| jwt::decode_payload(t).ok());
    let auth_claim = claims.as_ref().and_then(|c| c.get(AUTH_CLAIM));
    let claim_str = |key: &str| {
        auth_claim
            .and_then(|a| a.get(key))
            .or_else(|| claims.as_ref().and_then(|c| c.get(key)))
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    Some(LoginIdentity {
        workspace_id: claim_str("chatgpt_account_id").or(tokens.account_id),
        plan_type: claim_str("chatgpt_plan_type"),
    })
}
