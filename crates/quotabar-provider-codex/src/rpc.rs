//! JSON-RPC client for `codex app-server`
//!
//! The exchange is `initialize` (id 1), the `initialized` notification, then
//! `account/rateLimits/read` (id 2). Limits arrive either as the id-2 response
//! or as an `account/rateLimits/updated` notification, whichever comes first.
//! The whole exchange runs under one hard deadline and the child is killed
//! when it ends.

use chrono::DateTime;
use quotabar_core::error::ProviderError;
use serde::Deserialize;
use serde_json::{Value, json};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{ChildStdin, ChildStdout, Command};
use tracing::debug;

use crate::limits::{CreditBalance, RateLimits, RateWindow};

/// Arguments that start the server in a sandboxed, read-only mode
pub const APP_SERVER_ARGS: [&str; 5] = ["-s", "read-only", "-a", "untrusted", "app-server"];

/// Deadline for the whole exchange
pub const RPC_DEADLINE: Duration = Duration::from_secs(10);

const INITIALIZE_ID: i64 = 1;
const RATE_LIMITS_ID: i64 = 2;
const RATE_LIMITS_UPDATED: &str = "account/rateLimits/updated";

#[derive(Debug, Deserialize)]
struct RpcMessage {
    id: Option<Value>,
    method: Option<String>,
    result: Option<Value>,
    params: Option<Value>,
    error: Option<Value>,
}

impl RpcMessage {
    fn has_id(&self, id: i64) -> bool {
        self.id.as_ref().and_then(Value::as_i64) == Some(id)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RateLimitsEnvelope {
    rate_limits: Option<RpcSnapshot>,
}

#[derive(Debug, Deserialize)]
struct RpcSnapshot {
    primary: Option<RpcWindow>,
    secondary: Option<RpcWindow>,
    credits: Option<RpcCredits>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcWindow {
    used_percent: f64,
    window_duration_mins: Option<i64>,
    /// Unix seconds
    resets_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcCredits {
    #[serde(default)]
    has_credits: bool,
    #[serde(default)]
    unlimited: bool,
    balance: Option<String>,
}

impl From<RpcSnapshot> for RateLimits {
    fn from(snapshot: RpcSnapshot) -> Self {
        let window = |w: RpcWindow| RateWindow {
            used_percent: w.used_percent,
            window_minutes: w.window_duration_mins,
            resets_at: w.resets_at.and_then(|ts| DateTime::from_timestamp(ts, 0)),
        };
        RateLimits {
            primary: snapshot.primary.map(window),
            secondary: snapshot.secondary.map(window),
            credits: snapshot.credits.map(|c| CreditBalance {
                has_credits: c.has_credits,
                unlimited: c.unlimited,
                balance: c.balance,
            }),
        }
    }
}

/// Spawn the app server and read the current rate limits
pub async fn read_rate_limits(
    program: &Path,
    deadline: Duration,
) -> Result<RateLimits, ProviderError> {
    let mut child = Command::new(program)
        .args(APP_SERVER_ARGS)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            ProviderError::ExecutionFailed(format!("failed to start {}: {e}", program.display()))
        })?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| ProviderError::ExecutionFailed("app-server stdin unavailable".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ProviderError::ExecutionFailed("app-server stdout unavailable".into()))?;

    let result = tokio::time::timeout(deadline, exchange(stdin, stdout)).await;
    if let Err(e) = child.start_kill() {
        debug!("app-server already exited: {}", e);
    }

    result.unwrap_or_else(|_| {
        Err(ProviderError::ExecutionFailed(format!(
            "app-server did not answer within {}s",
            deadline.as_secs()
        )))
    })
}

async fn exchange(mut stdin: ChildStdin, stdout: ChildStdout) -> Result<RateLimits, ProviderError> {
    let mut lines = BufReader::new(stdout).lines();

    send(
        &mut stdin,
        &json!({
            "id": INITIALIZE_ID,
            "method": "initialize",
            "params": {"clientInfo": {"name": "quotabar", "version": env!("CARGO_PKG_VERSION")}}
        }),
    )
    .await?;

    loop {
        let message = next_message(&mut lines).await?;
        if message.has_id(INITIALIZE_ID) {
            if let Some(err) = message.error {
                return Err(ProviderError::ExecutionFailed(format!(
                    "initialize rejected: {err}"
                )));
            }
            break;
        }
    }

    send(&mut stdin, &json!({"method": "initialized", "params": {}})).await?;
    send(
        &mut stdin,
        &json!({"id": RATE_LIMITS_ID, "method": "account/rateLimits/read", "params": {}}),
    )
    .await?;

    loop {
        let message = next_message(&mut lines).await?;
        let payload = if message.has_id(RATE_LIMITS_ID) {
            if let Some(err) = message.error {
                return Err(ProviderError::ExecutionFailed(format!(
                    "rate limit read rejected: {err}"
                )));
            }
            message.result
        } else if message.method.as_deref() == Some(RATE_LIMITS_UPDATED) {
            message.params
        } else {
            continue;
        };

        let envelope: RateLimitsEnvelope =
            serde_json::from_value(payload.unwrap_or(Value::Null))?;
        let limits: RateLimits = envelope
            .rate_limits
            .ok_or_else(|| ProviderError::ParseFailed("response has no rateLimits".into()))?
            .into();
        return Ok(limits);
    }
}

async fn send(stdin: &mut ChildStdin, message: &Value) -> Result<(), ProviderError> {
    let mut line = message.to_string();
    line.push('\n');
    stdin
        .write_all(line.as_bytes())
        .await
        .map_err(|e| ProviderError::ExecutionFailed(format!("write to app-server failed: {e}")))?;
    stdin
        .flush()
        .await
        .map_err(|e| ProviderError::ExecutionFailed(format!("write to app-server failed: {e}")))
}

/// Next well-formed JSON-RPC message; unparseable lines are skipped
async fn next_message(
    lines: &mut Lines<BufReader<ChildStdout>>,
) -> Result<RpcMessage, ProviderError> {
    loop {
        let line = lines
            .next_line()
            .await
            .map_err(|e| ProviderError::ExecutionFailed(format!("read from app-server failed: {e}")))?
            .ok_or_else(|| ProviderError::ExecutionFailed("app-server closed its output".into()))?;
        match serde_json::from_str::<RpcMessage>(&line) {
            Ok(message) => return Ok(message),
            Err(_) => debug!("Skipping non-JSON app-server line"),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn fake_codex(dir: &TempDir, body: &str) -> PathBuf {
        let script = dir.path().join("codex");
        std::fs::write(&script, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    #[tokio::test]
    async fn test_reads_direct_response() {
        let dir = TempDir::new().unwrap();
        let script = fake_codex(
            &dir,
            r#"[ "$5" = "app-server" ] || exit 2
read init
echo 'starting up'
echo '{"id":1,"result":{"userAgent":"codex_cli_rs/0.50.0"}}'
read initialized
read request
echo '{"method":"codex/event/session_configured","params":{}}'
echo '{"id":2,"result":{"rateLimits":{"primary":{"usedPercent":25,"windowDurationMins":300,"resetsAt":1750000000},"secondary":{"usedPercent":60,"windowDurationMins":10080,"resetsAt":null},"credits":{"hasCredits":false,"unlimited":false,"balance":null}}}}'"#,
        );

        let limits = read_rate_limits(&script, RPC_DEADLINE).await.unwrap();
        let primary = limits.primary.unwrap();
        assert_eq!(primary.used_percent, 25.0);
        assert_eq!(primary.window_minutes, Some(300));
        assert_eq!(primary.resets_at.map(|t| t.timestamp()), Some(1750000000));
        assert_eq!(limits.secondary.unwrap().used_percent, 60.0);
    }

    #[tokio::test]
    async fn test_accepts_update_notification() {
        let dir = TempDir::new().unwrap();
        let script = fake_codex(
            &dir,
            r#"read init
echo '{"id":1,"result":{}}'
read initialized
read request
echo '{"method":"account/rateLimits/updated","params":{"rateLimits":{"primary":{"usedPercent":100,"windowDurationMins":300},"secondary":null,"credits":null}}}'
sleep 30"#,
        );

        let limits = read_rate_limits(&script, RPC_DEADLINE).await.unwrap();
        assert_eq!(limits.primary.unwrap().used_percent, 100.0);
        assert!(limits.secondary.is_none());
    }

    #[tokio::test]
    async fn test_error_response_fails() {
        let dir = TempDir::new().unwrap();
        let script = fake_codex(
            &dir,
            r#"read init
echo '{"id":1,"result":{}}'
read initialized
read request
echo '{"id":2,"error":{"code":-32600,"message":"not logged in"}}'"#,
        );
        assert!(matches!(
            read_rate_limits(&script, RPC_DEADLINE).await,
            Err(ProviderError::ExecutionFailed(msg)) if msg.contains("not logged in")
        ));
    }

    #[tokio::test]
    async fn test_silent_server_hits_deadline() {
        let dir = TempDir::new().unwrap();
        let script = fake_codex(&dir, "sleep 30");
        let result = read_rate_limits(&script, Duration::from_millis(300)).await;
        assert!(matches!(result, Err(ProviderError::ExecutionFailed(_))));
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let result = read_rate_limits(Path::new("/nonexistent/codex"), RPC_DEADLINE).await;
        assert!(matches!(result, Err(ProviderError::ExecutionFailed(_))));
    }
}
