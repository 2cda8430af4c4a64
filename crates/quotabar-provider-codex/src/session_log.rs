//! Fallback: last rate limits written to Codex session logs
//!
//! Sessions live in `<codex home>/sessions/YYYY/MM/DD/rollout-*.jsonl`. Each
//! `event_msg` of payload type `token_count` may carry the limits the CLI saw
//! on its last request.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};

use crate::limits::{RateLimits, RateWindow};

/// How many of the newest session files are scanned
pub const MAX_FILES: usize = 5;

#[derive(Deserialize)]
struct LogLine {
    timestamp: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    payload: Option<Payload>,
}

#[derive(Deserialize)]
struct Payload {
    #[serde(rename = "type")]
    kind: Option<String>,
    rate_limits: Option<LogLimits>,
}

#[derive(Deserialize)]
struct LogLimits {
    primary: Option<LogWindow>,
    secondary: Option<LogWindow>,
}

#[derive(Deserialize)]
struct LogWindow {
    used_percent: f64,
    window_minutes: Option<i64>,
    resets_at: Option<i64>,
    resets_in_seconds: Option<i64>,
}

impl LogWindow {
    fn into_window(self, written_at: Option<DateTime<Utc>>) -> RateWindow {
        let resets_at = self
            .resets_at
            .and_then(|ts| DateTime::from_timestamp(ts, 0))
            .or_else(|| {
                let secs = self.resets_in_seconds?;
                written_at.map(|at| at + Duration::seconds(secs))
            });
        RateWindow {
            used_percent: self.used_percent,
            window_minutes: self.window_minutes,
            resets_at,
        }
    }
}

/// Newest session files first, at most [`MAX_FILES`]
fn newest_session_files(sessions_dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<(SystemTime, PathBuf)> = walkdir::WalkDir::new(sessions_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "jsonl"))
        .filter_map(|e| {
            let modified = e.metadata().ok()?.modified().ok()?;
            Some((modified, e.into_path()))
        })
        .collect();

    files.sort_by(|a, b| b.0.cmp(&a.0));
    files.truncate(MAX_FILES);
    files.into_iter().map(|(_, path)| path).collect()
}

/// Last rate limits recorded in one file
fn last_limits_in(path: &Path) -> Option<RateLimits> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to read Codex session {}: {}", path.display(), e);
            return None;
        }
    };

    content.lines().rev().find_map(|line| {
        if !line.contains("rate_limits") {
            return None;
        }
        let entry: LogLine = serde_json::from_str(line).ok()?;
        if entry.kind.as_deref() != Some("event_msg") {
            return None;
        }
        let payload = entry.payload?;
        if payload.kind.as_deref() != Some("token_count") {
            return None;
        }
        let limits = payload.rate_limits?;
        let written_at = entry
            .timestamp
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));
        let limits = RateLimits {
            primary: limits.primary.map(|w| w.into_window(written_at)),
            secondary: limits.secondary.map(|w| w.into_window(written_at)),
            credits: None,
        };
        (!limits.is_empty()).then_some(limits)
    })
}

/// Most recent rate limits across the newest session files
pub fn latest_rate_limits(sessions_dir: &Path) -> Option<RateLimits> {
    if !sessions_dir.exists() {
        debug!("Codex sessions directory not found: {}", sessions_dir.display());
        return None;
    }
    let files = newest_session_files(sessions_dir);
    debug!("Scanning {} Codex session files", files.len());
    files.iter().find_map(|path| last_limits_in(path))
}
