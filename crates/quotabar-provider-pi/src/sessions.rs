//! Pi session discovery and aggregation
//!
//! Sessions live in `~/.pi/agent/sessions/{project}/{session_id}.jsonl`.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::ops::AddAssign;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn};

/// Pi agent directory, honoring `PI_AGENT_DIR`
pub fn agent_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var("PI_AGENT_DIR") {
        return Some(PathBuf::from(dir));
    }
    dirs::home_dir().map(|h| h.join(".pi").join("agent"))
}

/// Summed usage over some set of entries
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UsageTotals {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
    pub cost: f64,
    pub messages: u64,
}

impl UsageTotals {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens
            .saturating_add(self.output_tokens)
            .saturating_add(self.cache_read_tokens)
            .saturating_add(self.cache_write_tokens)
    }
}

impl AddAssign<&PiUsage> for UsageTotals {
    fn add_assign(&mut self, usage: &PiUsage) {
        // Counts come straight from log files
        self.input_tokens = self.input_tokens.saturating_add(usage.input);
        self.output_tokens = self.output_tokens.saturating_add(usage.output);
        self.cache_read_tokens = self.cache_read_tokens.saturating_add(usage.cache_read);
        self.cache_write_tokens = self.cache_write_tokens.saturating_add(usage.cache_write);
        self.cost += usage.cost.as_ref().and_then(|c| c.total).unwrap_or(0.0);
        self.messages = self.messages.saturating_add(1);
    }
}

/// Today's and all-time totals
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Aggregate {
    pub today: UsageTotals,
    pub all_time: UsageTotals,
    pub sessions: usize,
}

// ---------------------------------------------------------------------------
// Entry schema
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct PiEntry {
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    message: Option<PiMessage>,
}

#[derive(Deserialize)]
struct PiMessage {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    usage: Option<PiUsage>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PiUsage {
    #[serde(default)]
    input: u64,
    #[serde(default)]
    output: u64,
    #[serde(default)]
    cache_read: u64,
    #[serde(default)]
    cache_write: u64,
    #[serde(default)]
    cost: Option<PiCost>,
}

#[derive(Deserialize)]
struct PiCost {
    #[serde(default)]
    total: Option<f64>,
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

/// Session files, two levels below the sessions directory
pub fn session_files(sessions_dir: &Path) -> Vec<PathBuf> {
    walkdir::WalkDir::new(sessions_dir)
        .min_depth(2)
        .max_depth(2)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.into_path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "jsonl"))
        .collect()
}

/// Sum every session; entries at or after `day_start` also count toward today
pub async fn aggregate(sessions_dir: &Path, day_start: DateTime<Utc>) -> Aggregate {
    let files = session_files(sessions_dir);
    debug!("Found {} Pi session files", files.len());

    let mut aggregate = Aggregate {
        sessions: files.len(),
        ..Default::default()
    };
    for path in files {
        if let Err(e) = add_session_file(&path, day_start, &mut aggregate).await {
            warn!("Failed to read Pi session {}: {}", path.display(), e);
        }
    }
    aggregate
}

async fn add_session_file(
    path: &Path,
    day_start: DateTime<Utc>,
    aggregate: &mut Aggregate,
) -> std::io::Result<()> {
    let file = tokio::fs::File::open(path).await?;
    let mut lines = BufReader::new(file).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let Ok(entry) = serde_json::from_str::<PiEntry>(&line) else {
            continue;
        };
        let Some(message) = &entry.message else {
            continue;
        };
        if message.role.as_deref() != Some("assistant") {
            continue;
        }
        let Some(usage) = &message.usage else {
            continue;
        };
        if usage.input == 0 && usage.output == 0 {
            continue;
        }
        let Some(timestamp) = entry
            .timestamp
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.to_utc())
        else {
            continue;
        };

        aggregate.all_time += usage;
        if timestamp >= day_start {
            aggregate.today += usage;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Write;
    use tempfile::TempDir;

    fn make_pi_entry(ts: &str, role: &str, input: u64, output: u64, cost: Option<f64>) -> String {
        let cost_json = match cost {
            Some(c) => format!(r#","cost":{{"total":{}}}"#, c),
            None => String::new(),
        };
        format!(
            r#"{{"timestamp":"{}","message":{{"role":"{}","model":"claude-opus-4","usage":{{"input":{},"output":{},"cacheRead":10,"cacheWrite":5{}}}}}}}"#,
            ts, role, input, output, cost_json
        )
    }

    fn write_session(sessions: &Path, project: &str, name: &str, lines: &[String]) {
        let dir = sessions.join(project);
        std::fs::create_dir_all(&dir).unwrap();
        let mut f = std::fs::File::create(dir.join(name)).unwrap();
        for line in lines {
            writeln!(f, "{line}").unwrap();
        }
    }

    #[tokio::test]
    async fn test_today_and_all_time() {
        let dir = TempDir::new().unwrap();
        let sessions = dir.path().join("sessions");
        write_session(
            &sessions,
            "proj-a",
            "s1.jsonl",
            &[
                make_pi_entry("2025-03-01T09:00:00Z", "assistant", 100, 50, Some(0.10)),
                make_pi_entry("2025-03-02T09:00:00Z", "assistant", 200, 100, Some(0.25)),
                make_pi_entry("2025-03-02T09:01:00Z", "user", 999, 999, Some(9.0)),
            ],
        );
        write_session(
            &sessions,
            "proj-b",
            "s2.jsonl",
            &[
                make_pi_entry("2025-03-02T12:00:00Z", "assistant", 300, 0, None),
                "not json".to_string(),
                make_pi_entry("2025-03-02T13:00:00Z", "assistant", 0, 0, Some(1.0)),
            ],
        );

        let day_start = Utc.with_ymd_and_hms(2025, 3, 2, 0, 0, 0).unwrap();
        let aggregate = aggregate(&sessions, day_start).await;

        assert_eq!(aggregate.sessions, 2);
        assert_eq!(aggregate.all_time.messages, 3);
        assert_eq!(aggregate.all_time.input_tokens, 600);
        assert_eq!(aggregate.all_time.output_tokens, 150);
        assert!((aggregate.all_time.cost - 0.35).abs() < 1e-9);
        assert_eq!(aggregate.today.messages, 2);
        assert_eq!(aggregate.today.input_tokens, 500);
        assert_eq!(aggregate.today.total_tokens(), 500 + 100 + 20 + 10);
        assert!((aggregate.today.cost - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_huge_counts_saturate() {
        let usage = PiUsage {
            input: u64::MAX,
            output: u64::MAX - 1,
            cache_read: 7,
            cache_write: 0,
            cost: None,
        };
        let mut totals = UsageTotals::default();
        totals += &usage;
        totals += &usage;
        assert_eq!(totals.input_tokens, u64::MAX);
        assert_eq!(totals.output_tokens, u64::MAX);
        assert_eq!(totals.cache_read_tokens, 14);
        assert_eq!(totals.total_tokens(), u64::MAX);
        assert_eq!(totals.messages, 2);
    }

    #[tokio::test]
    async fn test_corrupt_counts_do_not_panic() {
        let dir = TempDir::new().unwrap();
        let sessions = dir.path().join("sessions");
        let big = u64::MAX - 5;
        write_session(
            &sessions,
            "proj",
            "s.jsonl",
            &[
                make_pi_entry("2025-03-02T09:00:00Z", "assistant", big, 1, None),
                make_pi_entry("2025-03-02T10:00:00Z", "assistant", big, 1, None),
            ],
        );

        let day_start = Utc.with_ymd_and_hms(2025, 3, 2, 0, 0, 0).unwrap();
        let aggregate = aggregate(&sessions, day_start).await;
        assert_eq!(aggregate.all_time.input_tokens, u64::MAX);
        assert_eq!(aggregate.today.total_tokens(), u64::MAX);
    }

    #[test]
    fn test_files_outside_project_dirs_ignored() {
        let dir = TempDir::new().unwrap();
        let sessions = dir.path().join("sessions");
        write_session(&sessions, "proj", "s.jsonl", &[]);
        std::fs::write(sessions.join("stray.jsonl"), "").unwrap();
        std::fs::write(sessions.join("proj").join("notes.txt"), "").unwrap();
        assert_eq!(session_files(&sessions).len(), 1);
    }

    #[tokio::test]
    async fn test_no_dir() {
        let aggregate = aggregate(Path::new("/tmp/nonexistent-pi-dir"), Utc::now()).await;
        assert_eq!(aggregate, Aggregate::default());
    }
}
