use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Success,
    Fail,
}

/// One immutable audit record of a forward attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub time: String,
    pub command: String,
    pub from_chat: i64,
    pub to_chat: i64,
    pub text: String,
    pub status: LogStatus,
    #[serde(default)]
    pub error: String,
}

impl LogEntry {
    pub fn success(command: &str, from_chat: i64, text: &str, to_chat: i64) -> Self {
        Self::new(command, from_chat, text, to_chat, LogStatus::Success, "")
    }

    pub fn failure(command: &str, from_chat: i64, text: &str, to_chat: i64, error: &str) -> Self {
        Self::new(command, from_chat, text, to_chat, LogStatus::Fail, error)
    }

    fn new(
        command: &str,
        from_chat: i64,
        text: &str,
        to_chat: i64,
        status: LogStatus,
        error: &str,
    ) -> Self {
        Self {
            time: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            command: command.to_string(),
            from_chat,
            to_chat,
            text: text.to_string(),
            status,
            error: error.to_string(),
        }
    }
}

/// Append-only forward log, one JSON object per line.
///
/// Appends are serialized so each entry lands as one contiguous write;
/// reads are bounded by the caller's limit and never block appenders for
/// longer than one entry.
pub struct ActivityLog {
    path: PathBuf,
    append_lock: Mutex<()>,
}

impl ActivityLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            append_lock: Mutex::new(()),
        }
    }

    /// Append one entry as a single complete line.
    pub async fn append(&self, entry: &LogEntry) -> Result<()> {
        let mut line = serde_json::to_string(entry).context("Failed to serialize log entry")?;
        line.push('\n');

        let _guard = self.append_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open log file: {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .await
            .with_context(|| format!("Failed to append to {}", self.path.display()))?;
        file.flush().await?;
        Ok(())
    }

    /// Up to `limit` most recent entries, newest first. Empty if no log file
    /// exists yet. Lines that fail to parse are skipped with a warning so a
    /// single damaged line never hides the rest of the log.
    pub async fn recent(&self, limit: usize) -> Result<Vec<LogEntry>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to read log file: {}", self.path.display())
                })
            }
        };

        let mut entries: Vec<LogEntry> = content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str(line) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Skipping unparseable log line: {e}");
                    None
                }
            })
            .collect();

        if entries.len() > limit {
            entries.drain(..entries.len() - limit);
        }
        entries.reverse();
        Ok(entries)
    }
}
