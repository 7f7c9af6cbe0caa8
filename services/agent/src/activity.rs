//! Append-only activity log (JSON lines).

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::error::StateError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub success: bool,

    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub details: serde_json::Value,
}

impl ActivityEntry {
    pub fn new(action: impl Into<String>, success: bool) -> Self {
        Self {
            timestamp: Utc::now(),
            action: action.into(),
            success,
            details: serde_json::Value::Null,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

pub struct ActivityLog {
    path: PathBuf,
}

impl ActivityLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, entry: &ActivityEntry) -> Result<(), StateError> {
        append_json_line(&self.path, entry).await
    }
}

/// Append one serialized value plus newline, creating parent directories.
pub(crate) async fn append_json_line<T: Serialize>(path: &Path, value: &T) -> Result<(), StateError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let mut line = serde_json::to_vec(value)?;
    line.push(b'\n');

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(&line).await?;
    file.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_append_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = ActivityLog::new(dir.path().join("logs/activity.jsonl"));

        log.append(&ActivityEntry::new("read_feed", true)).await.unwrap();
        log.append(
            &ActivityEntry::new("create_post", false)
                .with_details(serde_json::json!({"error": "rate limited"})),
        )
        .await
        .unwrap();

        let text = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(!lines[0].contains("details"));

        let second: ActivityEntry = serde_json::from_str(lines[1]).unwrap();
        assert!(!second.success);
        assert_eq!(second.details["error"], "rate limited");
    }
}
