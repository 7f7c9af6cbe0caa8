//! Sync audit log.
//!
//! One JSON line per terminal sync outcome. Lines are never rewritten.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::activity::append_json_line;
use crate::error::StateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Success,
    Failed,
    Skipped,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SyncStatus::Success => "success",
            SyncStatus::Failed => "failed",
            SyncStatus::Skipped => "skipped",
        })
    }
}

/// A queued request to commit and push some files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncEntry {
    pub files: Vec<String>,
    pub message: String,
}

impl SyncEntry {
    /// Duplicate paths are dropped, first occurrence wins.
    pub fn new<I, S>(files: I, message: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut unique: Vec<String> = Vec::new();
        for file in files {
            let file = file.into();
            if !unique.contains(&file) {
                unique.push(file);
            }
        }
        Self {
            files: unique,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResult {
    pub timestamp: DateTime<Utc>,
    pub files: Vec<String>,
    pub commit_hash: Option<String>,
    pub status: SyncStatus,
    pub duration_ms: f64,
    pub message: String,
    pub attempts: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct SyncTracker {
    path: PathBuf,
}

impl SyncTracker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn record(&self, result: &SyncResult) -> Result<(), StateError> {
        append_json_line(&self.path, result).await
    }

    /// The last `limit` results, oldest first. Unparsable lines are skipped.
    pub async fn recent(&self, limit: usize) -> Result<Vec<SyncResult>, StateError> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut results: Vec<SyncResult> = text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str(line) {
                Ok(result) => Some(result),
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "Skipping bad tracker line");
                    None
                }
            })
            .collect();

        let skip = results.len().saturating_sub(limit);
        results.drain(..skip);
        Ok(results)
    }
}
