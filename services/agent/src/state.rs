//! Worker state file.
//!
//! The state file survives restarts and migrations (it is committed by the
//! sync worker). Loading is forgiving: a missing or corrupt file yields
//! fresh state, and unknown keys are ignored.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::StateError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerState {
    pub cycle_count: u64,
    pub posts_today: u32,
    pub replies_today: u32,
    pub consecutive_failures: u32,

    /// UTC date the daily counters were last reset.
    pub last_reset_date: Option<NaiveDate>,

    /// Instance the worker last ran on.
    #[serde(alias = "current_sandbox_id")]
    pub current_instance_id: Option<String>,
}

impl WorkerState {
    /// Load from `path`. Missing or unreadable files give default state.
    pub async fn load(path: &Path) -> Self {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read state file, starting fresh");
                return Self::default();
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(state) => state,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Corrupt state file, starting fresh");
                Self::default()
            }
        }
    }

    /// Write to `path` atomically.
    pub async fn save(&self, path: &Path) -> Result<(), StateError> {
        let bytes = serde_json::to_vec_pretty(self)?;
        write_atomic(path, &bytes).await
    }

    /// Zero the daily counters if `today` differs from the last reset.
    pub fn reset_daily_if_needed(&mut self, today: NaiveDate) -> bool {
        if self.last_reset_date == Some(today) {
            return false;
        }
        info!(
            previous = ?self.last_reset_date,
            today = %today,
            "Resetting daily counters"
        );
        self.posts_today = 0;
        self.replies_today = 0;
        self.last_reset_date = Some(today);
        true
    }

    pub fn record_cycle(&mut self) {
        self.cycle_count += 1;
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    pub fn record_failure(&mut self) {
        self.consecutive_failures += 1;
    }

    pub fn record_post(&mut self) {
        self.posts_today += 1;
    }

    pub fn record_reply(&mut self) {
        self.replies_today += 1;
    }
}

/// Write via a sibling temp file and rename, so readers never see a
/// partial file.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StateError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let tmp = temp_path(path);
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let mut state = WorkerState::default();
        state.record_cycle();
        state.record_post();
        state.current_instance_id = Some("sb-1".into());
        state.reset_daily_if_needed(date("2026-03-01"));
        state.save(&path).await.unwrap();

        let loaded = WorkerState::load(&path).await;
        assert_eq!(loaded.cycle_count, 1);
        assert_eq!(loaded.current_instance_id.as_deref(), Some("sb-1"));
        assert_eq!(loaded.last_reset_date, Some(date("2026-03-01")));
        assert!(!dir.path().join("state.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let state = WorkerState::load(&dir.path().join("nope.json")).await;
        assert_eq!(state, WorkerState::default());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert_eq!(WorkerState::load(&path).await, WorkerState::default());
    }

    #[test]
    fn test_unknown_keys_ignored_and_legacy_alias() {
        let state: WorkerState = serde_json::from_str(
            r#"{"cycle_count": 5, "mood": "cheerful", "current_sandbox_id": "sb-9"}"#,
        )
        .unwrap();
        assert_eq!(state.cycle_count, 5);
        assert_eq!(state.current_instance_id.as_deref(), Some("sb-9"));
    }

    #[test]
    fn test_daily_reset() {
        let mut state = WorkerState {
            posts_today: 4,
            replies_today: 9,
            last_reset_date: Some(date("2026-03-01")),
            ..Default::default()
        };

        assert!(!state.reset_daily_if_needed(date("2026-03-01")));
        assert_eq!(state.posts_today, 4);

        assert!(state.reset_daily_if_needed(date("2026-03-02")));
        assert_eq!(state.posts_today, 0);
        assert_eq!(state.replies_today, 0);
        assert_eq!(state.last_reset_date, Some(date("2026-03-02")));
    }

    #[test]
    fn test_failure_streak() {
        let mut state = WorkerState::default();
        state.record_failure();
        state.record_failure();
        assert_eq!(state.consecutive_failures, 2);
        state.record_success();
        assert_eq!(state.consecutive_failures, 0);
    }
}
