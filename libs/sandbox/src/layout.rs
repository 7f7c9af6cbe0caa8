//! Well-known paths inside an instance and the heartbeat record format.
//!
//! Paths are relative to the agent's working directory unless noted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Liveness record rewritten by the agent on every cycle.
pub const HEARTBEAT_FILE: &str = "heartbeat.json";

/// Persisted worker counters.
pub const STATE_FILE: &str = "state.json";

/// Append-only JSON-lines activity log.
pub const ACTIVITY_LOG: &str = "logs/activity.jsonl";

/// Markdown audit table of operator and migration notes.
pub const OVERRIDES_FILE: &str = "governance/external_overrides.md";

/// JSON-lines audit of git sync attempts.
pub const SYNC_TRACKER_LOG: &str = "logs/git_tracker.jsonl";

/// Default agent working directory inside an instance.
pub const DEFAULT_WORKDIR: &str = "/home/user/agent";

/// Join a well-known relative path onto a working directory.
pub fn in_workdir(workdir: &str, relative: &str) -> String {
    format!("{}/{}", workdir.trim_end_matches('/'), relative)
}

/// Heartbeat as written by the agent.
///
/// Every field is optional on read. A record without a parsable timestamp
/// is treated as unknown health, never as dead.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatRecord {
    /// RFC 3339 time of the last write.
    #[serde(default)]
    pub timestamp: Option<String>,

    #[serde(default)]
    pub current_action: Option<String>,

    /// When the current action began.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_started_at: Option<String>,

    #[serde(default)]
    pub cycle_count: Option<u64>,

    #[serde(default, alias = "sandbox_id")]
    pub instance_id: Option<String>,
}

impl HeartbeatRecord {
    /// Build a record stamped at `now`.
    pub fn new(
        now: DateTime<Utc>,
        current_action: impl Into<String>,
        cycle_count: u64,
        instance_id: Option<String>,
    ) -> Self {
        let stamp = now.to_rfc3339();
        Self {
            timestamp: Some(stamp.clone()),
            current_action: Some(current_action.into()),
            action_started_at: Some(stamp),
            cycle_count: Some(cycle_count),
            instance_id,
        }
    }

    /// Parse raw file bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Serialize to pretty JSON.
    pub fn to_vec(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }

    /// The timestamp as a UTC instant, if present and well-formed.
    pub fn parsed_timestamp(&self) -> Option<DateTime<Utc>> {
        let raw = self.timestamp.as_deref()?;
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }
}
