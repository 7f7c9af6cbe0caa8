//! Heartbeat file writer.
//!
//! The worker rewrites its heartbeat on every cycle transition. The control
//! plane reads it from outside the instance to judge liveness, so the file
//! is replaced atomically and never left half-written.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::debug;
use warden_sandbox::HeartbeatRecord;

use crate::error::StateError;
use crate::state::write_atomic;

pub struct HeartbeatWriter {
    path: PathBuf,
    instance_id: Option<String>,
}

impl HeartbeatWriter {
    pub fn new(path: impl Into<PathBuf>, instance_id: Option<String>) -> Self {
        Self {
            path: path.into(),
            instance_id,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record that the worker is starting `action` now.
    pub async fn beat(&self, action: &str, cycle_count: u64) -> Result<(), StateError> {
        self.write_at(Utc::now(), action, cycle_count).await
    }

    pub async fn write_at(
        &self,
        at: DateTime<Utc>,
        action: &str,
        cycle_count: u64,
    ) -> Result<(), StateError> {
        let record = HeartbeatRecord::new(at, action, cycle_count, self.instance_id.clone());
        write_atomic(&self.path, &record.to_vec()?).await?;
        debug!(action, cycle_count, "Heartbeat written");
        Ok(())
    }
}
