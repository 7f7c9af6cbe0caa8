//! Operator queries and manual actions.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};
use warden_id::InstanceId;
use warden_reconcile::HealthThresholds;
use warden_sandbox::layout::{in_workdir, ACTIVITY_LOG, STATE_FILE};
use warden_sandbox::{ClientError, InstanceClient, InstanceInfo};

use crate::clock::Clock;
use crate::health::{HealthCheck, HealthMonitor};
use crate::notes;

/// Number of activity log lines returned by [`Operator::observe`].
pub const RECENT_ACTIVITY_LINES: usize = 5;

/// Result of killing one instance during `kill_all`.
#[derive(Debug, Clone, Serialize)]
pub struct KillOutcome {
    pub instance_id: InstanceId,
    pub killed: bool,
    pub error: Option<String>,
}

/// Everything `observe` can learn about an instance.
#[derive(Debug, Clone, Serialize)]
pub struct Observation {
    pub health: HealthCheck,

    /// Worker state file contents, if readable.
    pub state: Option<serde_json::Value>,
    pub state_error: Option<String>,

    /// Most recent activity entries, oldest first.
    pub recent_activity: Vec<serde_json::Value>,
}

pub struct Operator {
    client: Arc<dyn InstanceClient>,
    health: HealthMonitor,
    clock: Arc<dyn Clock>,
    workdir: String,
}

impl Operator {
    pub fn new(
        client: Arc<dyn InstanceClient>,
        health: HealthMonitor,
        clock: Arc<dyn Clock>,
        workdir: impl Into<String>,
    ) -> Self {
        Self {
            client,
            health,
            clock,
            workdir: workdir.into(),
        }
    }

    pub async fn list(&self) -> Result<Vec<InstanceInfo>, ClientError> {
        self.client.list().await
    }

    pub async fn kill(&self, instance_id: &InstanceId) -> Result<bool, ClientError> {
        self.client.kill(instance_id).await
    }

    /// Kill every running instance. Individual failures are reported, not
    /// propagated.
    pub async fn kill_all(&self) -> Result<Vec<KillOutcome>, ClientError> {
        let instances = self.client.list().await?;
        let mut outcomes = Vec::with_capacity(instances.len());

        for info in instances {
            let outcome = match self.client.kill(&info.instance_id).await {
                Ok(killed) => KillOutcome {
                    instance_id: info.instance_id,
                    killed,
                    error: None,
                },
                Err(e) => {
                    warn!(instance_id = %info.instance_id, error = %e, "Failed to kill instance");
                    KillOutcome {
                        instance_id: info.instance_id,
                        killed: false,
                        error: Some(e.to_string()),
                    }
                }
            };
            outcomes.push(outcome);
        }

        info!(
            count = outcomes.iter().filter(|o| o.killed).count(),
            "Killed all instances"
        );
        Ok(outcomes)
    }

    /// Health, worker state and recent activity for one instance.
    pub async fn observe(&self, instance_id: &InstanceId) -> Observation {
        let health = self
            .health
            .classify(instance_id, &HealthThresholds::default())
            .await;

        let (state, state_error) = match self.read(instance_id, STATE_FILE).await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(value) => (Some(value), None),
                Err(e) => (None, Some(format!("invalid state JSON: {}", e))),
            },
            Err(e) => (None, Some(e.to_string())),
        };

        let recent_activity = match self.read(instance_id, ACTIVITY_LOG).await {
            Ok(bytes) => tail_json_lines(&bytes, RECENT_ACTIVITY_LINES),
            Err(_) => Vec::new(),
        };

        Observation {
            health,
            state,
            state_error,
            recent_activity,
        }
    }

    /// Append an operator note to the instance's override log.
    pub async fn note(&self, instance_id: &InstanceId, text: &str) -> Result<(), ClientError> {
        notes::append_note(
            self.client.as_ref(),
            instance_id,
            &self.workdir,
            self.clock.now(),
            text,
        )
        .await
    }

    async fn read(&self, instance_id: &InstanceId, relative: &str) -> Result<Vec<u8>, ClientError> {
        self.client
            .read_file(instance_id, &in_workdir(&self.workdir, relative))
            .await
    }
}

/// Parse the last `n` non-empty lines as JSON, skipping malformed ones.
pub fn tail_json_lines(bytes: &[u8], n: usize) -> Vec<serde_json::Value> {
    let text = String::from_utf8_lossy(bytes);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(n);
    lines[start..]
        .iter()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect()
}
