//! Health monitor.
//!
//! Classifies an instance from the heartbeat file its worker rewrites every
//! cycle. Classification never kills anything and never retries; an
//! ambiguous answer is `Unknown`, which callers must treat as "leave it
//! alone".

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use warden_id::InstanceId;
use warden_reconcile::{HealthStatus, HealthThresholds};
use warden_sandbox::layout::{in_workdir, HEARTBEAT_FILE};
use warden_sandbox::{HeartbeatRecord, InstanceClient};

use crate::clock::Clock;

/// Outcome of one health classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub instance_id: InstanceId,
    pub status: HealthStatus,

    /// Raw timestamp string from the heartbeat file.
    pub last_heartbeat: Option<String>,

    pub current_action: Option<String>,

    pub seconds_since_heartbeat: Option<f64>,

    pub error: Option<String>,
}

impl HealthCheck {
    fn unknown(instance_id: &InstanceId, error: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.clone(),
            status: HealthStatus::Unknown,
            last_heartbeat: None,
            current_action: None,
            seconds_since_heartbeat: None,
            error: Some(error.into()),
        }
    }

    /// Heartbeat age, if one was measured.
    pub fn age(&self) -> Option<Duration> {
        self.seconds_since_heartbeat.map(Duration::from_secs_f64)
    }
}

/// Reads heartbeats through an [`InstanceClient`].
#[derive(Clone)]
pub struct HealthMonitor {
    client: Arc<dyn InstanceClient>,
    clock: Arc<dyn Clock>,
    heartbeat_path: String,
}

impl HealthMonitor {
    /// `workdir` is the worker's directory inside the instance.
    pub fn new(client: Arc<dyn InstanceClient>, clock: Arc<dyn Clock>, workdir: &str) -> Self {
        Self {
            client,
            clock,
            heartbeat_path: in_workdir(workdir, HEARTBEAT_FILE),
        }
    }

    pub fn heartbeat_path(&self) -> &str {
        &self.heartbeat_path
    }

    /// Classify one instance.
    #[instrument(skip(self, thresholds), fields(instance_id = %instance_id))]
    pub async fn classify(
        &self,
        instance_id: &InstanceId,
        thresholds: &HealthThresholds,
    ) -> HealthCheck {
        let bytes = match self.client.read_file(instance_id, &self.heartbeat_path).await {
            Ok(bytes) => bytes,
            Err(read_err) => return self.classify_unreadable(instance_id, read_err).await,
        };

        let record = match HeartbeatRecord::from_slice(&bytes) {
            Ok(record) => record,
            Err(e) => {
                return HealthCheck::unknown(instance_id, format!("invalid heartbeat JSON: {}", e))
            }
        };

        let Some(timestamp) = record.parsed_timestamp() else {
            let error = match &record.timestamp {
                None => "no timestamp in heartbeat".to_string(),
                Some(raw) => format!("invalid timestamp format: {}", raw),
            };
            return HealthCheck {
                current_action: record.current_action,
                ..HealthCheck::unknown(instance_id, error)
            };
        };

        // A timestamp ahead of our clock counts as brand new.
        let age = (self.clock.now() - timestamp)
            .to_std()
            .unwrap_or(Duration::ZERO);
        let status = thresholds.classify(age);

        debug!(
            status = %status,
            age_secs = age.as_secs(),
            "Classified instance"
        );

        HealthCheck {
            instance_id: instance_id.clone(),
            status,
            last_heartbeat: record.timestamp,
            current_action: record.current_action,
            seconds_since_heartbeat: Some(age.as_secs_f64()),
            error: None,
        }
    }

    async fn classify_unreadable(
        &self,
        instance_id: &InstanceId,
        read_err: warden_sandbox::ClientError,
    ) -> HealthCheck {
        match self.client.is_running(instance_id).await {
            Ok(true) => HealthCheck::unknown(
                instance_id,
                format!("instance alive but heartbeat unreadable: {}", read_err),
            ),
            Ok(false) => HealthCheck {
                status: HealthStatus::Dead,
                ..HealthCheck::unknown(instance_id, read_err.to_string())
            },
            // Can't tell whether it is alive; report what we know.
            Err(e) => HealthCheck::unknown(
                instance_id,
                format!("heartbeat unreadable ({}); liveness check failed: {}", read_err, e),
            ),
        }
    }
}
