//! Instance client interface.
//!
//! The control plane never caches instance handles. Every operation goes
//! back to the provisioning service by ID, so an instance that expired on
//! its own looks exactly like one that was killed.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use warden_id::{InstanceId, TemplateId};

use crate::error::ClientError;

/// Environment variables passed to a command.
pub type CommandEnv = BTreeMap<String, String>;

/// Summary of a running instance as reported by the provisioning service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub instance_id: InstanceId,

    #[serde(default)]
    pub template_id: Option<TemplateId>,

    /// Creation time as reported by the provider.
    #[serde(default)]
    pub started_at: Option<String>,

    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl InstanceInfo {
    /// Info for an instance with no creation metadata.
    pub fn bare(instance_id: InstanceId) -> Self {
        Self {
            instance_id,
            template_id: None,
            started_at: None,
            metadata: BTreeMap::new(),
        }
    }
}

/// Remote instance operations consumed by the control plane.
#[async_trait]
pub trait InstanceClient: Send + Sync {
    /// Provision a new instance.
    async fn create(&self) -> Result<InstanceId, ClientError>;

    /// List running instances in provider order.
    async fn list(&self) -> Result<Vec<InstanceInfo>, ClientError>;

    /// Kill an instance. Returns false if it was already gone.
    async fn kill(&self, instance_id: &InstanceId) -> Result<bool, ClientError>;

    /// Whether the provider still reports the instance as running.
    async fn is_running(&self, instance_id: &InstanceId) -> Result<bool, ClientError>;

    /// Read a file inside an instance.
    async fn read_file(&self, instance_id: &InstanceId, path: &str)
        -> Result<Vec<u8>, ClientError>;

    /// Overwrite a file inside an instance.
    async fn write_file(
        &self,
        instance_id: &InstanceId,
        path: &str,
        contents: &[u8],
    ) -> Result<(), ClientError>;

    /// Run a shell command and wait for it. Non-zero exit is
    /// [`ClientError::CommandFailed`].
    async fn run_command(
        &self,
        instance_id: &InstanceId,
        command: &str,
        env: &CommandEnv,
        timeout: Duration,
    ) -> Result<String, ClientError>;

    /// Start a shell command and return as soon as it is accepted.
    async fn start_background_command(
        &self,
        instance_id: &InstanceId,
        command: &str,
        env: &CommandEnv,
    ) -> Result<(), ClientError>;
}
