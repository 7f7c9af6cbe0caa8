//! Reconciler (watchdog).
//!
//! One pass looks at every running instance and drives the population
//! toward exactly one healthy instance:
//!
//! - no instances: provision one
//! - one instance: replace it if stuck or dead, otherwise leave it
//! - several: keep the best one, kill the rest, and replace the keeper too
//!   if it is stuck or dead
//!
//! `Unknown` health never triggers a kill on its own. A pass never returns
//! an error; failures become [`WatchdogAction::Failed`].

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use warden_id::InstanceId;
use warden_reconcile::{select_keeper, HealthThresholds, KeeperReason};
use warden_sandbox::InstanceClient;

use crate::health::{HealthCheck, HealthMonitor};
use crate::migration::MigrationStateMachine;

/// What a reconcile pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchdogAction {
    /// Exactly one instance and nothing to do.
    Healthy,
    /// There were no instances and one was provisioned.
    Deployed,
    /// A stuck or dead instance was replaced.
    Recovered,
    /// Duplicates were killed and the keeper left running.
    Cleaned,
    Failed,
}

impl WatchdogAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            WatchdogAction::Healthy => "healthy",
            WatchdogAction::Deployed => "deployed",
            WatchdogAction::Recovered => "recovered",
            WatchdogAction::Cleaned => "cleaned",
            WatchdogAction::Failed => "failed",
        }
    }

    /// True when the pass changed the instance population.
    pub fn took_action(&self) -> bool {
        matches!(
            self,
            WatchdogAction::Deployed | WatchdogAction::Recovered | WatchdogAction::Cleaned
        )
    }
}

impl fmt::Display for WatchdogAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one reconcile pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchdogResult {
    pub action: WatchdogAction,

    /// The instance left running, if any.
    pub instance_id: Option<InstanceId>,

    /// Instances killed during the pass, in kill order.
    pub killed: Vec<InstanceId>,

    pub error: Option<String>,
}

impl WatchdogResult {
    fn new(action: WatchdogAction, instance_id: Option<InstanceId>) -> Self {
        Self {
            action,
            instance_id,
            killed: Vec::new(),
            error: None,
        }
    }

    fn failed(killed: Vec<InstanceId>, error: impl Into<String>) -> Self {
        Self {
            action: WatchdogAction::Failed,
            instance_id: None,
            killed,
            error: Some(error.into()),
        }
    }
}

pub struct Reconciler {
    client: Arc<dyn InstanceClient>,
    health: HealthMonitor,
    migrator: MigrationStateMachine,
    thresholds: HealthThresholds,
}

impl Reconciler {
    pub fn new(
        client: Arc<dyn InstanceClient>,
        health: HealthMonitor,
        migrator: MigrationStateMachine,
        thresholds: HealthThresholds,
    ) -> Self {
        Self {
            client,
            health,
            migrator,
            thresholds,
        }
    }

    pub fn migrator(&self) -> &MigrationStateMachine {
        &self.migrator
    }

    pub fn migrator_mut(&mut self) -> &mut MigrationStateMachine {
        &mut self.migrator
    }

    /// Run one reconcile pass.
    #[instrument(skip(self))]
    pub async fn reconcile(&mut self) -> WatchdogResult {
        let instances = match self.client.list().await {
            Ok(instances) => instances,
            Err(e) => {
                error!(error = %e, "Failed to list instances");
                return WatchdogResult::failed(Vec::new(), format!("failed to list instances: {}", e));
            }
        };

        info!(count = instances.len(), "Reconciling instances");

        let ids: Vec<InstanceId> = instances.into_iter().map(|i| i.instance_id).collect();
        let result = match ids.as_slice() {
            [] => self.reconcile_empty().await,
            [only] => self.reconcile_single(only).await,
            _ => self.reconcile_many(&ids).await,
        };

        info!(
            action = %result.action,
            instance_id = ?result.instance_id.as_ref().map(|id| id.as_str()),
            killed = result.killed.len(),
            error = ?result.error,
            "Reconcile pass complete"
        );
        result
    }

    async fn reconcile_empty(&mut self) -> WatchdogResult {
        warn!("No instances running, provisioning one");
        match self.migrator.provision().await {
            Ok(id) => WatchdogResult::new(WatchdogAction::Deployed, Some(id)),
            Err(e) => WatchdogResult::failed(Vec::new(), e.to_string()),
        }
    }

    async fn reconcile_single(&mut self, instance_id: &InstanceId) -> WatchdogResult {
        let check = self.health.classify(instance_id, &self.thresholds).await;

        if !check.status.warrants_replacement() {
            if check.error.is_some() {
                warn!(
                    instance_id = %instance_id,
                    status = %check.status,
                    error = ?check.error,
                    "Health unclear, leaving instance alone"
                );
            }
            return WatchdogResult::new(WatchdogAction::Healthy, Some(instance_id.clone()));
        }

        warn!(
            instance_id = %instance_id,
            status = %check.status,
            seconds_since_heartbeat = ?check.seconds_since_heartbeat,
            "Instance unhealthy, replacing"
        );

        let mut killed = Vec::new();
        self.kill_into(instance_id, &mut killed).await;
        self.replace(killed).await
    }

    async fn reconcile_many(&mut self, ids: &[InstanceId]) -> WatchdogResult {
        // Classify everything before killing anything.
        let mut checks: Vec<HealthCheck> = Vec::with_capacity(ids.len());
        for id in ids {
            checks.push(self.health.classify(id, &self.thresholds).await);
        }

        let Some(choice) = select_keeper(
            checks.as_slice(),
            |c: &HealthCheck| c.status,
            |c: &HealthCheck| c.age(),
        ) else {
            return self.reconcile_empty().await;
        };
        let keeper = &checks[choice.index];

        match choice.reason {
            KeeperReason::FreshestHealthy => info!(
                keeper = %keeper.instance_id,
                count = ids.len(),
                "Multiple instances running, keeping freshest healthy"
            ),
            KeeperReason::FirstListed => warn!(
                keeper = %keeper.instance_id,
                count = ids.len(),
                keeper_status = %keeper.status,
                "Multiple instances running and none healthy, keeping first listed"
            ),
        }

        let mut killed = Vec::new();
        for (index, check) in checks.iter().enumerate() {
            if index != choice.index {
                self.kill_into(&check.instance_id, &mut killed).await;
            }
        }

        if keeper.status.warrants_replacement() {
            warn!(
                instance_id = %keeper.instance_id,
                status = %keeper.status,
                "Keeper is unhealthy, replacing it too"
            );
            let keeper_id = keeper.instance_id.clone();
            self.kill_into(&keeper_id, &mut killed).await;
            return self.replace(killed).await;
        }

        WatchdogResult {
            action: WatchdogAction::Cleaned,
            instance_id: Some(keeper.instance_id.clone()),
            killed,
            error: None,
        }
    }

    /// Provision a replacement after kills; a failure keeps the kill list.
    async fn replace(&mut self, killed: Vec<InstanceId>) -> WatchdogResult {
        match self.migrator.provision().await {
            Ok(id) => WatchdogResult {
                action: WatchdogAction::Recovered,
                instance_id: Some(id),
                killed,
                error: None,
            },
            Err(e) => WatchdogResult::failed(killed, format!("failed to replace instance: {}", e)),
        }
    }

    async fn kill_into(&self, instance_id: &InstanceId, killed: &mut Vec<InstanceId>) {
        match self.client.kill(instance_id).await {
            Ok(true) => killed.push(instance_id.clone()),
            Ok(false) => info!(instance_id = %instance_id, "Instance already gone"),
            Err(e) => warn!(instance_id = %instance_id, error = %e, "Failed to kill instance"),
        }
    }
}
