//! Migration state machine.
//!
//! Moves the worker from one instance to a fresh one:
//!
//! ```text
//! Idle -> Creating -> Deploying -> Verifying -> Retiring -> Done
//!            |            |            |
//!            +------------+------------+--> Failed
//! ```
//!
//! A migration that fails after creating its successor always kills the
//! successor again, so a failed migration leaves the instance population as
//! it found it. The predecessor is only touched once the successor has been
//! verified healthy.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use warden_id::InstanceId;
use warden_reconcile::{DailyBudget, HealthStatus, HealthThresholds};
use warden_sandbox::shell::{authenticated_url, quote, redact};
use warden_sandbox::{ClientError, CommandEnv, CommandExecutor, InstanceClient, RemoteExecutor};

use crate::clock::Clock;
use crate::health::HealthMonitor;
use crate::notes;

/// Where the deploy script is written inside a new instance.
pub const DEPLOY_SCRIPT_PATH: &str = "/tmp/warden-deploy.sh";

/// Migration phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationPhase {
    Idle,
    Creating,
    Deploying,
    Verifying,
    Retiring,
    Done,
    Failed,
}

impl MigrationPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationPhase::Idle => "idle",
            MigrationPhase::Creating => "creating",
            MigrationPhase::Deploying => "deploying",
            MigrationPhase::Verifying => "verifying",
            MigrationPhase::Retiring => "retiring",
            MigrationPhase::Done => "done",
            MigrationPhase::Failed => "failed",
        }
    }
}

impl fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a migration or provision attempt stopped.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("daily migration limit reached ({used}/{max})")]
    DailyLimit { used: u32, max: u32 },

    #[error("too many instances running ({running}/{max})")]
    TooManyInstances { running: usize, max: usize },

    #[error("failed to list instances: {0}")]
    List(#[source] ClientError),

    #[error("failed to create instance: {0}")]
    Create(#[source] ClientError),

    #[error("failed to deploy to {instance_id}: {reason}")]
    Deploy {
        instance_id: InstanceId,
        reason: String,
    },

    #[error("{instance_id} not healthy after {timeout:?} (last status: {last_status})")]
    Verify {
        instance_id: InstanceId,
        timeout: Duration,
        last_status: HealthStatus,
    },
}

impl MigrationError {
    /// The successor instance this error happened on, if one was created.
    pub fn new_instance_id(&self) -> Option<&InstanceId> {
        match self {
            MigrationError::Deploy { instance_id, .. }
            | MigrationError::Verify { instance_id, .. } => Some(instance_id),
            _ => None,
        }
    }
}

/// Outcome of [`MigrationStateMachine::migrate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationResult {
    pub migration_id: Uuid,
    pub success: bool,
    pub old_instance_id: InstanceId,
    pub new_instance_id: Option<InstanceId>,
    pub duration_ms: u64,
    pub error: Option<String>,

    /// Last phase reached: `Done` on success, `Failed` otherwise.
    pub phase: MigrationPhase,
}

impl MigrationResult {
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

/// What gets deployed onto a fresh instance.
#[derive(Debug, Clone)]
pub struct DeployTarget {
    pub repo_url: String,
    pub git_token: String,
    pub branch: String,

    /// Checkout directory inside the instance.
    pub workdir: String,

    /// Run in `workdir` after checkout, in order.
    pub setup_commands: Vec<String>,

    /// Long-running worker command, started detached from `workdir`.
    pub start_command: String,

    /// Environment for setup and the worker.
    pub env: CommandEnv,
}

impl DeployTarget {
    /// Shell script that checks out the repository and runs setup.
    pub fn deploy_script(&self) -> String {
        let workdir = quote(&self.workdir);
        let branch = quote(&self.branch);
        let url = quote(&authenticated_url(&self.repo_url, &self.git_token));

        let mut script = String::from("#!/bin/sh\nset -e\n");
        script.push_str(&format!(
            "if [ -d {workdir}/.git ]; then\n  \
             git -C {workdir} fetch -q origin {branch}\n  \
             git -C {workdir} reset -q --hard origin/{branch}\n\
             else\n  \
             git clone -q --branch {branch} {url} {workdir}\n\
             fi\n"
        ));
        script.push_str(&format!("cd {workdir}\nmkdir -p logs\n"));
        for command in &self.setup_commands {
            script.push_str(command);
            script.push('\n');
        }
        script
    }

    /// Command line that starts the worker in the background.
    pub fn start_line(&self) -> String {
        format!(
            "cd {} && nohup {} >> logs/worker.log 2>&1 &",
            quote(&self.workdir),
            self.start_command
        )
    }
}

/// Safety limits and timings.
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    pub max_migrations_per_day: u32,
    pub max_concurrent_instances: usize,
    pub verify_timeout: Duration,
    pub verify_poll_interval: Duration,
    pub deploy_timeout: Duration,
    pub thresholds: HealthThresholds,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            max_migrations_per_day: warden_reconcile::DEFAULT_MAX_MIGRATIONS_PER_DAY,
            max_concurrent_instances: warden_reconcile::DEFAULT_MAX_CONCURRENT_INSTANCES,
            verify_timeout: warden_reconcile::DEFAULT_VERIFY_TIMEOUT,
            verify_poll_interval: warden_reconcile::DEFAULT_VERIFY_POLL_INTERVAL,
            deploy_timeout: Duration::from_secs(300),
            thresholds: HealthThresholds::default(),
        }
    }
}

/// Persistable view of the daily counter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetSnapshot {
    pub migrations_today: u32,
    pub last_migration_date: Option<NaiveDate>,
}

/// Drives migrations and provisioning.
pub struct MigrationStateMachine {
    client: Arc<dyn InstanceClient>,
    health: HealthMonitor,
    clock: Arc<dyn Clock>,
    target: DeployTarget,
    config: MigrationConfig,
    budget: DailyBudget,
    phase: MigrationPhase,
}

impl MigrationStateMachine {
    pub fn new(
        client: Arc<dyn InstanceClient>,
        health: HealthMonitor,
        clock: Arc<dyn Clock>,
        target: DeployTarget,
        config: MigrationConfig,
    ) -> Self {
        Self {
            budget: DailyBudget::new(config.max_migrations_per_day),
            client,
            health,
            clock,
            target,
            config,
            phase: MigrationPhase::Idle,
        }
    }

    pub fn phase(&self) -> MigrationPhase {
        self.phase
    }

    pub fn migrations_today(&self) -> u32 {
        self.budget.used()
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    pub fn budget_snapshot(&self) -> BudgetSnapshot {
        BudgetSnapshot {
            migrations_today: self.budget.used(),
            last_migration_date: self.budget.day(),
        }
    }

    /// Resume the daily counter from a previous process.
    pub fn restore_budget(&mut self, snapshot: &BudgetSnapshot) {
        self.budget
            .restore(snapshot.migrations_today, snapshot.last_migration_date);
    }

    /// Replace `old_instance_id` with a freshly deployed, verified instance.
    #[instrument(skip(self), fields(old_instance_id = %old_instance_id))]
    pub async fn migrate(&mut self, old_instance_id: &InstanceId) -> MigrationResult {
        let started = Instant::now();
        let migration_id = Uuid::new_v4();
        self.phase = MigrationPhase::Idle;

        info!(migration_id = %migration_id, "Starting migration");

        let today = self.clock.now().date_naive();
        if let Err(e) = self.check_limits(today).await {
            return self.finish(migration_id, old_instance_id, None, started, Err(e));
        }

        let new_instance_id = match self.provision().await {
            Ok(id) => id,
            Err(e) => {
                let new_id = e.new_instance_id().cloned();
                return self.finish(migration_id, old_instance_id, new_id, started, Err(e));
            }
        };

        self.phase = MigrationPhase::Verifying;
        if let Err(e) = self.verify(&new_instance_id).await {
            self.discard(&new_instance_id).await;
            return self.finish(
                migration_id,
                old_instance_id,
                Some(new_instance_id),
                started,
                Err(e),
            );
        }

        self.phase = MigrationPhase::Retiring;
        let ordinal = self.budget.used() + 1;
        self.retire(old_instance_id, &new_instance_id, ordinal).await;

        self.budget.record(today);
        self.finish(
            migration_id,
            old_instance_id,
            Some(new_instance_id),
            started,
            Ok(()),
        )
    }

    /// Create a new instance and deploy the worker to it, without
    /// verification. A deploy failure kills the new instance.
    #[instrument(skip(self))]
    pub async fn provision(&mut self) -> Result<InstanceId, MigrationError> {
        self.phase = MigrationPhase::Creating;
        let instance_id = match self.client.create().await {
            Ok(id) => id,
            Err(e) => {
                self.phase = MigrationPhase::Failed;
                error!(error = %e, "Failed to create instance");
                return Err(MigrationError::Create(e));
            }
        };

        self.phase = MigrationPhase::Deploying;
        if let Err(reason) = self.deploy(&instance_id).await {
            self.phase = MigrationPhase::Failed;
            error!(instance_id = %instance_id, error = %reason, "Deploy failed");
            self.discard(&instance_id).await;
            return Err(MigrationError::Deploy {
                instance_id,
                reason,
            });
        }

        info!(instance_id = %instance_id, "Instance provisioned");
        Ok(instance_id)
    }

    /// Kill every listed instance except `keep`. Returns what was killed.
    #[instrument(skip(self), fields(keep = %keep))]
    pub async fn cleanup_orphans(&self, keep: &InstanceId) -> Result<Vec<InstanceId>, ClientError> {
        let mut killed = Vec::new();
        for info in self.client.list().await? {
            if &info.instance_id == keep {
                continue;
            }
            match self.client.kill(&info.instance_id).await {
                Ok(true) => killed.push(info.instance_id),
                Ok(false) => {}
                Err(e) => {
                    warn!(instance_id = %info.instance_id, error = %e, "Failed to kill orphan");
                }
            }
        }
        if !killed.is_empty() {
            info!(count = killed.len(), "Cleaned up orphan instances");
        }
        Ok(killed)
    }

    async fn check_limits(&mut self, today: NaiveDate) -> Result<(), MigrationError> {
        if !self.budget.has_capacity(today) {
            warn!(
                used = self.budget.used(),
                max = self.budget.max_per_day(),
                "Daily migration limit reached"
            );
            return Err(MigrationError::DailyLimit {
                used: self.budget.used(),
                max: self.budget.max_per_day(),
            });
        }

        let running = self
            .client
            .list()
            .await
            .map_err(MigrationError::List)?
            .len();
        if running >= self.config.max_concurrent_instances {
            warn!(
                running,
                max = self.config.max_concurrent_instances,
                "Too many instances running"
            );
            return Err(MigrationError::TooManyInstances {
                running,
                max: self.config.max_concurrent_instances,
            });
        }
        Ok(())
    }

    async fn deploy(&self, instance_id: &InstanceId) -> Result<(), String> {
        let token = self.target.git_token.as_str();
        // A successor is always a fresh remote instance.
        let executor: Arc<dyn CommandExecutor> =
            Arc::new(RemoteExecutor::new(self.client.clone(), instance_id.clone()));

        executor
            .write_file(DEPLOY_SCRIPT_PATH, self.target.deploy_script().as_bytes())
            .await
            .map_err(|e| redact(&format!("writing deploy script: {}", e), token))?;

        let output = executor
            .run(
                &format!("sh {}", quote(DEPLOY_SCRIPT_PATH)),
                &self.target.env,
                self.config.deploy_timeout,
            )
            .await
            .map_err(|e| redact(&format!("running deploy script: {}", e), token))?;
        if !output.success() {
            return Err(redact(
                &format!(
                    "deploy script exited with {}: {}",
                    output.exit_code,
                    output.stderr.trim()
                ),
                token,
            ));
        }

        executor
            .spawn_detached(&self.target.start_line(), &self.target.env)
            .await
            .map_err(|e| redact(&format!("starting worker: {}", e), token))?;

        info!(
            instance_id = %instance_id,
            executor = %executor.describe(),
            "Worker deployed"
        );
        Ok(())
    }

    async fn verify(&self, instance_id: &InstanceId) -> Result<(), MigrationError> {
        let started = Instant::now();
        let mut last_status = HealthStatus::Unknown;

        loop {
            let check = self.health.classify(instance_id, &self.config.thresholds).await;
            if check.status.is_healthy() {
                info!(
                    instance_id = %instance_id,
                    elapsed_secs = started.elapsed().as_secs(),
                    "New instance verified healthy"
                );
                return Ok(());
            }
            last_status = check.status;

            if started.elapsed() >= self.config.verify_timeout {
                break;
            }
            tokio::time::sleep(self.config.verify_poll_interval).await;
        }

        warn!(
            instance_id = %instance_id,
            last_status = %last_status,
            "New instance failed verification"
        );
        Err(MigrationError::Verify {
            instance_id: instance_id.clone(),
            timeout: self.config.verify_timeout,
            last_status,
        })
    }

    async fn retire(&self, old: &InstanceId, successor: &InstanceId, ordinal: u32) {
        let note = format!(
            "Migration: shutting down in favor of successor {} (migration #{})",
            successor, ordinal
        );
        if let Err(e) =
            notes::append_note(self.client.as_ref(), old, &self.target.workdir, self.clock.now(), &note)
                .await
        {
            warn!(instance_id = %old, error = %e, "Failed to write retirement note");
        }

        match self.client.kill(old).await {
            Ok(true) => info!(instance_id = %old, "Old instance retired"),
            Ok(false) => warn!(instance_id = %old, "Old instance was already gone"),
            Err(e) => warn!(instance_id = %old, error = %e, "Failed to kill old instance"),
        }
    }

    /// Kill an instance created by a failed attempt.
    async fn discard(&self, instance_id: &InstanceId) {
        if let Err(e) = self.client.kill(instance_id).await {
            error!(
                instance_id = %instance_id,
                error = %e,
                "Failed to clean up new instance"
            );
        }
    }

    fn finish(
        &mut self,
        migration_id: Uuid,
        old_instance_id: &InstanceId,
        new_instance_id: Option<InstanceId>,
        started: Instant,
        outcome: Result<(), MigrationError>,
    ) -> MigrationResult {
        let duration_ms = started.elapsed().as_millis() as u64;
        let (success, error) = match outcome {
            Ok(()) => {
                self.phase = MigrationPhase::Done;
                info!(
                    migration_id = %migration_id,
                    new_instance_id = ?new_instance_id.as_ref().map(|id| id.as_str()),
                    duration_ms,
                    migrations_today = self.budget.used(),
                    "Migration complete"
                );
                (true, None)
            }
            Err(e) => {
                self.phase = MigrationPhase::Failed;
                error!(migration_id = %migration_id, error = %e, "Migration failed");
                (false, Some(e.to_string()))
            }
        };

        MigrationResult {
            migration_id,
            success,
            old_instance_id: old_instance_id.clone(),
            new_instance_id,
            duration_ms,
            error,
            phase: self.phase,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> DeployTarget {
        DeployTarget {
            repo_url: "https://github.com/acme/brain.git".to_string(),
            git_token: "secret-token".to_string(),
            branch: "main".to_string(),
            workdir: "/home/user/agent".to_string(),
            setup_commands: vec!["pip install -q -r requirements.txt".to_string()],
            start_command: "python -m agent.main".to_string(),
            env: CommandEnv::new(),
        }
    }

    #[test]
    fn test_deploy_script_clones_with_token_and_runs_setup() {
        let script = target().deploy_script();
        assert!(script.starts_with("#!/bin/sh\nset -e\n"));
        assert!(script.contains(
            "git clone -q --branch main 'https://secret-token@github.com/acme/brain.git' /home/user/agent"
        ));
        assert!(script.contains("cd /home/user/agent\nmkdir -p logs\npip install"));
    }

    #[test]
    fn test_start_line_is_backgrounded() {
        let line = target().start_line();
        assert!(line.starts_with("cd /home/user/agent && nohup python -m agent.main"));
        assert!(line.ends_with('&'));
    }

    #[test]
    fn test_error_new_instance_id() {
        let id = InstanceId::parse("sb-new-1").unwrap();
        let err = MigrationError::Deploy {
            instance_id: id.clone(),
            reason: "boom".into(),
        };
        assert_eq!(err.new_instance_id(), Some(&id));
        assert_eq!(
            MigrationError::DailyLimit { used: 10, max: 10 }.to_string(),
            "daily migration limit reached (10/10)"
        );
    }
}
