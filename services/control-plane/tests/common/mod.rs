#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use warden_control_plane::{
    Clock, DeployTarget, HealthMonitor, ManualClock, MigrationConfig, MigrationStateMachine,
    Reconciler,
};
use warden_reconcile::HealthThresholds;
use warden_sandbox::layout::DEFAULT_WORKDIR;
use warden_sandbox::{CommandEnv, FakeInstanceClient};

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

pub fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

pub fn target() -> DeployTarget {
    DeployTarget {
        repo_url: "https://github.com/acme/brain.git".to_string(),
        git_token: "tok".to_string(),
        branch: "main".to_string(),
        workdir: DEFAULT_WORKDIR.to_string(),
        setup_commands: vec!["pip install -q -r requirements.txt".to_string()],
        start_command: "python -m agent.main".to_string(),
        env: CommandEnv::new(),
    }
}

pub struct Harness {
    pub fake: Arc<FakeInstanceClient>,
    pub clock: Arc<ManualClock>,
    pub health: HealthMonitor,
}

impl Harness {
    pub fn new() -> Self {
        let fake = Arc::new(FakeInstanceClient::new());
        fake.set_now(start_time());
        let clock = Arc::new(ManualClock::new(start_time()));
        let health = HealthMonitor::new(fake.clone(), clock.clone(), DEFAULT_WORKDIR);
        Self {
            fake,
            clock,
            health,
        }
    }

    pub fn migrator(&self, config: MigrationConfig) -> MigrationStateMachine {
        let clock: Arc<dyn Clock> = self.clock.clone();
        MigrationStateMachine::new(
            self.fake.clone(),
            self.health.clone(),
            clock,
            target(),
            config,
        )
    }

    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(
            self.fake.clone(),
            self.health.clone(),
            self.migrator(MigrationConfig::default()),
            HealthThresholds::default(),
        )
    }

    /// Add an instance whose heartbeat is `age_secs` old.
    pub fn instance(&self, id: &str, age_secs: u64) -> warden_id::InstanceId {
        let id = self.fake.add_instance(id);
        self.fake.set_heartbeat_age(&id, secs(age_secs));
        id
    }

    pub fn ids(&self) -> Vec<String> {
        self.fake
            .instance_ids()
            .into_iter()
            .map(|id| id.to_string())
            .collect()
    }
}
