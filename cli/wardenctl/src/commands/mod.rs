//! CLI commands.

mod instances;
mod kill;
mod migrate;
mod note;
mod observe;
mod reconcile;
mod status;
mod watch;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use warden_control_plane::{
    Clock, Config, HealthMonitor, MigrationStateMachine, Operator, Reconciler, SystemClock,
};
use warden_id::InstanceId;
use warden_sandbox::{HttpInstanceClient, InstanceClient};

use crate::budget::BudgetStore;
use crate::logging::{self, LogStyle};
use crate::output::OutputFormat;

/// wardenctl - keep exactly one healthy worker instance running.
#[derive(Debug, Parser)]
#[command(name = "wardenctl")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Output format (table or json).
    #[arg(long, global = true, default_value = "table")]
    format: String,

    /// File holding the daily migration counter between runs.
    #[arg(long, global = true, env = "WARDEN_BUDGET_FILE")]
    budget_file: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List running instances.
    Instances(instances::InstancesCommand),

    /// Kill one instance, or all of them.
    Kill(kill::KillCommand),

    /// Show health, worker state and recent activity for an instance.
    Observe(observe::ObserveCommand),

    /// Append an operator note to an instance's override log.
    Note(note::NoteCommand),

    /// Run one reconcile pass.
    ///
    /// Exit codes: 0 healthy, 3 corrective action taken, 1 failed,
    /// 2 configuration error.
    Reconcile(reconcile::ReconcileCommand),

    /// Replace an instance with a freshly deployed successor.
    Migrate(migrate::MigrateCommand),

    /// Reconcile periodically until interrupted.
    Watch(watch::WatchCommand),

    /// Show the local worker state file and recent syncs.
    Status(status::StatusCommand),

    /// Show CLI version.
    Version,
}

impl Cli {
    /// Run the CLI command.
    pub async fn run(self) -> Result<ExitCode> {
        let format = OutputFormat::parse(&self.format);

        let style = match self.command {
            Commands::Watch(_) => LogStyle::Json,
            _ => LogStyle::Compact,
        };
        let config = Config::from_env();
        let level = config
            .as_ref()
            .map(|c| c.log_level.clone())
            .unwrap_or_else(|_| "info".to_string());
        logging::init(&level, style);

        let ctx = CommandContext {
            config: config?,
            format,
            budget_file: self.budget_file,
        };

        match self.command {
            Commands::Instances(cmd) => cmd.run(ctx).await,
            Commands::Kill(cmd) => cmd.run(ctx).await,
            Commands::Observe(cmd) => cmd.run(ctx).await,
            Commands::Note(cmd) => cmd.run(ctx).await,
            Commands::Reconcile(cmd) => cmd.run(ctx).await,
            Commands::Migrate(cmd) => cmd.run(ctx).await,
            Commands::Watch(cmd) => cmd.run(ctx).await,
            Commands::Status(cmd) => cmd.run(ctx).await,
            Commands::Version => {
                println!("wardenctl {}", env!("CARGO_PKG_VERSION"));
                Ok(ExitCode::SUCCESS)
            }
        }
    }
}

/// Shared command context.
pub struct CommandContext {
    pub config: Config,
    pub format: OutputFormat,
    budget_file: Option<String>,
}

impl CommandContext {
    /// Client for the provisioning service.
    pub fn client(&self) -> Result<Arc<dyn InstanceClient>> {
        let client = HttpInstanceClient::new(self.config.client_config()?)
            .context("failed to build instance client")?;
        Ok(Arc::new(client))
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::new(SystemClock)
    }

    pub fn health(&self, client: Arc<dyn InstanceClient>) -> HealthMonitor {
        HealthMonitor::new(client, self.clock(), &self.config.workdir)
    }

    pub fn operator(&self) -> Result<Operator> {
        let client = self.client()?;
        let health = self.health(client.clone());
        Ok(Operator::new(client, health, self.clock(), &self.config.workdir))
    }

    pub fn budget_store(&self) -> Result<BudgetStore> {
        BudgetStore::locate(self.budget_file.as_deref())
    }

    /// A migration state machine with the persisted budget restored.
    pub fn migrator(&self, budget: &BudgetStore) -> Result<MigrationStateMachine> {
        self.config.require_deploy()?;
        self.migrator_for(self.client()?, budget)
    }

    pub fn reconciler(&self, budget: &BudgetStore) -> Result<Reconciler> {
        self.config.require_deploy()?;
        let client = self.client()?;
        let migrator = self.migrator_for(client.clone(), budget)?;
        let health = self.health(client.clone());
        Ok(Reconciler::new(
            client,
            health,
            migrator,
            self.config.thresholds()?,
        ))
    }

    fn migrator_for(
        &self,
        client: Arc<dyn InstanceClient>,
        budget: &BudgetStore,
    ) -> Result<MigrationStateMachine> {
        let health = self.health(client.clone());
        let mut migrator = MigrationStateMachine::new(
            client,
            health,
            self.clock(),
            self.config.deploy_target()?,
            self.config.migration_config()?,
        );
        migrator.restore_budget(&budget.load());
        Ok(migrator)
    }
}

/// Parse an instance id argument.
pub fn parse_instance(raw: &str) -> Result<InstanceId> {
    InstanceId::parse(raw).with_context(|| format!("invalid instance id '{raw}'"))
}
