//! Periodic reconcile loop.

use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use tokio::sync::watch;
use tracing::{error, info};
use warden_control_plane::ReconcileWorker;

use super::CommandContext;

#[derive(Debug, Args)]
pub struct WatchCommand {
    /// Seconds between passes. Defaults to WARDEN_WATCH_INTERVAL_SECS.
    #[arg(long)]
    interval_secs: Option<u64>,
}

impl WatchCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<ExitCode> {
        let interval = self
            .interval_secs
            .map(Duration::from_secs)
            .unwrap_or(ctx.config.watch_interval);
        if interval.is_zero() {
            anyhow::bail!("watch interval must be positive");
        }

        let budget = ctx.budget_store()?;
        let reconciler = ctx.reconciler(&budget)?;
        let mut worker = ReconcileWorker::new(reconciler, interval);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received shutdown signal");
                    let _ = shutdown_tx.send(true);
                }
                Err(e) => {
                    error!(error = %e, "Failed to listen for shutdown signal");
                    // Keep the sender alive so the worker is not told to stop.
                    std::future::pending::<()>().await;
                    drop(shutdown_tx);
                }
            }
        });

        let stats = worker
            .run(shutdown_rx, |reconciler, _result| {
                budget.save_quietly(&reconciler.migrator().budget_snapshot());
            })
            .await;

        info!(
            passes = stats.passes,
            actions = stats.actions,
            failures = stats.failures,
            "Watch stopped"
        );
        Ok(ExitCode::SUCCESS)
    }
}
