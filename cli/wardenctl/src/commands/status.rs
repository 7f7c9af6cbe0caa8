//! Local worker status.
//!
//! Reads the state file and sync audit log on the machine running the
//! worker. Needs no API credentials.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::Tabled;
use warden_agent::{SyncConfig, SyncResult, SyncStatus, SyncTracker, WorkerState};
use warden_sandbox::layout::{in_workdir, STATE_FILE};

use crate::output::{display_option, print_json, print_output, OutputFormat};

use super::CommandContext;

#[derive(Debug, Args)]
pub struct StatusCommand {
    /// State file to read. Defaults to the worker directory's state.json.
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// Sync audit log to read.
    #[arg(long)]
    tracker: Option<PathBuf>,

    /// Number of recent syncs to show.
    #[arg(long, default_value = "5")]
    syncs: usize,
}

#[derive(Debug, Serialize)]
struct StatusReport {
    state_file: PathBuf,
    exists: bool,
    state: WorkerState,
    recent_syncs: Vec<SyncResult>,
}

#[derive(Debug, Serialize, Tabled)]
struct SyncRow {
    #[tabled(rename = "Time")]
    timestamp: String,

    #[tabled(rename = "Status")]
    status: String,

    #[tabled(rename = "Commit", display = "display_option")]
    commit: Option<String>,

    #[tabled(rename = "Attempts")]
    attempts: u32,

    #[tabled(rename = "Message")]
    message: String,
}

impl StatusCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<ExitCode> {
        let state_file = self
            .state_file
            .unwrap_or_else(|| PathBuf::from(in_workdir(&ctx.config.workdir, STATE_FILE)));
        let tracker_path = match self.tracker {
            Some(path) => path,
            None => SyncConfig::from_env()?.tracker_path,
        };

        let exists = tokio::fs::try_exists(&state_file).await.unwrap_or(false);
        let state = WorkerState::load(&state_file).await;
        let recent_syncs = SyncTracker::new(&tracker_path)
            .recent(self.syncs)
            .await
            .with_context(|| format!("failed to read {}", tracker_path.display()))?;

        let report = StatusReport {
            state_file,
            exists,
            state,
            recent_syncs,
        };

        match ctx.format {
            OutputFormat::Json => print_json(&report),
            OutputFormat::Table => print_report(&report),
        }
        Ok(ExitCode::SUCCESS)
    }
}

fn print_report(report: &StatusReport) {
    println!("{}", format!("State ({})", report.state_file.display()).bold());
    if !report.exists {
        println!("  {}", "no state file, showing defaults".dimmed());
    }
    let state = &report.state;
    println!("  Cycles:               {}", state.cycle_count);
    println!("  Posts today:          {}", state.posts_today);
    println!("  Replies today:        {}", state.replies_today);
    println!("  Consecutive failures: {}", state.consecutive_failures);
    println!(
        "  Last reset:           {}",
        state
            .last_reset_date
            .map(|d| d.to_string())
            .unwrap_or_else(|| "-".to_string())
    );
    println!(
        "  Instance:             {}",
        state.current_instance_id.as_deref().unwrap_or("-")
    );

    println!();
    println!("{}", "Recent syncs".bold());
    let rows: Vec<SyncRow> = report
        .recent_syncs
        .iter()
        .map(|r| SyncRow {
            timestamp: r.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            status: match r.status {
                SyncStatus::Success => r.status.to_string().green().to_string(),
                SyncStatus::Skipped => r.status.to_string().dimmed().to_string(),
                SyncStatus::Failed => r.status.to_string().red().to_string(),
            },
            commit: r.commit_hash.clone(),
            attempts: r.attempts,
            message: r.message.clone(),
        })
        .collect();
    print_output(&rows, OutputFormat::Table);
}
