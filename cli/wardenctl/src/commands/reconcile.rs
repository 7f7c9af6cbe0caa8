//! One reconcile pass.

use std::process::ExitCode;

use anyhow::Result;
use clap::Args;
use warden_control_plane::{WatchdogAction, WatchdogResult};

use crate::error::{EXIT_ACTION_TAKEN, EXIT_FAILED};
use crate::output::{print_failure, print_json, print_success, print_warning, OutputFormat};

use super::CommandContext;

#[derive(Debug, Args)]
pub struct ReconcileCommand {}

impl ReconcileCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<ExitCode> {
        let budget = ctx.budget_store()?;
        let mut reconciler = ctx.reconciler(&budget)?;

        let result = reconciler.reconcile().await;
        budget.save_quietly(&reconciler.migrator().budget_snapshot());

        print_result(&result, ctx.format);
        Ok(ExitCode::from(exit_code_for(result.action)))
    }
}

/// 0 for a no-op, 3 when the population changed, 1 on failure.
pub fn exit_code_for(action: WatchdogAction) -> u8 {
    match action {
        WatchdogAction::Healthy => 0,
        WatchdogAction::Failed => EXIT_FAILED,
        WatchdogAction::Deployed | WatchdogAction::Recovered | WatchdogAction::Cleaned => {
            EXIT_ACTION_TAKEN
        }
    }
}

fn print_result(result: &WatchdogResult, format: OutputFormat) {
    if format == OutputFormat::Json {
        print_json(result);
        return;
    }

    let instance = result
        .instance_id
        .as_ref()
        .map(|id| id.to_string())
        .unwrap_or_else(|| "-".to_string());
    let killed: Vec<String> = result.killed.iter().map(|id| id.to_string()).collect();

    match result.action {
        WatchdogAction::Healthy => print_success(&format!("healthy ({instance})")),
        WatchdogAction::Failed => print_failure(result.error.as_deref().unwrap_or("unknown error")),
        action => print_warning(&format!("{action}: running {instance}")),
    }
    if !killed.is_empty() {
        println!("  killed: {}", killed.join(", "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code_for(WatchdogAction::Healthy), 0);
        assert_eq!(exit_code_for(WatchdogAction::Deployed), 3);
        assert_eq!(exit_code_for(WatchdogAction::Recovered), 3);
        assert_eq!(exit_code_for(WatchdogAction::Cleaned), 3);
        assert_eq!(exit_code_for(WatchdogAction::Failed), 1);
    }
}
