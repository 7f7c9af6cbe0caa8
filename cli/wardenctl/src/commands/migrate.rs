//! Manual migration.

use std::process::ExitCode;

use anyhow::Result;
use clap::Args;

use crate::error::EXIT_FAILED;
use crate::output::{print_failure, print_json, print_success, OutputFormat};

use super::{parse_instance, CommandContext};

#[derive(Debug, Args)]
pub struct MigrateCommand {
    /// Instance to replace.
    instance: String,
}

impl MigrateCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<ExitCode> {
        let old = parse_instance(&self.instance)?;
        let budget = ctx.budget_store()?;
        let mut migrator = ctx.migrator(&budget)?;

        let result = migrator.migrate(&old).await;
        budget.save_quietly(&migrator.budget_snapshot());

        match ctx.format {
            OutputFormat::Json => print_json(&result),
            OutputFormat::Table if result.success => {
                let new = result
                    .new_instance_id
                    .as_ref()
                    .map(|id| id.to_string())
                    .unwrap_or_default();
                print_success(&format!(
                    "{old} replaced by {new} in {:.1}s ({} migrations today)",
                    result.duration().as_secs_f64(),
                    migrator.migrations_today()
                ));
            }
            OutputFormat::Table => print_failure(&format!(
                "{} (phase {})",
                result.error.as_deref().unwrap_or("migration failed"),
                result.phase
            )),
        }

        Ok(if result.success {
            ExitCode::SUCCESS
        } else {
            ExitCode::from(EXIT_FAILED)
        })
    }
}
