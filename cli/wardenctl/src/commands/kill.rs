//! Manual kill.

use std::process::ExitCode;

use anyhow::{bail, Result};
use clap::Args;
use serde::Serialize;
use tabled::Tabled;

use crate::error::EXIT_FAILED;
use crate::output::{display_option, print_info, print_json, print_output, print_success, OutputFormat};

use super::{parse_instance, CommandContext};

#[derive(Debug, Args)]
pub struct KillCommand {
    /// Instance ID.
    #[arg(required_unless_present = "all")]
    instance: Option<String>,

    /// Kill every running instance.
    #[arg(long, conflicts_with = "instance")]
    all: bool,
}

#[derive(Debug, Serialize, Tabled)]
struct KillRow {
    #[tabled(rename = "ID")]
    id: String,

    #[tabled(rename = "Killed")]
    killed: bool,

    #[tabled(rename = "Error", display = "display_option")]
    error: Option<String>,
}

impl KillCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<ExitCode> {
        let operator = ctx.operator()?;

        if self.all {
            let outcomes = operator.kill_all().await?;
            let failed = outcomes.iter().any(|o| o.error.is_some());
            let rows: Vec<KillRow> = outcomes
                .into_iter()
                .map(|o| KillRow {
                    id: o.instance_id.to_string(),
                    killed: o.killed,
                    error: o.error,
                })
                .collect();
            print_output(&rows, ctx.format);
            return Ok(if failed {
                ExitCode::from(EXIT_FAILED)
            } else {
                ExitCode::SUCCESS
            });
        }

        let Some(raw) = self.instance.as_deref() else {
            bail!("specify an instance ID or --all");
        };
        let instance_id = parse_instance(raw)?;
        let killed = operator.kill(&instance_id).await?;

        match ctx.format {
            OutputFormat::Json => print_json(&serde_json::json!({
                "instance_id": instance_id,
                "killed": killed,
            })),
            OutputFormat::Table if killed => print_success(&format!("Killed {instance_id}")),
            OutputFormat::Table => print_info(&format!("{instance_id} was not running")),
        }
        Ok(ExitCode::SUCCESS)
    }
}
