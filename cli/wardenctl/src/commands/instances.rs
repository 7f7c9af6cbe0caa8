//! Instance listing.

use std::process::ExitCode;

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use tabled::Tabled;
use warden_reconcile::HealthThresholds;
use warden_sandbox::InstanceInfo;

use crate::output::{display_option, health_label, print_output, OutputFormat};

use super::CommandContext;

#[derive(Debug, Args)]
pub struct InstancesCommand {
    /// Also read each instance's heartbeat and classify it.
    #[arg(long)]
    health: bool,
}

#[derive(Debug, Serialize, Tabled)]
struct InstanceRow {
    #[tabled(rename = "ID")]
    id: String,

    #[tabled(rename = "Template", display = "display_option")]
    template: Option<String>,

    #[tabled(rename = "Started", display = "display_option")]
    started_at: Option<String>,

    #[tabled(rename = "Health", display = "display_option")]
    #[serde(skip_serializing_if = "Option::is_none")]
    health: Option<String>,

    #[tabled(rename = "Heartbeat Age", display = "display_option")]
    #[serde(skip_serializing_if = "Option::is_none")]
    heartbeat_age: Option<String>,
}

impl InstanceRow {
    fn from_info(info: &InstanceInfo) -> Self {
        Self {
            id: info.instance_id.to_string(),
            template: info.template_id.as_ref().map(|t| t.to_string()),
            started_at: info.started_at.clone(),
            health: None,
            heartbeat_age: None,
        }
    }
}

impl InstancesCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<ExitCode> {
        let client = ctx.client()?;
        let instances = client.list().await?;

        let mut rows: Vec<InstanceRow> = instances.iter().map(InstanceRow::from_info).collect();

        if self.health {
            let monitor = ctx.health(client);
            let thresholds = HealthThresholds::default();
            for (row, info) in rows.iter_mut().zip(&instances) {
                let check = monitor.classify(&info.instance_id, &thresholds).await;
                row.health = Some(match ctx.format {
                    OutputFormat::Table => health_label(check.status).to_string(),
                    OutputFormat::Json => check.status.as_str().to_string(),
                });
                row.heartbeat_age = check.seconds_since_heartbeat.map(|s| format!("{s:.0}s"));
            }
        }

        print_output(&rows, ctx.format);
        Ok(ExitCode::SUCCESS)
    }
}
