//! Observe one instance.

use std::process::ExitCode;

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use serde_json::Value;

use crate::output::{health_label, print_json, OutputFormat};

use super::{parse_instance, CommandContext};

#[derive(Debug, Args)]
pub struct ObserveCommand {
    /// Instance ID.
    instance: String,
}

impl ObserveCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<ExitCode> {
        let instance_id = parse_instance(&self.instance)?;
        let observation = ctx.operator()?.observe(&instance_id).await;

        if ctx.format == OutputFormat::Json {
            print_json(&observation);
            return Ok(ExitCode::SUCCESS);
        }

        let health = &observation.health;
        println!("{}", format!("Instance {instance_id}").bold());
        println!("  Status:    {}", health_label(health.status));
        if let Some(age) = health.seconds_since_heartbeat {
            println!("  Heartbeat: {age:.0}s ago");
        }
        if let Some(action) = &health.current_action {
            println!("  Action:    {action}");
        }
        if let Some(error) = &health.error {
            println!("  Error:     {}", error.red());
        }

        println!();
        println!("{}", "Worker state".bold());
        match (&observation.state, &observation.state_error) {
            (Some(Value::Object(fields)), _) => {
                for (key, value) in fields {
                    println!("  {key}: {value}");
                }
            }
            (Some(other), _) => println!("  {other}"),
            (None, Some(error)) => println!("  {}", error.dimmed()),
            (None, None) => println!("  {}", "unavailable".dimmed()),
        }

        println!();
        println!("{}", "Recent activity".bold());
        if observation.recent_activity.is_empty() {
            println!("  {}", "none".dimmed());
        }
        for entry in &observation.recent_activity {
            println!("  {}", summarize_activity(entry));
        }

        Ok(ExitCode::SUCCESS)
    }
}

fn summarize_activity(entry: &Value) -> String {
    let timestamp = entry.get("timestamp").and_then(Value::as_str).unwrap_or("-");
    let action = entry.get("action").and_then(Value::as_str).unwrap_or("?");
    let marker = match entry.get("success").and_then(Value::as_bool) {
        Some(true) => "ok".green(),
        Some(false) => "failed".red(),
        None => "-".dimmed(),
    };
    format!("{timestamp}  {action}  {marker}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summarize_activity_tolerates_missing_fields() {
        colored::control::set_override(false);
        let line = summarize_activity(&serde_json::json!({"action": "read_feed", "success": true}));
        assert_eq!(line, "-  read_feed  ok");
        assert_eq!(summarize_activity(&serde_json::json!({})), "-  ?  -");
    }
}
