//! Operator notes.

use std::process::ExitCode;

use anyhow::{bail, Result};
use clap::Args;

use crate::output::{print_json, print_success, OutputFormat};

use super::{parse_instance, CommandContext};

#[derive(Debug, Args)]
pub struct NoteCommand {
    /// Instance ID.
    instance: String,

    /// Note text. Multiple words are joined with spaces.
    #[arg(required = true, num_args = 1..)]
    text: Vec<String>,
}

impl NoteCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<ExitCode> {
        let instance_id = parse_instance(&self.instance)?;
        let text = self.text.join(" ");
        if text.trim().is_empty() {
            bail!("note text is empty");
        }

        ctx.operator()?.note(&instance_id, &text).await?;

        match ctx.format {
            OutputFormat::Json => print_json(&serde_json::json!({
                "instance_id": instance_id,
                "note": text,
            })),
            OutputFormat::Table => print_success(&format!("Note added to {instance_id}")),
        }
        Ok(ExitCode::SUCCESS)
    }
}
