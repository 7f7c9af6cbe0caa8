//! External-override audit notes.
//!
//! Notes are rows appended to a markdown table inside the instance so the
//! worker (and a human reading its repository) can see what was done to it
//! from outside.

use chrono::{DateTime, Utc};
use tracing::info;
use warden_id::InstanceId;
use warden_sandbox::layout::{in_workdir, OVERRIDES_FILE};
use warden_sandbox::{ClientError, InstanceClient};

/// Source column for every note written by this crate.
pub const NOTE_SOURCE: &str = "External Control";

const HEADER: &str = "# External Overrides\n\n\
Actions taken on this instance from outside the worker.\n\n\
| Timestamp | Source | Description |\n\
|-----------|--------|-------------|\n";

/// Format one table row. Pipes and newlines in the text are neutralized.
pub fn format_row(at: DateTime<Utc>, source: &str, text: &str) -> String {
    let cleaned = text.replace('|', "\\|").replace(['\r', '\n'], " ");
    format!("| {} | {} | {} |\n", at.to_rfc3339(), source, cleaned.trim())
}

/// Append a note to the overrides file, creating it with a header if missing.
pub async fn append_note(
    client: &dyn InstanceClient,
    instance_id: &InstanceId,
    workdir: &str,
    at: DateTime<Utc>,
    text: &str,
) -> Result<(), ClientError> {
    let path = in_workdir(workdir, OVERRIDES_FILE);

    let mut contents = match client.read_file(instance_id, &path).await {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) if e.is_not_found() => HEADER.to_string(),
        Err(e) => return Err(e),
    };
    if !contents.is_empty() && !contents.ends_with('\n') {
        contents.push('\n');
    }
    contents.push_str(&format_row(at, NOTE_SOURCE, text));

    client
        .write_file(instance_id, &path, contents.as_bytes())
        .await?;
    info!(instance_id = %instance_id, "Override note recorded");
    Ok(())
}
