//! Error display and exit codes.

use std::process::ExitCode;

use colored::Colorize;
use warden_control_plane::ConfigError;
use warden_sandbox::ClientError;

/// Exit code for a failed command or reconcile pass.
pub const EXIT_FAILED: u8 = 1;

/// Exit code for missing or invalid configuration.
pub const EXIT_CONFIG: u8 = 2;

/// Exit code for a reconcile pass that took corrective action.
pub const EXIT_ACTION_TAKEN: u8 = 3;

pub fn exit_code(err: &anyhow::Error) -> ExitCode {
    if err.downcast_ref::<ConfigError>().is_some()
        || err.downcast_ref::<warden_agent::ConfigError>().is_some()
    {
        ExitCode::from(EXIT_CONFIG)
    } else {
        ExitCode::from(EXIT_FAILED)
    }
}

/// Print an error in a user-friendly format.
pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {:#}", "Error:".red().bold(), err);

    if let Some(config_err) = err.downcast_ref::<ConfigError>() {
        if let ConfigError::Missing(vars) = config_err {
            eprintln!(
                "\n{}",
                format!("Hint: export {} before running this command.", vars.join(", ")).yellow()
            );
        }
        return;
    }

    if let Some(client_err) = err.downcast_ref::<ClientError>() {
        match client_err {
            ClientError::Api { status: 401, .. } | ClientError::Api { status: 403, .. } => {
                eprintln!("\n{}", "Hint: check WARDEN_API_KEY.".yellow());
            }
            ClientError::Http(_) | ClientError::Timeout(_) => {
                eprintln!(
                    "\n{}",
                    "Hint: check your network connection and WARDEN_API_URL.".yellow()
                );
            }
            _ => {}
        }
    }
}
