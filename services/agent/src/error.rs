use thiserror::Error;
use warden_sandbox::ClientError;

/// Errors from the git sync worker.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A git step exited non-zero.
    #[error("git {step} failed (exit {exit_code}): {stderr}")]
    Git {
        step: &'static str,
        exit_code: i32,
        stderr: String,
    },

    /// The command could not be run at all.
    #[error("executor error: {0}")]
    Executor(#[from] ClientError),
}

/// Errors reading or writing local worker files.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Invalid agent configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: '{value}' ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}
