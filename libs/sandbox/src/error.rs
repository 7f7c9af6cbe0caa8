//! Error types for instance client calls.

use std::time::Duration;

use thiserror::Error;

/// Errors returned by [`InstanceClient`](crate::InstanceClient) and
/// [`CommandExecutor`](crate::CommandExecutor) implementations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The instance (or file) does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Transport failure talking to the provisioning service.
    #[error("network error: {0}")]
    Http(#[from] reqwest::Error),

    /// The provisioning service answered with an error status.
    #[error("api error {status}: {body}")]
    Api { status: u16, body: String },

    /// A command ran but exited non-zero.
    #[error("command exited with {exit_code}: {stderr}")]
    CommandFailed {
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    /// A command did not finish in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Local I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A response could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// A remote executor was requested without a target instance.
    #[error("remote executor requires an instance id")]
    MissingInstance,
}

impl ClientError {
    /// Returns true if the error means the target does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            ClientError::NotFound(_) => true,
            ClientError::Api { status, .. } => *status == 404,
            _ => false,
        }
    }

    /// Short machine-readable label, used in logs.
    pub fn reason_code(&self) -> &'static str {
        match self {
            ClientError::NotFound(_) => "not_found",
            ClientError::Http(_) => "network_error",
            ClientError::Api { .. } => "api_error",
            ClientError::CommandFailed { .. } => "command_failed",
            ClientError::Timeout(_) => "timeout",
            ClientError::Io(_) => "io_error",
            ClientError::Decode(_) => "decode_error",
            ClientError::MissingInstance => "missing_instance",
        }
    }
}
