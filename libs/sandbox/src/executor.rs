//! Command executors.
//!
//! A [`CommandExecutor`] runs shell commands either inside a remote
//! instance (through an [`InstanceClient`]) or on the local host. Deploys and
//! the git sync worker are written against the trait, so the same code runs
//! in both places.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use warden_id::InstanceId;

use crate::client::{CommandEnv, InstanceClient};
use crate::error::ClientError;

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Something that can run shell commands and place files.
///
/// A non-zero exit is reported through [`CommandOutput::exit_code`], not as
/// an error. Errors mean the command could not be run at all or timed out.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run `command` under `sh -c` and wait for it.
    async fn run(
        &self,
        command: &str,
        env: &CommandEnv,
        timeout: Duration,
    ) -> Result<CommandOutput, ClientError>;

    /// Start `command` and return without waiting for it to exit.
    async fn spawn_detached(&self, command: &str, env: &CommandEnv) -> Result<(), ClientError>;

    /// Write `contents` to `path`, replacing any existing file.
    async fn write_file(&self, path: &str, contents: &[u8]) -> Result<(), ClientError>;

    /// Short label for logs.
    fn describe(&self) -> String;
}

/// Runs commands inside a remote instance.
pub struct RemoteExecutor {
    client: Arc<dyn InstanceClient>,
    instance_id: InstanceId,
}

impl RemoteExecutor {
    pub fn new(client: Arc<dyn InstanceClient>, instance_id: InstanceId) -> Self {
        Self {
            client,
            instance_id,
        }
    }

    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }
}

#[async_trait]
impl CommandExecutor for RemoteExecutor {
    async fn run(
        &self,
        command: &str,
        env: &CommandEnv,
        timeout: Duration,
    ) -> Result<CommandOutput, ClientError> {
        match self
            .client
            .run_command(&self.instance_id, command, env, timeout)
            .await
        {
            Ok(stdout) => Ok(CommandOutput {
                stdout,
                stderr: String::new(),
                exit_code: 0,
            }),
            Err(ClientError::CommandFailed {
                exit_code,
                stdout,
                stderr,
            }) => Ok(CommandOutput {
                stdout,
                stderr,
                exit_code,
            }),
            Err(e) => Err(e),
        }
    }

    async fn spawn_detached(&self, command: &str, env: &CommandEnv) -> Result<(), ClientError> {
        self.client
            .start_background_command(&self.instance_id, command, env)
            .await
    }

    async fn write_file(&self, path: &str, contents: &[u8]) -> Result<(), ClientError> {
        self.client
            .write_file(&self.instance_id, path, contents)
            .await
    }

    fn describe(&self) -> String {
        format!("remote:{}", self.instance_id)
    }
}

/// Runs commands on the local host.
#[derive(Debug, Clone, Default)]
pub struct LocalExecutor {
    workdir: Option<PathBuf>,
}

impl LocalExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run commands and resolve relative paths under `workdir`.
    pub fn in_dir(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: Some(workdir.into()),
        }
    }

    fn shell(&self, command: &str, env: &CommandEnv) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c").arg(command).envs(env);
        if let Some(dir) = &self.workdir {
            cmd.current_dir(dir);
        }
        cmd
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        match &self.workdir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.to_path_buf(),
        }
    }
}

#[async_trait]
impl CommandExecutor for LocalExecutor {
    async fn run(
        &self,
        command: &str,
        env: &CommandEnv,
        timeout: Duration,
    ) -> Result<CommandOutput, ClientError> {
        let mut cmd = self.shell(command, env);
        cmd.kill_on_drop(true)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let output = tokio::time::timeout(timeout, cmd.output())
            .await
            .map_err(|_| ClientError::Timeout(timeout))??;

        // Killed by a signal has no code.
        let exit_code = output.status.code().unwrap_or(-1);
        debug!(exit_code, "Local command finished");

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code,
        })
    }

    async fn spawn_detached(&self, command: &str, env: &CommandEnv) -> Result<(), ClientError> {
        let mut cmd = self.shell(command, env);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        let child = cmd.spawn()?;
        debug!(pid = ?child.id(), "Spawned detached command");
        Ok(())
    }

    async fn write_file(&self, path: &str, contents: &[u8]) -> Result<(), ClientError> {
        let target = self.resolve(path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, contents).await?;
        Ok(())
    }

    fn describe(&self) -> String {
        match &self.workdir {
            Some(dir) => format!("local:{}", dir.display()),
            None => "local".to_string(),
        }
    }
}

/// Where commands run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorMode {
    #[default]
    Remote,
    Local,
}

impl ExecutorMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutorMode::Remote => "remote",
            ExecutorMode::Local => "local",
        }
    }

    /// Build an executor for this mode.
    ///
    /// Remote mode needs a target instance. Local mode ignores it and runs
    /// in `workdir`.
    pub fn executor_for(
        &self,
        client: Arc<dyn InstanceClient>,
        instance_id: Option<&InstanceId>,
        workdir: Option<&Path>,
    ) -> Result<Arc<dyn CommandExecutor>, ClientError> {
        match self {
            ExecutorMode::Remote => {
                let instance_id = instance_id.ok_or(ClientError::MissingInstance)?;
                Ok(Arc::new(RemoteExecutor::new(client, instance_id.clone())))
            }
            ExecutorMode::Local => {
                if instance_id.is_some() {
                    warn!("Local executor ignores target instance");
                }
                Ok(Arc::new(match workdir {
                    Some(dir) => LocalExecutor::in_dir(dir),
                    None => LocalExecutor::new(),
                }))
            }
        }
    }
}

impl std::fmt::Display for ExecutorMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutorMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "remote" => Ok(ExecutorMode::Remote),
            "local" => Ok(ExecutorMode::Local),
            other => Err(format!("unknown executor mode '{}', expected remote or local", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeInstanceClient;

    #[tokio::test]
    async fn test_local_run_captures_output_and_exit_code() {
        let executor = LocalExecutor::new();
        let env = CommandEnv::from([("GREETING".to_string(), "hi".to_string())]);

        let output = executor
            .run("echo $GREETING; echo oops >&2; exit 3", &env, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(output.stdout.trim(), "hi");
        assert_eq!(output.stderr.trim(), "oops");
        assert_eq!(output.exit_code, 3);
        assert!(!output.success());
    }

    #[tokio::test]
    async fn test_local_run_timeout() {
        let executor = LocalExecutor::new();
        let result = executor
            .run("sleep 5", &CommandEnv::new(), Duration::from_millis(50))
            .await;
        assert!(matches!(result, Err(ClientError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_local_write_file_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let executor = LocalExecutor::in_dir(dir.path());

        executor
            .write_file("logs/activity.jsonl", b"{}\n")
            .await
            .unwrap();

        let written = std::fs::read(dir.path().join("logs/activity.jsonl")).unwrap();
        assert_eq!(written, b"{}\n");
    }

    #[tokio::test]
    async fn test_local_run_uses_workdir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker"), "x").unwrap();
        let executor = LocalExecutor::in_dir(dir.path());

        let output = executor
            .run("ls", &CommandEnv::new(), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(output.stdout.contains("marker"));
    }

    #[tokio::test]
    async fn test_remote_maps_failed_command_to_output() {
        let fake = Arc::new(FakeInstanceClient::new());
        let id = fake.add_instance("sb-1");
        fake.fail_commands_containing("git push", 128, "rejected");

        let executor = RemoteExecutor::new(fake.clone(), id);
        let output = executor
            .run("git push origin main", &CommandEnv::new(), Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(output.exit_code, 128);
        assert_eq!(output.stderr, "rejected");
        assert_eq!(fake.commands_run().len(), 1);
    }

    #[test]
    fn test_executor_mode_parse() {
        assert_eq!("remote".parse::<ExecutorMode>().unwrap(), ExecutorMode::Remote);
        assert_eq!(" LOCAL ".parse::<ExecutorMode>().unwrap(), ExecutorMode::Local);
        assert!("docker".parse::<ExecutorMode>().is_err());
    }

    #[test]
    fn test_remote_mode_requires_instance() {
        let fake: Arc<dyn InstanceClient> = Arc::new(FakeInstanceClient::new());
        let result = ExecutorMode::Remote.executor_for(fake.clone(), None, None);
        assert!(matches!(result, Err(ClientError::MissingInstance)));

        let local = ExecutorMode::Local.executor_for(fake, None, None).unwrap();
        assert_eq!(local.describe(), "local");
    }
}
