//! Sync worker configuration.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use warden_id::InstanceId;
use warden_reconcile::{RetryPolicy, DEFAULT_SYNC_MAX_ATTEMPTS, DEFAULT_SYNC_RETRY_DELAY};
use warden_sandbox::layout::{in_workdir, DEFAULT_WORKDIR, SYNC_TRACKER_LOG};
use warden_sandbox::{ClientError, CommandExecutor, ExecutorMode, InstanceClient};

use crate::error::ConfigError;

pub const DEFAULT_QUEUE_CAPACITY: usize = 100;
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_GIT_USER_NAME: &str = "warden-agent";
pub const DEFAULT_GIT_USER_EMAIL: &str = "agent@warden.local";

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Checkout the worker commits from.
    pub repo_dir: String,
    pub branch: String,
    pub repo_url: Option<String>,
    pub git_token: Option<String>,
    pub git_user_name: String,
    pub git_user_email: String,

    pub queue_capacity: usize,
    pub retry: RetryPolicy,
    pub command_timeout: Duration,
    pub poll_interval: Duration,

    /// Where every terminal sync outcome is appended.
    pub tracker_path: PathBuf,

    /// Local when the worker syncs its own checkout, remote when driving
    /// `instance_id` from outside.
    pub executor_mode: ExecutorMode,
    pub instance_id: Option<InstanceId>,
}

impl SyncConfig {
    /// Defaults for a checkout at `repo_dir`.
    pub fn new(repo_dir: impl Into<String>) -> Self {
        let repo_dir = repo_dir.into();
        let tracker_path = PathBuf::from(in_workdir(&repo_dir, SYNC_TRACKER_LOG));
        Self {
            repo_dir,
            branch: "main".to_string(),
            repo_url: None,
            git_token: None,
            git_user_name: DEFAULT_GIT_USER_NAME.to_string(),
            git_user_email: DEFAULT_GIT_USER_EMAIL.to_string(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            retry: RetryPolicy::default(),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            tracker_path,
            executor_mode: ExecutorMode::Local,
            instance_id: None,
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Empty values count as unset.
    ///
    /// Shares `WARDEN_REPO_URL`, `WARDEN_GIT_TOKEN`, `WARDEN_BRANCH` and
    /// `WARDEN_AGENT_WORKDIR` with the deploy environment, so a freshly
    /// deployed worker syncs to the repository it was cloned from.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let repo_dir = get("WARDEN_SYNC_REPO_DIR")
            .or_else(|| get("WARDEN_AGENT_WORKDIR"))
            .unwrap_or_else(|| DEFAULT_WORKDIR.to_string());
        let mut config = Self::new(repo_dir);

        if let Some(branch) = get("WARDEN_BRANCH") {
            config.branch = branch;
        }
        config.repo_url = get("WARDEN_REPO_URL");
        config.git_token = get("WARDEN_GIT_TOKEN");
        if let Some(name) = get("WARDEN_GIT_USER_NAME") {
            config.git_user_name = name;
        }
        if let Some(email) = get("WARDEN_GIT_USER_EMAIL") {
            config.git_user_email = email;
        }
        if let Some(path) = get("WARDEN_SYNC_TRACKER_PATH") {
            config.tracker_path = PathBuf::from(path);
        }

        config.queue_capacity = number(&get, "WARDEN_SYNC_QUEUE_CAPACITY", DEFAULT_QUEUE_CAPACITY)?;
        if config.queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                var: "WARDEN_SYNC_QUEUE_CAPACITY",
                value: "0".to_string(),
                reason: "capacity must be at least 1".to_string(),
            });
        }

        let attempts = number(&get, "WARDEN_SYNC_MAX_ATTEMPTS", DEFAULT_SYNC_MAX_ATTEMPTS)?;
        let delay = number(
            &get,
            "WARDEN_SYNC_RETRY_DELAY_SECS",
            DEFAULT_SYNC_RETRY_DELAY.as_secs(),
        )?;
        config.retry = RetryPolicy::new(attempts, Duration::from_secs(delay)).map_err(|e| {
            ConfigError::Invalid {
                var: "WARDEN_SYNC_MAX_ATTEMPTS",
                value: attempts.to_string(),
                reason: e.to_string(),
            }
        })?;

        let timeout = number(
            &get,
            "WARDEN_SYNC_COMMAND_TIMEOUT_SECS",
            DEFAULT_COMMAND_TIMEOUT.as_secs(),
        )?;
        config.command_timeout = Duration::from_secs(timeout);

        if let Some(raw) = get("WARDEN_EXECUTOR_MODE") {
            config.executor_mode = raw.parse().map_err(|reason| ConfigError::Invalid {
                var: "WARDEN_EXECUTOR_MODE",
                value: raw.clone(),
                reason,
            })?;
        }
        if let Some(raw) = get("WARDEN_SYNC_INSTANCE_ID") {
            let id = InstanceId::parse(&raw).map_err(|e| ConfigError::Invalid {
                var: "WARDEN_SYNC_INSTANCE_ID",
                value: raw.clone(),
                reason: e.to_string(),
            })?;
            config.instance_id = Some(id);
        }
        if config.executor_mode == ExecutorMode::Remote && config.instance_id.is_none() {
            return Err(ConfigError::Invalid {
                var: "WARDEN_SYNC_INSTANCE_ID",
                value: String::new(),
                reason: "remote executor mode needs a target instance".to_string(),
            });
        }

        Ok(config)
    }

    pub fn token(&self) -> &str {
        self.git_token.as_deref().unwrap_or_default()
    }

    /// Executor the sync worker should run git through.
    pub fn executor(
        &self,
        client: Arc<dyn InstanceClient>,
    ) -> Result<Arc<dyn CommandExecutor>, ClientError> {
        self.executor_mode
            .executor_for(client, self.instance_id.as_ref(), None)
    }
}

fn number<G, T>(get: &G, var: &'static str, default: T) -> Result<T, ConfigError>
where
    G: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match get(var) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use warden_sandbox::FakeInstanceClient;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = SyncConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.repo_dir, DEFAULT_WORKDIR);
        assert_eq!(config.queue_capacity, 100);
        assert_eq!(config.retry.max_attempts(), 3);
        assert_eq!(config.retry.delay(), Duration::from_secs(2));
        assert_eq!(
            config.tracker_path,
            PathBuf::from("/home/user/agent/logs/git_tracker.jsonl")
        );
        assert_eq!(config.token(), "");
        assert_eq!(config.executor_mode, ExecutorMode::Local);
    }

    #[test]
    fn test_remote_mode_targets_instance() {
        let config = SyncConfig::from_lookup(lookup(&[
            ("WARDEN_EXECUTOR_MODE", "remote"),
            ("WARDEN_SYNC_INSTANCE_ID", "sb-7"),
        ]))
        .unwrap();
        assert_eq!(config.executor_mode, ExecutorMode::Remote);

        let client: Arc<dyn InstanceClient> = Arc::new(FakeInstanceClient::new());
        let executor = config.executor(client).unwrap();
        assert_eq!(executor.describe(), "remote:sb-7");
    }

    #[test]
    fn test_remote_mode_without_instance_rejected() {
        let err = SyncConfig::from_lookup(lookup(&[("WARDEN_EXECUTOR_MODE", "remote")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "WARDEN_SYNC_INSTANCE_ID", .. }));
    }

    #[test]
    fn test_workdir_fallback_and_overrides() {
        let config = SyncConfig::from_lookup(lookup(&[
            ("WARDEN_AGENT_WORKDIR", "/srv/agent"),
            ("WARDEN_BRANCH", "state"),
            ("WARDEN_GIT_TOKEN", "tok"),
            ("WARDEN_SYNC_MAX_ATTEMPTS", "5"),
        ]))
        .unwrap();
        assert_eq!(config.repo_dir, "/srv/agent");
        assert_eq!(config.branch, "state");
        assert_eq!(config.token(), "tok");
        assert_eq!(config.retry.max_attempts(), 5);
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let err = SyncConfig::from_lookup(lookup(&[("WARDEN_SYNC_MAX_ATTEMPTS", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "WARDEN_SYNC_MAX_ATTEMPTS", .. }));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(SyncConfig::from_lookup(lookup(&[("WARDEN_SYNC_QUEUE_CAPACITY", "0")])).is_err());
    }
}
