//! Environment configuration.
//!
//! Every setting comes from a `WARDEN_*` variable with a default. Values
//! only some commands need (API key, repository) are optional here and
//! checked by the accessor that needs them, so `wardenctl status` works
//! without credentials.

use std::time::Duration;

use thiserror::Error;
use warden_id::TemplateId;
use warden_reconcile::{
    HealthThresholds, DEFAULT_HEALTHY_THRESHOLD, DEFAULT_MAX_CONCURRENT_INSTANCES,
    DEFAULT_MAX_MIGRATIONS_PER_DAY, DEFAULT_RECONCILE_INTERVAL, DEFAULT_STUCK_THRESHOLD,
    DEFAULT_VERIFY_POLL_INTERVAL, DEFAULT_VERIFY_TIMEOUT,
};
use warden_sandbox::layout::DEFAULT_WORKDIR;
use warden_sandbox::{ClientConfig, CommandEnv};

use crate::migration::{DeployTarget, MigrationConfig};

pub const DEFAULT_API_URL: &str = "https://api.e2b.dev";
pub const DEFAULT_TEMPLATE: &str = "base";
pub const DEFAULT_INSTANCE_TIMEOUT: Duration = Duration::from_secs(3600);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_DEPLOY_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_BRANCH: &str = "main";
pub const DEFAULT_START_COMMAND: &str = "python -m agent.main";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variables: {}", .0.join(", "))]
    Missing(Vec<&'static str>),

    #[error("invalid value for {var}: '{value}' ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: String,
    pub api_key: Option<String>,
    pub template_id: TemplateId,
    pub instance_timeout: Duration,
    pub request_timeout: Duration,

    pub repo_url: Option<String>,
    pub git_token: Option<String>,
    pub branch: String,
    pub workdir: String,
    pub start_command: String,

    pub healthy_threshold: Duration,
    pub stuck_threshold: Duration,
    pub max_migrations_per_day: u32,
    pub max_concurrent_instances: usize,
    pub verify_timeout: Duration,
    pub verify_poll_interval: Duration,
    pub deploy_timeout: Duration,

    pub watch_interval: Duration,
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let template_raw = get("WARDEN_TEMPLATE_ID").unwrap_or_else(|| DEFAULT_TEMPLATE.to_string());
        let template_id = TemplateId::parse(&template_raw).map_err(|e| ConfigError::Invalid {
            var: "WARDEN_TEMPLATE_ID",
            value: template_raw.clone(),
            reason: e.to_string(),
        })?;

        let config = Self {
            api_url: get("WARDEN_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            api_key: get("WARDEN_API_KEY"),
            template_id,
            instance_timeout: secs(&get, "WARDEN_INSTANCE_TIMEOUT_SECS", DEFAULT_INSTANCE_TIMEOUT)?,
            request_timeout: secs(&get, "WARDEN_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT)?,
            repo_url: get("WARDEN_REPO_URL"),
            git_token: get("WARDEN_GIT_TOKEN"),
            branch: get("WARDEN_BRANCH").unwrap_or_else(|| DEFAULT_BRANCH.to_string()),
            workdir: get("WARDEN_AGENT_WORKDIR").unwrap_or_else(|| DEFAULT_WORKDIR.to_string()),
            start_command: get("WARDEN_START_COMMAND")
                .unwrap_or_else(|| DEFAULT_START_COMMAND.to_string()),
            healthy_threshold: secs(&get, "WARDEN_HEALTHY_THRESHOLD_SECS", DEFAULT_HEALTHY_THRESHOLD)?,
            stuck_threshold: secs(&get, "WARDEN_STUCK_THRESHOLD_SECS", DEFAULT_STUCK_THRESHOLD)?,
            max_migrations_per_day: number(
                &get,
                "WARDEN_MAX_MIGRATIONS_PER_DAY",
                DEFAULT_MAX_MIGRATIONS_PER_DAY,
            )?,
            max_concurrent_instances: number(
                &get,
                "WARDEN_MAX_CONCURRENT_INSTANCES",
                DEFAULT_MAX_CONCURRENT_INSTANCES,
            )?,
            verify_timeout: secs(&get, "WARDEN_VERIFY_TIMEOUT_SECS", DEFAULT_VERIFY_TIMEOUT)?,
            verify_poll_interval: secs(&get, "WARDEN_VERIFY_POLL_SECS", DEFAULT_VERIFY_POLL_INTERVAL)?,
            deploy_timeout: secs(&get, "WARDEN_DEPLOY_TIMEOUT_SECS", DEFAULT_DEPLOY_TIMEOUT)?,
            watch_interval: secs(&get, "WARDEN_WATCH_INTERVAL_SECS", DEFAULT_RECONCILE_INTERVAL)?,
            log_level: get("WARDEN_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        };

        config.thresholds()?;
        Ok(config)
    }

    /// Health thresholds for reconciliation and verification.
    pub fn thresholds(&self) -> Result<HealthThresholds, ConfigError> {
        HealthThresholds::new(self.healthy_threshold, self.stuck_threshold).map_err(|e| {
            ConfigError::Invalid {
                var: "WARDEN_STUCK_THRESHOLD_SECS",
                value: self.stuck_threshold.as_secs().to_string(),
                reason: e.to_string(),
            }
        })
    }

    /// Settings for talking to the provisioning service.
    pub fn client_config(&self) -> Result<ClientConfig, ConfigError> {
        let api_key = self
            .api_key
            .clone()
            .ok_or_else(|| ConfigError::Missing(vec!["WARDEN_API_KEY"]))?;

        Ok(ClientConfig {
            api_url: self.api_url.clone(),
            api_key,
            template_id: self.template_id.clone(),
            instance_timeout: self.instance_timeout,
            request_timeout: self.request_timeout,
        })
    }

    /// Check everything a reconcile or migrate run needs, reporting every
    /// missing variable at once.
    pub fn require_deploy(&self) -> Result<(), ConfigError> {
        let mut missing = Vec::new();
        if self.api_key.is_none() {
            missing.push("WARDEN_API_KEY");
        }
        if self.repo_url.is_none() {
            missing.push("WARDEN_REPO_URL");
        }
        if self.git_token.is_none() {
            missing.push("WARDEN_GIT_TOKEN");
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Missing(missing))
        }
    }

    /// What gets deployed onto a new instance.
    pub fn deploy_target(&self) -> Result<DeployTarget, ConfigError> {
        self.require_deploy()?;
        let repo_url = self.repo_url.clone().unwrap_or_default();
        let git_token = self.git_token.clone().unwrap_or_default();

        let mut env = CommandEnv::new();
        env.insert("WARDEN_REPO_URL".to_string(), repo_url.clone());
        env.insert("WARDEN_GIT_TOKEN".to_string(), git_token.clone());
        env.insert("WARDEN_BRANCH".to_string(), self.branch.clone());
        env.insert("WARDEN_AGENT_WORKDIR".to_string(), self.workdir.clone());

        Ok(DeployTarget {
            repo_url,
            git_token,
            branch: self.branch.clone(),
            workdir: self.workdir.clone(),
            setup_commands: vec!["pip install -q -r requirements.txt".to_string()],
            start_command: self.start_command.clone(),
            env,
        })
    }

    pub fn migration_config(&self) -> Result<MigrationConfig, ConfigError> {
        Ok(MigrationConfig {
            max_migrations_per_day: self.max_migrations_per_day,
            max_concurrent_instances: self.max_concurrent_instances,
            verify_timeout: self.verify_timeout,
            verify_poll_interval: self.verify_poll_interval,
            deploy_timeout: self.deploy_timeout,
            thresholds: self.thresholds()?,
        })
    }
}

fn secs<G>(get: &G, var: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    number::<G, u64>(get, var, default.as_secs()).map(Duration::from_secs)
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

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.template_id.as_str(), "base");
        assert_eq!(config.stuck_threshold, Duration::from_secs(600));
        assert_eq!(config.healthy_threshold, Duration::from_secs(60));
        assert_eq!(config.max_migrations_per_day, 10);
        assert_eq!(config.max_concurrent_instances, 2);
        assert_eq!(config.verify_timeout, Duration::from_secs(120));
        assert_eq!(config.verify_poll_interval, Duration::from_secs(5));
        assert_eq!(config.watch_interval, Duration::from_secs(900));
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("WARDEN_STUCK_THRESHOLD_SECS", "300"),
            ("WARDEN_MAX_CONCURRENT_INSTANCES", "3"),
        ]))
        .unwrap();
        assert_eq!(config.stuck_threshold, Duration::from_secs(300));
        assert_eq!(config.max_concurrent_instances, 3);
    }

    #[test]
    fn test_invalid_number() {
        let err = Config::from_lookup(lookup(&[("WARDEN_VERIFY_TIMEOUT_SECS", "soon")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "WARDEN_VERIFY_TIMEOUT_SECS", .. }));
    }

    #[test]
    fn test_stuck_below_healthy_is_invalid() {
        let err = Config::from_lookup(lookup(&[
            ("WARDEN_HEALTHY_THRESHOLD_SECS", "120"),
            ("WARDEN_STUCK_THRESHOLD_SECS", "60"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_require_deploy_lists_every_missing_variable() {
        let config = Config::from_lookup(lookup(&[("WARDEN_REPO_URL", "https://x/y.git")])).unwrap();
        match config.require_deploy() {
            Err(ConfigError::Missing(vars)) => {
                assert_eq!(vars, vec!["WARDEN_API_KEY", "WARDEN_GIT_TOKEN"]);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_empty_value_counts_as_missing() {
        let config = Config::from_lookup(lookup(&[("WARDEN_API_KEY", "  ")])).unwrap();
        assert!(config.client_config().is_err());
    }

    #[test]
    fn test_deploy_target_env() {
        let config = Config::from_lookup(lookup(&[
            ("WARDEN_API_KEY", "k"),
            ("WARDEN_REPO_URL", "https://github.com/acme/brain.git"),
            ("WARDEN_GIT_TOKEN", "t"),
        ]))
        .unwrap();
        let target = config.deploy_target().unwrap();
        assert_eq!(target.branch, "main");
        assert_eq!(target.env.get("WARDEN_GIT_TOKEN").map(String::as_str), Some("t"));
    }
}
