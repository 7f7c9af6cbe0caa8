//! In-memory [`InstanceClient`] for tests.
//!
//! Instances keep listing order. Files live in a per-instance map keyed by
//! exact path. Starting a background command writes a fresh heartbeat by
//! default, so a deploy through the fake comes up healthy unless told
//! otherwise.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use warden_id::InstanceId;

use crate::client::{CommandEnv, InstanceClient, InstanceInfo};
use crate::error::ClientError;
use crate::layout::{in_workdir, HeartbeatRecord, DEFAULT_WORKDIR, HEARTBEAT_FILE};

#[derive(Debug)]
struct FakeInstance {
    id: InstanceId,
    files: BTreeMap<String, Vec<u8>>,
    running: bool,
    readable: bool,
}

#[derive(Debug, Clone)]
struct CommandRule {
    needle: String,
    exit_code: i32,
    stderr: String,
}

#[derive(Debug, Default)]
struct FakeState {
    instances: Vec<FakeInstance>,
    next_id: u32,
    now: Option<DateTime<Utc>>,
    heartbeat_path: String,
    auto_heartbeat: bool,
    fail_create: bool,
    fail_list: bool,
    fail_kill: Vec<InstanceId>,
    failing_commands: Vec<CommandRule>,
    command_stdout: Vec<(String, String)>,
    created: Vec<InstanceId>,
    killed: Vec<InstanceId>,
    commands: Vec<(InstanceId, String)>,
    background: Vec<(InstanceId, String)>,
}

/// Scriptable in-memory provisioning service.
#[derive(Debug)]
pub struct FakeInstanceClient {
    state: Mutex<FakeState>,
}

impl Default for FakeInstanceClient {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeInstanceClient {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                heartbeat_path: in_workdir(DEFAULT_WORKDIR, HEARTBEAT_FILE),
                auto_heartbeat: true,
                ..FakeState::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Path the heartbeat helpers read and write.
    pub fn set_heartbeat_path(&self, path: impl Into<String>) {
        self.state().heartbeat_path = path.into();
    }

    /// Pin the time used for automatic heartbeats.
    pub fn set_now(&self, now: DateTime<Utc>) {
        self.state().now = Some(now);
    }

    /// Stop background commands from writing a heartbeat.
    pub fn disable_auto_heartbeat(&self) {
        self.state().auto_heartbeat = false;
    }

    /// Register a running instance at the end of the listing.
    pub fn add_instance(&self, id: &str) -> InstanceId {
        let id = InstanceId::parse(id).unwrap_or_else(|e| panic!("bad fake instance id: {e}"));
        self.state().instances.push(FakeInstance {
            id: id.clone(),
            files: BTreeMap::new(),
            running: true,
            readable: true,
        });
        id
    }

    /// Write a heartbeat stamped at `timestamp`.
    pub fn set_heartbeat_at(&self, id: &InstanceId, timestamp: DateTime<Utc>) {
        let record = HeartbeatRecord::new(timestamp, "idle", 1, Some(id.to_string()));
        let bytes = record.to_vec().unwrap_or_default();
        let path = self.state().heartbeat_path.clone();
        self.set_file(id, &path, bytes);
    }

    /// Write a heartbeat `age` older than the pinned time.
    pub fn set_heartbeat_age(&self, id: &InstanceId, age: Duration) {
        let now = self.now();
        let age = chrono::Duration::from_std(age).unwrap_or(chrono::Duration::zero());
        self.set_heartbeat_at(id, now - age);
    }

    /// Place raw file contents inside an instance.
    pub fn set_file(&self, id: &InstanceId, path: &str, contents: impl Into<Vec<u8>>) {
        let mut state = self.state();
        if let Some(instance) = state.instances.iter_mut().find(|i| &i.id == id) {
            instance.files.insert(path.to_string(), contents.into());
        }
    }

    /// Make every file read on `id` fail.
    pub fn set_unreadable(&self, id: &InstanceId) {
        self.with_instance(id, |i| i.readable = false);
    }

    /// Control what `is_running` reports for `id`.
    pub fn set_running(&self, id: &InstanceId, running: bool) {
        self.with_instance(id, |i| i.running = running);
    }

    pub fn fail_create(&self, fail: bool) {
        self.state().fail_create = fail;
    }

    pub fn fail_list(&self, fail: bool) {
        self.state().fail_list = fail;
    }

    pub fn fail_kill(&self, id: &InstanceId) {
        self.state().fail_kill.push(id.clone());
    }

    /// Commands containing `needle` exit with `exit_code`.
    pub fn fail_commands_containing(&self, needle: &str, exit_code: i32, stderr: &str) {
        self.state().failing_commands.push(CommandRule {
            needle: needle.to_string(),
            exit_code,
            stderr: stderr.to_string(),
        });
    }

    /// Commands containing `needle` print `stdout`.
    pub fn set_command_stdout(&self, needle: &str, stdout: &str) {
        self.state()
            .command_stdout
            .push((needle.to_string(), stdout.to_string()));
    }

    pub fn instance_ids(&self) -> Vec<InstanceId> {
        self.state().instances.iter().map(|i| i.id.clone()).collect()
    }

    pub fn created(&self) -> Vec<InstanceId> {
        self.state().created.clone()
    }

    pub fn killed(&self) -> Vec<InstanceId> {
        self.state().killed.clone()
    }

    pub fn commands_run(&self) -> Vec<(InstanceId, String)> {
        self.state().commands.clone()
    }

    pub fn background_commands(&self) -> Vec<(InstanceId, String)> {
        self.state().background.clone()
    }

    pub fn file(&self, id: &InstanceId, path: &str) -> Option<Vec<u8>> {
        self.state()
            .instances
            .iter()
            .find(|i| &i.id == id)
            .and_then(|i| i.files.get(path).cloned())
    }

    fn now(&self) -> DateTime<Utc> {
        self.state().now.unwrap_or_else(Utc::now)
    }

    fn with_instance(&self, id: &InstanceId, f: impl FnOnce(&mut FakeInstance)) {
        let mut state = self.state();
        if let Some(instance) = state.instances.iter_mut().find(|i| &i.id == id) {
            f(instance);
        }
    }

    fn check_command(state: &FakeState, command: &str) -> Result<String, ClientError> {
        if let Some(rule) = state
            .failing_commands
            .iter()
            .find(|r| command.contains(&r.needle))
        {
            return Err(ClientError::CommandFailed {
                exit_code: rule.exit_code,
                stdout: String::new(),
                stderr: rule.stderr.clone(),
            });
        }
        Ok(state
            .command_stdout
            .iter()
            .find(|(needle, _)| command.contains(needle))
            .map(|(_, out)| out.clone())
            .unwrap_or_default())
    }
}

fn api_error(body: &str) -> ClientError {
    ClientError::Api {
        status: 500,
        body: body.to_string(),
    }
}

#[async_trait]
impl InstanceClient for FakeInstanceClient {
    async fn create(&self) -> Result<InstanceId, ClientError> {
        let mut state = self.state();
        if state.fail_create {
            return Err(api_error("create failed"));
        }
        state.next_id += 1;
        let id = InstanceId::parse(&format!("sb-new-{}", state.next_id))
            .map_err(|e| ClientError::Decode(e.to_string()))?;
        state.instances.push(FakeInstance {
            id: id.clone(),
            files: BTreeMap::new(),
            running: true,
            readable: true,
        });
        state.created.push(id.clone());
        Ok(id)
    }

    async fn list(&self) -> Result<Vec<InstanceInfo>, ClientError> {
        let state = self.state();
        if state.fail_list {
            return Err(api_error("list failed"));
        }
        Ok(state
            .instances
            .iter()
            .map(|i| InstanceInfo::bare(i.id.clone()))
            .collect())
    }

    async fn kill(&self, instance_id: &InstanceId) -> Result<bool, ClientError> {
        let mut state = self.state();
        if state.fail_kill.contains(instance_id) {
            return Err(api_error("kill failed"));
        }
        let before = state.instances.len();
        state.instances.retain(|i| &i.id != instance_id);
        let removed = state.instances.len() < before;
        if removed {
            state.killed.push(instance_id.clone());
        }
        Ok(removed)
    }

    async fn is_running(&self, instance_id: &InstanceId) -> Result<bool, ClientError> {
        Ok(self
            .state()
            .instances
            .iter()
            .any(|i| &i.id == instance_id && i.running))
    }

    async fn read_file(
        &self,
        instance_id: &InstanceId,
        path: &str,
    ) -> Result<Vec<u8>, ClientError> {
        let state = self.state();
        let instance = state
            .instances
            .iter()
            .find(|i| &i.id == instance_id)
            .ok_or_else(|| ClientError::NotFound(instance_id.to_string()))?;
        if !instance.readable {
            return Err(api_error("read failed"));
        }
        instance
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(path.to_string()))
    }

    async fn write_file(
        &self,
        instance_id: &InstanceId,
        path: &str,
        contents: &[u8],
    ) -> Result<(), ClientError> {
        let mut state = self.state();
        let instance = state
            .instances
            .iter_mut()
            .find(|i| &i.id == instance_id)
            .ok_or_else(|| ClientError::NotFound(instance_id.to_string()))?;
        instance.files.insert(path.to_string(), contents.to_vec());
        Ok(())
    }

    async fn run_command(
        &self,
        instance_id: &InstanceId,
        command: &str,
        _env: &CommandEnv,
        _timeout: Duration,
    ) -> Result<String, ClientError> {
        let mut state = self.state();
        if !state.instances.iter().any(|i| &i.id == instance_id) {
            return Err(ClientError::NotFound(instance_id.to_string()));
        }
        state
            .commands
            .push((instance_id.clone(), command.to_string()));
        Self::check_command(&state, command)
    }

    async fn start_background_command(
        &self,
        instance_id: &InstanceId,
        command: &str,
        _env: &CommandEnv,
    ) -> Result<(), ClientError> {
        let (auto_heartbeat, now) = {
            let mut state = self.state();
            if !state.instances.iter().any(|i| &i.id == instance_id) {
                return Err(ClientError::NotFound(instance_id.to_string()));
            }
            state
                .background
                .push((instance_id.clone(), command.to_string()));
            Self::check_command(&state, command)?;
            (state.auto_heartbeat, state.now.unwrap_or_else(Utc::now))
        };

        if auto_heartbeat {
            self.set_heartbeat_at(instance_id, now);
        }
        Ok(())
    }
}
