//! Persistent sync worker.
//!
//! The worker's control loop hands file lists to [`SyncWorker::queue_sync`]
//! and moves on. A single background task drains the queue in FIFO order
//! and, for each entry, stages, commits and pushes through a
//! [`CommandExecutor`]. Add, commit and push failures are retried with a
//! fixed delay; every terminal outcome is appended to the sync audit log.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use warden_sandbox::shell::{self, authenticated_url, redact};
use warden_sandbox::{CommandEnv, CommandExecutor, CommandOutput};

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::tracker::{SyncEntry, SyncResult, SyncStatus, SyncTracker};

enum SyncMessage {
    Entry(SyncEntry),
    Shutdown,
}

/// Counters reported by [`SyncWorker::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    /// Successful and skipped syncs.
    pub total_syncs: u64,
    pub total_failures: u64,
    pub queue_size: usize,
    pub running: bool,
}

/// Outcome of one attempt that did not fail.
enum Attempt {
    NothingStaged,
    Pushed(String),
}

struct Inner {
    executor: Arc<dyn CommandExecutor>,
    config: SyncConfig,
    tracker: SyncTracker,
    env: CommandEnv,
    total_syncs: AtomicU64,
    total_failures: AtomicU64,
}

pub struct SyncWorker {
    inner: Arc<Inner>,
    sender: Mutex<Option<mpsc::Sender<SyncMessage>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SyncWorker {
    pub fn new(executor: Arc<dyn CommandExecutor>, config: SyncConfig) -> Self {
        let tracker = SyncTracker::new(config.tracker_path.clone());
        let mut env = CommandEnv::new();
        env.insert("GIT_TERMINAL_PROMPT".to_string(), "0".to_string());

        Self {
            inner: Arc::new(Inner {
                executor,
                config,
                tracker,
                env,
                total_syncs: AtomicU64::new(0),
                total_failures: AtomicU64::new(0),
            }),
            sender: Mutex::new(None),
            handle: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub fn tracker(&self) -> &SyncTracker {
        &self.inner.tracker
    }

    pub fn is_running(&self) -> bool {
        lock(&self.sender).is_some()
    }

    /// Spawn the consumer task. Returns `false` if it was already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> bool {
        let mut sender = lock(&self.sender);
        if sender.is_some() {
            return false;
        }

        let (tx, rx) = mpsc::channel(self.inner.config.queue_capacity);
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(consume(inner, rx));

        *sender = Some(tx);
        *lock(&self.handle) = Some(handle);

        info!(
            repo_dir = %self.inner.config.repo_dir,
            executor = %self.inner.executor.describe(),
            capacity = self.inner.config.queue_capacity,
            "Sync worker started"
        );
        true
    }

    /// Enqueue a sync without waiting.
    ///
    /// Returns `false` if the worker is not running or the queue is full.
    pub fn queue_sync<I, S>(&self, files: I, message: impl Into<String>) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entry = SyncEntry::new(files, message);
        let sender = lock(&self.sender);
        let Some(tx) = sender.as_ref() else {
            warn!(message = %entry.message, "Sync worker not running, dropping sync");
            return false;
        };

        match tx.try_send(SyncMessage::Entry(entry)) {
            Ok(()) => true,
            Err(TrySendError::Full(SyncMessage::Entry(entry))) => {
                warn!(message = %entry.message, "Sync queue full, dropping sync");
                false
            }
            Err(_) => false,
        }
    }

    /// Stop the consumer after it drains what is already queued.
    ///
    /// Returns `true` if the task finished within `timeout`. On timeout the
    /// task is detached and keeps draining, so an in-flight commit still
    /// completes and is recorded. Calling `stop` on a stopped worker is a
    /// no-op.
    pub async fn stop(&self, timeout: Duration) -> bool {
        let Some(tx) = lock(&self.sender).take() else {
            return true;
        };
        let handle = lock(&self.handle).take();
        let deadline = Instant::now() + timeout;

        if tokio::time::timeout_at(deadline, tx.send(SyncMessage::Shutdown))
            .await
            .is_err()
        {
            warn!("Timed out queueing shutdown for sync worker");
        }
        drop(tx);

        let Some(handle) = handle else {
            return true;
        };
        match tokio::time::timeout_at(deadline, handle).await {
            Ok(Ok(())) => {
                info!("Sync worker stopped");
                true
            }
            Ok(Err(e)) => {
                error!(error = %e, "Sync worker task ended abnormally");
                false
            }
            Err(_) => {
                warn!(
                    timeout_secs = timeout.as_secs_f64(),
                    "Sync worker did not stop in time, leaving it to drain"
                );
                false
            }
        }
    }

    pub fn stats(&self) -> SyncStats {
        let sender = lock(&self.sender);
        let queue_size = sender
            .as_ref()
            .map(|tx| tx.max_capacity() - tx.capacity())
            .unwrap_or(0);

        SyncStats {
            total_syncs: self.inner.total_syncs.load(Ordering::Relaxed),
            total_failures: self.inner.total_failures.load(Ordering::Relaxed),
            queue_size,
            running: sender.is_some(),
        }
    }

    /// Run one sync inline, bypassing the queue. The result is recorded
    /// like a queued one.
    pub async fn sync_now(&self, entry: SyncEntry) -> SyncResult {
        self.inner.process(entry).await
    }

    /// Configure the git identity and clone the repository.
    ///
    /// Returns `Ok(true)` if a clone was made and `Ok(false)` if the
    /// checkout already exists or no repository URL is configured.
    #[instrument(skip(self), fields(repo_dir = %self.inner.config.repo_dir))]
    pub async fn init_repo(&self) -> Result<bool, SyncError> {
        let config = &self.inner.config;

        for (key, value) in [
            ("user.email", &config.git_user_email),
            ("user.name", &config.git_user_name),
        ] {
            let cmd = shell::command("git", ["config", "--global", key, value.as_str()]);
            let output = self.inner.exec("config", &cmd).await?;
            if !output.success() {
                return Err(self.inner.git_error("config", &output));
            }
        }

        let Some(repo_url) = config.repo_url.as_deref() else {
            debug!("No repository URL configured, skipping clone");
            return Ok(false);
        };

        let url = authenticated_url(repo_url, config.token());
        let cmd = shell::command(
            "git",
            ["clone", "--branch", config.branch.as_str(), url.as_str(), config.repo_dir.as_str()],
        );
        let output = self.inner.exec("clone", &cmd).await?;
        if output.success() {
            info!(branch = %config.branch, "Repository cloned");
            return Ok(true);
        }
        if output.stderr.contains("already exists") {
            info!("Repository already present");
            return Ok(false);
        }
        Err(self.inner.git_error("clone", &output))
    }
}

async fn consume(inner: Arc<Inner>, mut rx: mpsc::Receiver<SyncMessage>) {
    loop {
        match tokio::time::timeout(inner.config.poll_interval, rx.recv()).await {
            Ok(Some(SyncMessage::Entry(entry))) => {
                inner.process(entry).await;
            }
            Ok(Some(SyncMessage::Shutdown)) | Ok(None) => break,
            Err(_) => continue,
        }
    }
    debug!("Sync consumer exiting");
}

impl Inner {
    async fn process(&self, entry: SyncEntry) -> SyncResult {
        let started = Instant::now();
        let max_attempts = self.config.retry.max_attempts();
        let mut committed: Option<String> = None;
        let mut attempt = 0;

        let (status, commit_hash, error) = loop {
            attempt += 1;
            match self.attempt(&entry, &mut committed).await {
                Ok(Attempt::NothingStaged) => break (SyncStatus::Skipped, None, None),
                Ok(Attempt::Pushed(hash)) => break (SyncStatus::Success, Some(hash), None),
                Err(e) => {
                    let message = redact(&e.to_string(), self.config.token());
                    if self.config.retry.should_retry(attempt) {
                        warn!(
                            attempt,
                            max_attempts,
                            error = %message,
                            "Sync attempt failed, retrying"
                        );
                        tokio::time::sleep(self.config.retry.delay()).await;
                        continue;
                    }
                    break (SyncStatus::Failed, committed.clone(), Some(message));
                }
            }
        };

        let result = SyncResult {
            timestamp: Utc::now(),
            files: entry.files,
            commit_hash,
            status,
            duration_ms: started.elapsed().as_secs_f64() * 1000.0,
            message: entry.message,
            attempts: attempt,
            error,
        };

        match result.status {
            SyncStatus::Success => {
                self.total_syncs.fetch_add(1, Ordering::Relaxed);
                info!(
                    commit = result.commit_hash.as_deref().unwrap_or_default(),
                    files = result.files.len(),
                    attempts = result.attempts,
                    "Sync pushed"
                );
            }
            SyncStatus::Skipped => {
                self.total_syncs.fetch_add(1, Ordering::Relaxed);
                debug!(message = %result.message, "Nothing to commit");
            }
            SyncStatus::Failed => {
                self.total_failures.fetch_add(1, Ordering::Relaxed);
                error!(
                    message = %result.message,
                    attempts = result.attempts,
                    error = result.error.as_deref().unwrap_or_default(),
                    "Sync failed"
                );
            }
        }

        if let Err(e) = self.tracker.record(&result).await {
            warn!(path = %self.tracker.path().display(), error = %e, "Failed to write sync tracker");
        }
        result
    }

    /// One pass of stage, commit and push. Once a commit exists, later
    /// passes only push it.
    async fn attempt(
        &self,
        entry: &SyncEntry,
        committed: &mut Option<String>,
    ) -> Result<Attempt, SyncError> {
        if committed.is_none() {
            let add = if entry.files.is_empty() {
                "git add -A".to_string()
            } else {
                shell::command("git add --", &entry.files)
            };
            self.run_checked("add", &add).await?;

            let diff = self.run("diff", "git diff --cached --quiet").await?;
            match diff.exit_code {
                0 => return Ok(Attempt::NothingStaged),
                1 => {}
                _ => return Err(self.git_error("diff", &diff)),
            }

            let commit = shell::command("git commit -m", [entry.message.as_str()]);
            self.run_checked("commit", &commit).await?;

            let head = self.run_checked("rev-parse", "git rev-parse --short HEAD").await?;
            *committed = Some(head.stdout.trim().to_string());
        }

        let push = shell::command("git push origin", [self.config.branch.as_str()]);
        self.run_checked("push", &push).await?;

        Ok(Attempt::Pushed(committed.clone().unwrap_or_default()))
    }

    /// Run `git_command` from the repository directory.
    async fn run(&self, step: &'static str, git_command: &str) -> Result<CommandOutput, SyncError> {
        let cmd = format!("cd {} && {}", shell::quote(&self.config.repo_dir), git_command);
        self.exec(step, &cmd).await
    }

    async fn exec(&self, step: &'static str, cmd: &str) -> Result<CommandOutput, SyncError> {
        debug!(step, "Running git");
        Ok(self
            .executor
            .run(cmd, &self.env, self.config.command_timeout)
            .await?)
    }

    async fn run_checked(
        &self,
        step: &'static str,
        git_command: &str,
    ) -> Result<CommandOutput, SyncError> {
        let output = self.run(step, git_command).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(self.git_error(step, &output))
        }
    }

    fn git_error(&self, step: &'static str, output: &CommandOutput) -> SyncError {
        SyncError::Git {
            step,
            exit_code: output.exit_code,
            stderr: redact(output.stderr.trim(), self.config.token()),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
