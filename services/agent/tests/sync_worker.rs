//! Sync worker tests against a scripted executor.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use warden_agent::{SyncConfig, SyncEntry, SyncError, SyncStatus, SyncWorker};
use warden_reconcile::RetryPolicy;
use warden_sandbox::{ClientError, CommandEnv, CommandExecutor, CommandOutput};

const STOP: Duration = Duration::from_secs(10);

struct Rule {
    needle: String,
    outputs: VecDeque<CommandOutput>,
    sticky: Option<CommandOutput>,
}

/// Records every command and answers from per-substring scripts. Commands
/// with no matching script succeed, with one staged change and a fixed
/// commit hash.
#[derive(Default)]
struct ScriptedExecutor {
    commands: Mutex<Vec<String>>,
    rules: Mutex<Vec<Rule>>,
    gate: Option<Arc<Semaphore>>,
}

impl ScriptedExecutor {
    fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Default::default()
        }
    }

    fn respond(&self, needle: &str, outputs: Vec<CommandOutput>) {
        self.rules.lock().unwrap().push(Rule {
            needle: needle.to_string(),
            outputs: outputs.into(),
            sticky: None,
        });
    }

    fn always(&self, needle: &str, output: CommandOutput) {
        self.rules.lock().unwrap().push(Rule {
            needle: needle.to_string(),
            outputs: VecDeque::new(),
            sticky: Some(output),
        });
    }

    fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    fn count(&self, needle: &str) -> usize {
        self.commands().iter().filter(|c| c.contains(needle)).count()
    }

    fn answer(&self, command: &str) -> CommandOutput {
        let mut rules = self.rules.lock().unwrap();
        for rule in rules.iter_mut().filter(|r| command.contains(&r.needle)) {
            if let Some(output) = rule.outputs.pop_front() {
                return output;
            }
            if let Some(output) = &rule.sticky {
                return output.clone();
            }
        }

        if command.contains("git diff --cached --quiet") {
            exit(1, "")
        } else if command.contains("git rev-parse") {
            CommandOutput {
                stdout: "abc1234\n".into(),
                ..Default::default()
            }
        } else {
            ok()
        }
    }
}

#[async_trait]
impl CommandExecutor for ScriptedExecutor {
    async fn run(
        &self,
        command: &str,
        _env: &CommandEnv,
        _timeout: Duration,
    ) -> Result<CommandOutput, ClientError> {
        self.commands.lock().unwrap().push(command.to_string());
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        Ok(self.answer(command))
    }

    async fn spawn_detached(&self, command: &str, _env: &CommandEnv) -> Result<(), ClientError> {
        self.commands.lock().unwrap().push(command.to_string());
        Ok(())
    }

    async fn write_file(&self, _path: &str, _contents: &[u8]) -> Result<(), ClientError> {
        Ok(())
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}

fn ok() -> CommandOutput {
    CommandOutput::default()
}

fn exit(code: i32, stderr: &str) -> CommandOutput {
    CommandOutput {
        exit_code: code,
        stderr: stderr.to_string(),
        ..Default::default()
    }
}

struct Setup {
    _dir: tempfile::TempDir,
    executor: Arc<ScriptedExecutor>,
    worker: SyncWorker,
}

fn setup_with(executor: ScriptedExecutor, tweak: impl FnOnce(&mut SyncConfig)) -> Setup {
    let dir = tempfile::tempdir().unwrap();
    let mut config = SyncConfig::new("/home/user/agent");
    config.tracker_path = dir.path().join("logs/git_tracker.jsonl");
    config.retry = RetryPolicy::new(3, Duration::from_millis(10)).unwrap();
    tweak(&mut config);

    let executor = Arc::new(executor);
    let worker = SyncWorker::new(executor.clone(), config);
    Setup {
        _dir: dir,
        executor,
        worker,
    }
}

fn setup() -> Setup {
    setup_with(ScriptedExecutor::default(), |_| {})
}

#[tokio::test]
async fn test_successful_sync_runs_full_sequence() {
    let s = setup();
    assert!(s.worker.start());
    assert!(s.worker.queue_sync(["state.json", "logs/activity.jsonl"], "cycle 12"));
    assert!(s.worker.stop(STOP).await);

    let commands = s.executor.commands();
    assert_eq!(commands.len(), 5);
    assert_eq!(
        commands[0],
        "cd /home/user/agent && git add -- state.json logs/activity.jsonl"
    );
    assert!(commands[1].ends_with("git diff --cached --quiet"));
    assert!(commands[2].ends_with("git commit -m 'cycle 12'"));
    assert!(commands[3].ends_with("git rev-parse --short HEAD"));
    assert!(commands[4].ends_with("git push origin main"));

    let results = s.worker.tracker().recent(10).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, SyncStatus::Success);
    assert_eq!(results[0].commit_hash.as_deref(), Some("abc1234"));
    assert_eq!(results[0].attempts, 1);
    assert_eq!(results[0].files, vec!["state.json", "logs/activity.jsonl"]);

    let stats = s.worker.stats();
    assert_eq!(stats.total_syncs, 1);
    assert_eq!(stats.total_failures, 0);
    assert!(!stats.running);
}

#[tokio::test]
async fn test_nothing_staged_is_skipped() {
    let s = setup();
    s.executor.respond("git diff", vec![exit(0, "")]);

    let result = s.worker.sync_now(SyncEntry::new(["state.json"], "noop")).await;

    assert_eq!(result.status, SyncStatus::Skipped);
    assert_eq!(result.commit_hash, None);
    assert_eq!(s.executor.count("git commit"), 0);
    assert_eq!(s.executor.count("git push"), 0);
    assert_eq!(s.worker.stats().total_syncs, 1);
}

#[tokio::test]
async fn test_diff_error_is_a_failure() {
    let s = setup();
    s.executor.always("git diff", exit(128, "fatal: not a git repository"));

    let result = s.worker.sync_now(SyncEntry::new(["state.json"], "broken")).await;

    assert_eq!(result.status, SyncStatus::Failed);
    assert_eq!(result.attempts, 3);
    assert!(result.error.unwrap().contains("not a git repository"));
}

#[tokio::test]
async fn test_empty_file_list_stages_everything() {
    let s = setup();
    s.worker.sync_now(SyncEntry::new(Vec::<String>::new(), "all")).await;
    assert_eq!(s.executor.commands()[0], "cd /home/user/agent && git add -A");
}

#[tokio::test]
async fn test_retry_bound_then_later_entries_processed() {
    let s = setup();
    s.executor.always("git add -- bad.json", exit(1, "fatal: pathspec did not match"));

    s.worker.start();
    assert!(s.worker.queue_sync(["bad.json"], "first"));
    assert!(s.worker.queue_sync(["good.json"], "second"));
    assert!(s.worker.stop(STOP).await);

    assert_eq!(s.executor.count("git add -- bad.json"), 3);
    assert_eq!(s.executor.count("git commit"), 1);

    let results = s.worker.tracker().recent(10).await.unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].message, "first");
    assert_eq!(results[0].status, SyncStatus::Failed);
    assert_eq!(results[0].attempts, 3);
    assert!(results[0].error.as_deref().unwrap().contains("pathspec"));
    assert_eq!(results[1].message, "second");
    assert_eq!(results[1].status, SyncStatus::Success);

    let stats = s.worker.stats();
    assert_eq!(stats.total_syncs, 1);
    assert_eq!(stats.total_failures, 1);
}

#[tokio::test]
async fn test_push_retry_does_not_recommit() {
    let s = setup();
    s.executor.respond(
        "git push",
        vec![exit(1, "rejected"), exit(1, "rejected")],
    );

    let result = s.worker.sync_now(SyncEntry::new(["state.json"], "flaky")).await;

    assert_eq!(result.status, SyncStatus::Success);
    assert_eq!(result.attempts, 3);
    assert_eq!(s.executor.count("git commit"), 1);
    assert_eq!(s.executor.count("git push"), 3);
    assert_eq!(result.commit_hash.as_deref(), Some("abc1234"));
}

#[tokio::test(start_paused = true)]
async fn test_retries_wait_fixed_delay() {
    let s = setup_with(ScriptedExecutor::default(), |c| c.retry = RetryPolicy::default());
    s.executor.always("git push", exit(1, "network unreachable"));

    let result = s.worker.sync_now(SyncEntry::new(["state.json"], "offline")).await;

    assert_eq!(result.status, SyncStatus::Failed);
    assert_eq!(result.attempts, 3);
    assert_eq!(result.commit_hash.as_deref(), Some("abc1234"));
    assert!(result.duration_ms >= 4000.0);
}

#[tokio::test]
async fn test_token_redacted_from_errors() {
    let s = setup_with(ScriptedExecutor::default(), |c| {
        c.git_token = Some("s3cret".to_string());
    });
    s.executor.always(
        "git push",
        exit(128, "fatal: unable to access 'https://s3cret@github.com/acme/brain.git/'"),
    );

    let result = s.worker.sync_now(SyncEntry::new(["state.json"], "leak")).await;

    let error = result.error.unwrap();
    assert!(!error.contains("s3cret"));
    assert!(error.contains("***"));

    let logged = std::fs::read_to_string(s.worker.tracker().path()).unwrap();
    assert!(!logged.contains("s3cret"));
}

#[tokio::test]
async fn test_not_running_rejects_and_lifecycle_is_idempotent() {
    let s = setup();
    assert!(!s.worker.queue_sync(["state.json"], "early"));
    assert!(s.worker.stop(STOP).await);

    assert!(s.worker.start());
    assert!(!s.worker.start());
    assert!(s.worker.is_running());

    assert!(s.worker.stop(STOP).await);
    assert!(s.worker.stop(STOP).await);
    assert!(!s.worker.queue_sync(["state.json"], "late"));
}

#[tokio::test]
async fn test_full_queue_rejects_without_blocking() {
    let gate = Arc::new(Semaphore::new(0));
    let s = setup_with(ScriptedExecutor::gated(gate.clone()), |c| c.queue_capacity = 1);

    s.worker.start();
    assert!(s.worker.queue_sync(["a.json"], "a"));
    while s.executor.commands().is_empty() {
        tokio::task::yield_now().await;
    }

    assert!(s.worker.queue_sync(["b.json"], "b"));
    assert!(!s.worker.queue_sync(["c.json"], "c"));
    assert_eq!(s.worker.stats().queue_size, 1);

    gate.add_permits(1000);
    assert!(s.worker.stop(STOP).await);

    let messages: Vec<_> = s
        .worker
        .tracker()
        .recent(10)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.message)
        .collect();
    assert_eq!(messages, vec!["a", "b"]);
}

#[tokio::test]
async fn test_stop_drains_queue_in_order() {
    let s = setup();
    s.worker.start();
    for i in 0..5 {
        assert!(s.worker.queue_sync([format!("file{i}.json")], format!("sync {i}")));
    }
    assert!(s.worker.stop(STOP).await);

    let results = s.worker.tracker().recent(10).await.unwrap();
    let messages: Vec<_> = results.iter().map(|r| r.message.as_str()).collect();
    assert_eq!(messages, vec!["sync 0", "sync 1", "sync 2", "sync 3", "sync 4"]);
    assert_eq!(s.worker.stats().total_syncs, 5);
}

#[tokio::test]
async fn test_stop_timeout_leaves_in_flight_sync_to_finish() {
    let gate = Arc::new(Semaphore::new(0));
    let s = setup_with(ScriptedExecutor::gated(gate.clone()), |_| {});

    s.worker.start();
    s.worker.queue_sync(["state.json"], "slow commit");
    while s.executor.commands().is_empty() {
        tokio::task::yield_now().await;
    }

    assert!(!s.worker.stop(Duration::from_millis(50)).await);
    assert!(!s.worker.is_running());

    gate.add_permits(16);
    let results = tokio::time::timeout(STOP, async {
        loop {
            let results = s.worker.tracker().recent(10).await.unwrap();
            if !results.is_empty() {
                return results;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, SyncStatus::Success);
    assert_eq!(results[0].commit_hash.as_deref(), Some("abc1234"));
    assert_eq!(s.executor.count("git commit"), 1);
    assert_eq!(s.executor.count("git push"), 1);
}

#[tokio::test]
async fn test_init_repo_clones_with_token() {
    let s = setup_with(ScriptedExecutor::default(), |c| {
        c.repo_url = Some("https://github.com/acme/brain.git".to_string());
        c.git_token = Some("tok".to_string());
        c.branch = "state".to_string();
    });

    assert!(s.worker.init_repo().await.unwrap());

    let commands = s.executor.commands();
    assert_eq!(commands[0], "git config --global user.email 'agent@warden.local'");
    assert_eq!(commands[1], "git config --global user.name warden-agent");
    assert_eq!(
        commands[2],
        "git clone --branch state 'https://tok@github.com/acme/brain.git' /home/user/agent"
    );
}

#[tokio::test]
async fn test_init_repo_tolerates_existing_checkout() {
    let s = setup_with(ScriptedExecutor::default(), |c| {
        c.repo_url = Some("https://github.com/acme/brain.git".to_string());
    });
    s.executor.respond(
        "git clone",
        vec![exit(
            128,
            "fatal: destination path '/home/user/agent' already exists and is not an empty directory.",
        )],
    );

    assert!(!s.worker.init_repo().await.unwrap());
}

#[tokio::test]
async fn test_init_repo_clone_failure_is_redacted() {
    let s = setup_with(ScriptedExecutor::default(), |c| {
        c.repo_url = Some("https://github.com/acme/brain.git".to_string());
        c.git_token = Some("tok3n".to_string());
    });
    s.executor.respond(
        "git clone",
        vec![exit(128, "fatal: Authentication failed for 'https://tok3n@github.com/'")],
    );

    match s.worker.init_repo().await {
        Err(SyncError::Git { step, stderr, .. }) => {
            assert_eq!(step, "clone");
            assert!(!stderr.contains("tok3n"));
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn test_init_repo_without_url_only_configures_identity() {
    let s = setup();
    assert!(!s.worker.init_repo().await.unwrap());
    assert_eq!(s.executor.count("git clone"), 0);
    assert_eq!(s.executor.count("git config"), 2);
}
