// tests/process_runner.rs

//! End-to-end tests for the real executor backend: spawning, output capture,
//! timeouts, hooks, the kill switch and the parallelism cap. Each test plays
//! the runtime's part: it dispatches hand-made run records and collects the
//! `RunFinished` reports.

use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, timeout};

use watchrun::config::ConfigFile;
use watchrun::engine::{
    HookKind, HookOutcome, RunFailure, RunRecord, RunState, RuntimeEvent, Trigger,
};
use watchrun::exec::{ExecutorBackend, ExecutorSettings, RealExecutorBackend};
use watchrun::rules::{CaptureSet, RuleSet};
use watchrun_test_utils::builders::{ConfigFileBuilder, RuleConfigBuilder};
use watchrun_test_utils::init_tracing;

type TestResult = Result<(), Box<dyn Error>>;

fn settings(watch_root: &Path) -> ExecutorSettings {
    ExecutorSettings {
        watch_root: watch_root.to_path_buf(),
        max_parallel: 4,
        max_output_bytes: 64 * 1024,
        kill_grace: Duration::from_millis(200),
        delete_after_run: false,
    }
}

/// Stands in for the runtime: owns the backend and the completion channel.
struct Harness {
    rules: Arc<RuleSet>,
    backend: RealExecutorBackend,
    events: mpsc::Receiver<RuntimeEvent>,
    next_run: u64,
}

impl Harness {
    fn new(cfg: &ConfigFile, settings: ExecutorSettings) -> Result<Self, Box<dyn Error>> {
        let rules = Arc::new(RuleSet::compile(cfg)?);
        let (tx, rx) = mpsc::channel(8);
        let backend = RealExecutorBackend::new(Arc::clone(&rules), settings, tx);
        Ok(Self {
            rules,
            backend,
            events: rx,
            next_run: 0,
        })
    }

    /// Captures for the first rule matching `rel_path`.
    fn captures_for(&self, rel_path: &str) -> CaptureSet {
        self.rules
            .match_event(rel_path)
            .into_iter()
            .next()
            .map(|(_, captures)| captures)
            .unwrap_or_default()
    }

    async fn dispatch(
        &mut self,
        rule: usize,
        path: Option<PathBuf>,
        captures: CaptureSet,
    ) -> TestResult {
        self.next_run += 1;
        let record = RunRecord::new(
            self.next_run,
            Trigger {
                rule,
                path,
                captures,
                at: Instant::now(),
                seq: self.next_run,
            },
        );
        self.backend.dispatch(record).await?;
        Ok(())
    }

    async fn finished(&mut self) -> Result<RunRecord, Box<dyn Error>> {
        let event = timeout(Duration::from_secs(5), self.events.recv())
            .await?
            .ok_or("executor dropped its completion channel")?;
        match event {
            RuntimeEvent::RunFinished { record } => Ok(*record),
            other => Err(format!("unexpected runtime event: {other:?}").into()),
        }
    }

    async fn run(
        &mut self,
        rule: usize,
        path: Option<PathBuf>,
        captures: CaptureSet,
    ) -> Result<RunRecord, Box<dyn Error>> {
        self.dispatch(rule, path, captures).await?;
        self.finished().await
    }
}

#[cfg(unix)]
#[tokio::test]
async fn successful_run_records_exit_zero_and_output() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;

    let cfg = ConfigFileBuilder::new()
        .with_rule(
            RuleConfigBuilder::new("printf 'hello %s' {0}")
                .event(r"in/(\w+)\.txt")
                .build(),
        )
        .build();
    let mut harness = Harness::new(&cfg, settings(dir.path()))?;

    let captures = harness.captures_for("in/a.txt");
    let path = dir.path().join("in/a.txt");
    let record = harness.run(0, Some(path), captures).await?;

    assert_eq!(record.state(), RunState::Succeeded);
    assert!(record.is_success());
    assert_eq!(record.exit_code(), Some(0));
    assert!(record.failure().is_none());
    assert!(record.started_at().is_some());
    assert!(record.finished_at().is_some());
    assert!(record.output().text().contains("hello a"));
    assert!(record.hook().is_none());
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn nonzero_exit_fails_the_run_and_fires_the_fail_hook() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let marker = dir.path().join("fail-marker");

    let cfg = ConfigFileBuilder::new()
        .with_rule(
            RuleConfigBuilder::new("exit 3")
                .event(r"in/(\w+)\.txt")
                .fail(&format!("touch {}", marker.display()))
                .build(),
        )
        .build();
    let mut harness = Harness::new(&cfg, settings(dir.path()))?;

    let captures = harness.captures_for("in/a.txt");
    let record = harness
        .run(0, Some(dir.path().join("in/a.txt")), captures)
        .await?;

    assert_eq!(record.state(), RunState::Failed);
    assert_eq!(record.failure(), Some(&RunFailure::Exit(3)));
    assert_eq!(record.exit_code(), Some(3));

    let hook = record.hook().ok_or("fail hook did not run")?;
    assert_eq!(hook.kind, HookKind::Fail);
    assert_eq!(hook.outcome, HookOutcome::Exited(0));
    assert!(marker.exists());
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn success_hook_runs_with_the_rule_captures() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;

    let cfg = ConfigFileBuilder::new()
        .with_rule(
            RuleConfigBuilder::new("true")
                .event(r"in/(\w+)\.txt")
                .success(&format!("touch {}/done-{{0}}", dir.path().display()))
                .build(),
        )
        .build();
    let mut harness = Harness::new(&cfg, settings(dir.path()))?;

    let captures = harness.captures_for("in/a.txt");
    let record = harness
        .run(0, Some(dir.path().join("in/a.txt")), captures)
        .await?;

    assert_eq!(record.state(), RunState::Succeeded);
    let hook = record.hook().ok_or("success hook did not run")?;
    assert_eq!(hook.kind, HookKind::Success);
    assert_eq!(hook.outcome, HookOutcome::Exited(0));
    assert!(dir.path().join("done-a").exists());
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn timeout_kills_the_whole_process_tree() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let marker = dir.path().join("timed-out");

    // `sleep` runs as a child of the shell; killing only the shell would
    // leave it behind and `wait` would block forever.
    let cfg = ConfigFileBuilder::new()
        .with_rule(
            RuleConfigBuilder::new("sleep 300 & wait")
                .event(r"in/(\w+)\.txt")
                .timeout(1)
                .fail(&format!("touch {}", marker.display()))
                .build(),
        )
        .build();
    let mut harness = Harness::new(&cfg, settings(dir.path()))?;

    let started = std::time::Instant::now();
    let captures = harness.captures_for("in/a.txt");
    let record = harness
        .run(0, Some(dir.path().join("in/a.txt")), captures)
        .await?;

    assert_eq!(record.state(), RunState::TimedOut);
    assert!(record.exit_code().is_none());
    assert!(started.elapsed() < Duration::from_secs(4));

    let hook = record.hook().ok_or("fail hook did not run")?;
    assert_eq!(hook.kind, HookKind::Fail);
    assert!(marker.exists());
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn output_is_truncated_at_the_byte_limit() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;

    let cfg = ConfigFileBuilder::new()
        .with_rule(
            RuleConfigBuilder::new("printf 'aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\\n'")
                .event(r"in/(\w+)\.txt")
                .build(),
        )
        .build();
    let mut settings = settings(dir.path());
    settings.max_output_bytes = 16;
    let mut harness = Harness::new(&cfg, settings)?;

    let captures = harness.captures_for("in/a.txt");
    let record = harness
        .run(0, Some(dir.path().join("in/a.txt")), captures)
        .await?;

    assert_eq!(record.state(), RunState::Succeeded);
    assert!(record.output().truncated());
    assert!(record.output().len() <= 16);
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn file_placeholder_renders_the_triggering_path() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;

    std::fs::create_dir_all(dir.path().join("in"))?;
    let path = dir.path().join("in/a.txt");
    std::fs::write(&path, "payload\n")?;

    let cfg = ConfigFileBuilder::new()
        .with_rule(
            RuleConfigBuilder::new("cat {file}")
                .event(r"in/(\w+)\.txt")
                .build(),
        )
        .build();
    let mut harness = Harness::new(&cfg, settings(dir.path()))?;

    let captures = harness.captures_for("in/a.txt");
    let record = harness.run(0, Some(path), captures).await?;

    assert_eq!(record.state(), RunState::Succeeded);
    assert!(record.output().text().contains("payload"));
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn trigger_file_is_deleted_after_a_successful_run() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;

    std::fs::create_dir_all(dir.path().join("in"))?;
    let path = dir.path().join("in/a.txt");
    std::fs::write(&path, "spent\n")?;

    let cfg = ConfigFileBuilder::new()
        .with_rule(RuleConfigBuilder::new("true").event(r"in/(\w+)\.txt").build())
        .build();
    let mut settings = settings(dir.path());
    settings.delete_after_run = true;
    let mut harness = Harness::new(&cfg, settings)?;

    let captures = harness.captures_for("in/a.txt");
    let record = harness.run(0, Some(path.clone()), captures).await?;

    assert_eq!(record.state(), RunState::Succeeded);
    assert!(!path.exists());
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn failed_runs_keep_their_trigger_file() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;

    std::fs::create_dir_all(dir.path().join("in"))?;
    let path = dir.path().join("in/a.txt");
    std::fs::write(&path, "keep me\n")?;

    let cfg = ConfigFileBuilder::new()
        .with_rule(RuleConfigBuilder::new("false").event(r"in/(\w+)\.txt").build())
        .build();
    let mut settings = settings(dir.path());
    settings.delete_after_run = true;
    let mut harness = Harness::new(&cfg, settings)?;

    let captures = harness.captures_for("in/a.txt");
    let record = harness.run(0, Some(path.clone()), captures).await?;

    assert_eq!(record.state(), RunState::Failed);
    assert!(path.exists());
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn terminate_all_interrupts_running_processes_without_hooks() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let marker = dir.path().join("hook-ran");

    let cfg = ConfigFileBuilder::new()
        .with_rule(
            RuleConfigBuilder::new("sleep 300 & wait")
                .event(r"in/(\w+)\.txt")
                .fail(&format!("touch {}", marker.display()))
                .build(),
        )
        .build();
    let mut harness = Harness::new(&cfg, settings(dir.path()))?;

    let captures = harness.captures_for("in/a.txt");
    harness
        .dispatch(0, Some(dir.path().join("in/a.txt")), captures)
        .await?;

    // Give the process a moment to spawn, then pull the kill switch.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let started = std::time::Instant::now();
    harness.backend.terminate_all();

    let record = harness.finished().await?;
    assert_eq!(record.state(), RunState::Failed);
    assert_eq!(record.failure(), Some(&RunFailure::Interrupted));
    assert!(record.hook().is_none());
    assert!(!marker.exists());
    assert!(started.elapsed() < Duration::from_secs(3));
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn max_parallel_serializes_excess_runs() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;

    let cfg = ConfigFileBuilder::new()
        .with_rule(
            RuleConfigBuilder::new("sleep 0.3")
                .event(r"in/(\w+)\.txt")
                .concurrent(true)
                .build(),
        )
        .build();
    let mut settings = settings(dir.path());
    settings.max_parallel = 1;
    let mut harness = Harness::new(&cfg, settings)?;

    let started = std::time::Instant::now();
    let captures = harness.captures_for("in/a.txt");
    harness
        .dispatch(0, Some(dir.path().join("in/a.txt")), captures)
        .await?;
    let captures = harness.captures_for("in/b.txt");
    harness
        .dispatch(0, Some(dir.path().join("in/b.txt")), captures)
        .await?;

    let first = harness.finished().await?;
    let second = harness.finished().await?;
    assert_eq!(first.state(), RunState::Succeeded);
    assert_eq!(second.state(), RunState::Succeeded);

    // Two 300ms sleeps sharing one permit cannot overlap.
    assert!(started.elapsed() >= Duration::from_millis(550));
    Ok(())
}

#[tokio::test]
async fn records_for_unknown_rules_are_reported_as_failed() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;

    let cfg = ConfigFileBuilder::new()
        .with_rule(RuleConfigBuilder::new("true").event(r"in/(\w+)\.txt").build())
        .build();
    let mut harness = Harness::new(&cfg, settings(dir.path()))?;

    harness
        .dispatch(99, Some(dir.path().join("in/a.txt")), CaptureSet::default())
        .await?;

    let record = harness.finished().await?;
    assert_eq!(record.state(), RunState::Failed);
    assert!(matches!(record.failure(), Some(RunFailure::Spawn(_))));
    Ok(())
}
