// tests/runtime_pipeline.rs

//! Runtime event-loop tests against fake executor backends: debounced
//! dispatch, rule fan-out, exclusivity back-pressure and the
//! drain-then-kill shutdown path.

use std::error::Error;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Notify, mpsc, watch};
use tokio::time::{Instant, timeout};

use watchrun::config::ConfigFile;
use watchrun::engine::{
    RunFailure, RunRecord, Runtime, RuntimeEvent, RuntimeOptions,
};
use watchrun::exec::ExecutorBackend;
use watchrun::rules::{CaptureSet, RuleId, RuleSet};
use watchrun::watch::{ChangeKind, RawEvent};
use watchrun_test_utils::builders::{ConfigFileBuilder, RuleConfigBuilder};
use watchrun_test_utils::fake_executor::FakeExecutor;
use watchrun_test_utils::init_tracing;

type TestResult = Result<(), Box<dyn Error>>;

fn csv_config() -> ConfigFile {
    ConfigFileBuilder::new()
        .with_rule(
            RuleConfigBuilder::new("load.sh {0}")
                .name("csv")
                .event(r"data/(.*)\.csv")
                .build(),
        )
        .build()
}

fn options() -> RuntimeOptions {
    RuntimeOptions {
        coalesce_window: Duration::from_millis(50),
        drain_timeout: Duration::from_secs(5),
    }
}

fn path_event(path: &str, seq: u64) -> RuntimeEvent {
    RuntimeEvent::PathChanged(RawEvent {
        path: PathBuf::from(path),
        kind: ChangeKind::Modified,
        at: Instant::now(),
        seq,
    })
}

async fn wait_for_count(executed: &Arc<Mutex<Vec<RuleId>>>, count: usize) {
    for _ in 0..200 {
        if executed.lock().unwrap().len() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("expected at least {count} dispatched runs");
}

#[tokio::test]
async fn quick_events_on_one_path_collapse_into_a_single_run() -> TestResult {
    init_tracing();

    let rules = Arc::new(RuleSet::compile(&csv_config())?);
    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(16);
    let (executor, executed) = FakeExecutor::new(rt_tx.clone());

    let runtime = Runtime::new(
        Arc::clone(&rules),
        PathBuf::from("/watch"),
        options(),
        rt_rx,
        executor,
    );
    let handle = tokio::spawn(runtime.run());

    // A save-twice burst: two events, well inside the window.
    rt_tx.send(path_event("/watch/data/1.csv", 1)).await?;
    rt_tx.send(path_event("/watch/data/1.csv", 2)).await?;

    wait_for_count(&executed, 1).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(executed.lock().unwrap().len(), 1);

    rt_tx.send(RuntimeEvent::ShutdownRequested).await?;
    let stats = timeout(Duration::from_secs(2), handle).await??;
    let stats = stats?;
    assert_eq!(stats.succeeded, 1);
    Ok(())
}

#[tokio::test]
async fn one_path_fires_every_matching_rule() -> TestResult {
    init_tracing();

    let cfg = ConfigFileBuilder::new()
        .with_rule(RuleConfigBuilder::new("a.sh").event(r"data/.*").build())
        .with_rule(RuleConfigBuilder::new("b.sh").event(r".*\.csv").build())
        .build();
    let rules = Arc::new(RuleSet::compile(&cfg)?);

    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(16);
    let (executor, executed) = FakeExecutor::new(rt_tx.clone());

    let runtime = Runtime::new(
        Arc::clone(&rules),
        PathBuf::from("/watch"),
        options(),
        rt_rx,
        executor,
    );
    let handle = tokio::spawn(runtime.run());

    rt_tx.send(path_event("/watch/data/x.csv", 1)).await?;

    wait_for_count(&executed, 2).await;
    let mut fired = executed.lock().unwrap().clone();
    fired.sort_unstable();
    assert_eq!(fired, vec![0, 1]);

    rt_tx.send(RuntimeEvent::ShutdownRequested).await?;
    let _ = timeout(Duration::from_secs(2), handle).await?;
    Ok(())
}

#[tokio::test]
async fn cron_fires_join_the_same_pipeline() -> TestResult {
    init_tracing();

    let cfg = ConfigFileBuilder::new()
        .with_rule(RuleConfigBuilder::new("daily.sh").schedule("0 9 * * *").build())
        .build();
    let rules = Arc::new(RuleSet::compile(&cfg)?);

    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(16);
    let (executor, executed) = FakeExecutor::new(rt_tx.clone());

    let runtime = Runtime::new(
        Arc::clone(&rules),
        PathBuf::from("/watch"),
        options(),
        rt_rx,
        executor,
    );
    let handle = tokio::spawn(runtime.run());

    rt_tx
        .send(RuntimeEvent::CronFired {
            rule: 0,
            captures: CaptureSet::default(),
        })
        .await?;

    wait_for_count(&executed, 1).await;

    rt_tx.send(RuntimeEvent::ShutdownRequested).await?;
    let stats = timeout(Duration::from_secs(2), handle).await??;
    assert_eq!(stats?.succeeded, 1);
    Ok(())
}

#[tokio::test]
async fn watch_failure_stops_the_runtime_with_an_error() -> TestResult {
    init_tracing();

    let rules = Arc::new(RuleSet::compile(&csv_config())?);
    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(16);
    let (executor, _executed) = FakeExecutor::new(rt_tx.clone());

    let runtime = Runtime::new(
        Arc::clone(&rules),
        PathBuf::from("/watch"),
        options(),
        rt_rx,
        executor,
    );
    let handle = tokio::spawn(runtime.run());

    rt_tx
        .send(RuntimeEvent::WatchFailed {
            error: "all watched directories are gone".to_string(),
        })
        .await?;

    let result = timeout(Duration::from_secs(2), handle).await??;
    assert!(result.is_err());
    Ok(())
}

/// A fake executor whose runs finish only when the test says so.
struct GatedExecutor {
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    /// File names of runs that have been started.
    started: Arc<Mutex<Vec<String>>>,
    /// One permit per `notify_one` lets one waiting run succeed.
    proceed: Arc<Notify>,
    kill: watch::Sender<bool>,
}

impl GatedExecutor {
    fn new(runtime_tx: mpsc::Sender<RuntimeEvent>) -> Self {
        let (kill, _) = watch::channel(false);
        Self {
            runtime_tx,
            started: Arc::new(Mutex::new(Vec::new())),
            proceed: Arc::new(Notify::new()),
            kill,
        }
    }
}

fn run_label(record: &RunRecord) -> String {
    record
        .trigger
        .path
        .as_ref()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("rule{}", record.trigger.rule))
}

impl ExecutorBackend for GatedExecutor {
    fn dispatch(
        &mut self,
        record: RunRecord,
    ) -> Pin<Box<dyn Future<Output = watchrun::errors::Result<()>> + Send + '_>> {
        let tx = self.runtime_tx.clone();
        let started = Arc::clone(&self.started);
        let proceed = Arc::clone(&self.proceed);
        let mut kill_rx = self.kill.subscribe();

        Box::pin(async move {
            // Detach so the runtime loop keeps spinning while the run waits.
            tokio::spawn(async move {
                let mut record = record;
                started.lock().unwrap().push(run_label(&record));
                record.begin();

                tokio::select! {
                    _ = proceed.notified() => record.succeed(),
                    _ = kill_rx.wait_for(|killed| *killed) => {
                        record.fail(RunFailure::Interrupted)
                    }
                }

                let _ = tx
                    .send(RuntimeEvent::RunFinished {
                        record: Box::new(record),
                    })
                    .await;
            });
            Ok(())
        })
    }

    fn terminate_all(&mut self) {
        let _ = self.kill.send_replace(true);
    }
}

async fn wait_for_start(started: &Arc<Mutex<Vec<String>>>, name: &str) {
    for _ in 0..200 {
        {
            let guard = started.lock().unwrap();
            if guard.iter().any(|s| s == name) {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("Run for {} did not start", name);
}

#[tokio::test]
async fn exclusive_rule_holds_the_next_run_until_the_first_finishes() -> TestResult {
    init_tracing();

    let rules = Arc::new(RuleSet::compile(&csv_config())?);
    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(16);
    let executor = GatedExecutor::new(rt_tx.clone());
    let started = Arc::clone(&executor.started);
    let proceed = Arc::clone(&executor.proceed);

    let runtime = Runtime::new(
        Arc::clone(&rules),
        PathBuf::from("/watch"),
        options(),
        rt_rx,
        executor,
    );
    let handle = tokio::spawn(runtime.run());

    rt_tx.send(path_event("/watch/data/1.csv", 1)).await?;
    wait_for_start(&started, "1.csv").await;

    // A second trigger for the same rule becomes due but is held.
    rt_tx.send(path_event("/watch/data/2.csv", 2)).await?;
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(started.lock().unwrap().len(), 1);

    // First run completes; the held trigger is released.
    proceed.notify_one();
    wait_for_start(&started, "2.csv").await;

    proceed.notify_one();
    rt_tx.send(RuntimeEvent::ShutdownRequested).await?;
    let stats = timeout(Duration::from_secs(2), handle).await??;
    assert_eq!(stats?.succeeded, 2);
    Ok(())
}

#[tokio::test]
async fn shutdown_discards_pending_triggers_and_drains_in_flight_runs() -> TestResult {
    init_tracing();

    let rules = Arc::new(RuleSet::compile(&csv_config())?);
    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(16);
    let executor = GatedExecutor::new(rt_tx.clone());
    let started = Arc::clone(&executor.started);
    let proceed = Arc::clone(&executor.proceed);

    let runtime = Runtime::new(
        Arc::clone(&rules),
        PathBuf::from("/watch"),
        options(),
        rt_rx,
        executor,
    );
    let handle = tokio::spawn(runtime.run());

    rt_tx.send(path_event("/watch/data/1.csv", 1)).await?;
    wait_for_start(&started, "1.csv").await;

    // This one is still pending when shutdown arrives: it must be dropped.
    rt_tx.send(path_event("/watch/data/2.csv", 2)).await?;
    rt_tx.send(RuntimeEvent::ShutdownRequested).await?;

    // Let the in-flight run finish during the drain.
    proceed.notify_one();

    let stats = timeout(Duration::from_secs(2), handle).await??;
    let stats = stats?;
    assert_eq!(stats.succeeded, 1);
    assert_eq!(stats.total(), 1);
    assert_eq!(started.lock().unwrap().as_slice(), ["1.csv"]);
    Ok(())
}

#[tokio::test]
async fn drain_timeout_escalates_to_terminate_all() -> TestResult {
    init_tracing();

    let rules = Arc::new(RuleSet::compile(&csv_config())?);
    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(16);
    let executor = GatedExecutor::new(rt_tx.clone());
    let started = Arc::clone(&executor.started);

    let options = RuntimeOptions {
        coalesce_window: Duration::from_millis(50),
        drain_timeout: Duration::from_millis(200),
    };
    let runtime = Runtime::new(
        Arc::clone(&rules),
        PathBuf::from("/watch"),
        options,
        rt_rx,
        executor,
    );
    let handle = tokio::spawn(runtime.run());

    rt_tx.send(path_event("/watch/data/1.csv", 1)).await?;
    wait_for_start(&started, "1.csv").await;

    // Never allow completion: the drain must time out and kill the run.
    rt_tx.send(RuntimeEvent::ShutdownRequested).await?;

    let stats = timeout(Duration::from_secs(3), handle).await??;
    let stats = stats?;
    assert_eq!(stats.succeeded, 0);
    assert_eq!(stats.failed, 1);
    Ok(())
}
