// src/exec/runner.rs

//! The executor loop: consumes dispatched runs, executes their processes,
//! and reports terminal records back to the runtime.
//!
//! Each run gets its own Tokio task; global parallelism is capped by a
//! semaphore. Per-rule exclusivity has already been enforced upstream by
//! the pending set, so the executor never sees two runs of a non-concurrent
//! rule at once.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::{Semaphore, mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::engine::{OutputBuffer, RunFailure, RunRecord, RuntimeEvent};
use crate::rules::{Rule, RuleSet};

use super::backup::backup_file;
use super::command::{build_shell_command, terminate_tree};
use super::hooks::dispatch_hook;

/// Capacity of the runtime to executor dispatch channel.
const DISPATCH_QUEUE_CAPACITY: usize = 32;

/// Everything the executor needs from `[general]`, copied out so run tasks
/// do not borrow the config.
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    /// Root the watcher observes; relative backup destinations resolve
    /// against it.
    pub watch_root: PathBuf,
    /// Maximum number of processes running at once.
    pub max_parallel: usize,
    /// Byte cap for captured stdout/stderr per run.
    pub max_output_bytes: usize,
    /// How long a signalled process group gets before SIGKILL.
    pub kill_grace: Duration,
    /// Remove the triggering file after a successful run.
    pub delete_after_run: bool,
}

/// Start the executor loop in the background.
///
/// Returns the dispatch sender and the kill switch the backend exposes to
/// the runtime. The loop exits when every sender is dropped.
pub(crate) fn spawn_executor(
    rules: Arc<RuleSet>,
    settings: ExecutorSettings,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
) -> (mpsc::Sender<RunRecord>, watch::Sender<bool>) {
    let (tx, mut rx) = mpsc::channel::<RunRecord>(DISPATCH_QUEUE_CAPACITY);
    let (kill_tx, kill_rx) = watch::channel(false);
    let permits = Arc::new(Semaphore::new(settings.max_parallel));
    let settings = Arc::new(settings);

    tokio::spawn(async move {
        info!(max_parallel = settings.max_parallel, "executor ready");
        while let Some(record) = rx.recv().await {
            let rules = Arc::clone(&rules);
            let settings = Arc::clone(&settings);
            let permits = Arc::clone(&permits);
            let runtime_tx = runtime_tx.clone();
            let kill_rx = kill_rx.clone();
            tokio::spawn(async move {
                run_one(record, rules, settings, permits, runtime_tx, kill_rx).await;
            });
        }
        info!("executor stopping, dispatch channel closed");
    });

    (tx, kill_tx)
}

/// Drive a single record to a terminal state, run its hook, and report the
/// completion. Every failure path is folded into the record; the completion
/// event is sent no matter what.
async fn run_one(
    mut record: RunRecord,
    rules: Arc<RuleSet>,
    settings: Arc<ExecutorSettings>,
    permits: Arc<Semaphore>,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    mut kill_rx: watch::Receiver<bool>,
) {
    let Ok(_permit) = Arc::clone(&permits).acquire_owned().await else {
        // Semaphore closed, executor torn down.
        return;
    };

    let Some(rule) = rules.get(record.trigger.rule).cloned() else {
        error!(
            run_id = record.run_id,
            rule = record.trigger.rule,
            "dispatched run references unknown rule"
        );
        record.fail(RunFailure::Spawn("unknown rule".to_string()));
        report(record, &runtime_tx).await;
        return;
    };

    execute(&mut record, &rule, &settings, &mut kill_rx).await;

    if settings.delete_after_run && record.is_success() {
        delete_trigger_file(&record, &rule).await;
    }

    dispatch_hook(&mut record, &rule, &mut kill_rx, settings.kill_grace).await;

    report(record, &runtime_tx).await;
}

async fn execute(
    record: &mut RunRecord,
    rule: &Rule,
    settings: &ExecutorSettings,
    kill_rx: &mut watch::Receiver<bool>,
) {
    // Backup first; a run whose backup failed must not start.
    if let Some(template) = &rule.backup {
        match backup_file(template, &record.trigger, record.run_id, &settings.watch_root).await {
            Ok(dest) => {
                info!(
                    rule = %rule.name,
                    run_id = record.run_id,
                    dest = %dest.display(),
                    "backup written"
                );
            }
            Err(failure) => {
                warn!(
                    rule = %rule.name,
                    run_id = record.run_id,
                    ?failure,
                    "backup failed, run aborted"
                );
                record.fail(failure);
                return;
            }
        }
    }

    let cmdline = match rule
        .process
        .render(&record.trigger.captures, record.trigger.path.as_deref())
    {
        Ok(cmdline) => cmdline,
        Err(detail) => {
            warn!(
                rule = %rule.name,
                run_id = record.run_id,
                error = %detail,
                "process template did not render"
            );
            record.fail(RunFailure::Template(detail));
            return;
        }
    };

    info!(rule = %rule.name, run_id = record.run_id, cmd = %cmdline, "starting process");

    let mut child = match build_shell_command(&cmdline).spawn() {
        Ok(child) => child,
        Err(err) => {
            error!(
                rule = %rule.name,
                run_id = record.run_id,
                error = %err,
                "failed to spawn process"
            );
            record.fail(RunFailure::Spawn(err.to_string()));
            return;
        }
    };

    record.begin();

    let output = Arc::new(Mutex::new(OutputBuffer::new(settings.max_output_bytes)));
    let mut readers = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        readers.push(spawn_capture(stdout, Arc::clone(&output), rule.name.clone(), "stdout"));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(spawn_capture(stderr, Arc::clone(&output), rule.name.clone(), "stderr"));
    }

    tokio::select! {
        status = child.wait() => match status {
            Ok(status) => {
                let code = status.code().unwrap_or(-1);
                info!(
                    rule = %rule.name,
                    run_id = record.run_id,
                    exit_code = code,
                    success = status.success(),
                    "process exited"
                );
                if status.success() {
                    record.succeed();
                } else {
                    record.fail(RunFailure::Exit(code));
                }
            }
            Err(err) => {
                error!(
                    rule = %rule.name,
                    run_id = record.run_id,
                    error = %err,
                    "failed waiting for process"
                );
                record.fail(RunFailure::Spawn(format!("waiting for process: {err}")));
            }
        },
        _ = run_timeout(rule.timeout) => {
            warn!(
                rule = %rule.name,
                run_id = record.run_id,
                timeout = ?rule.timeout,
                "timeout exceeded, killing process tree"
            );
            terminate_tree(&mut child, settings.kill_grace).await;
            record.time_out();
        }
        _ = wait_for_kill(kill_rx) => {
            warn!(rule = %rule.name, run_id = record.run_id, "run interrupted by shutdown");
            terminate_tree(&mut child, settings.kill_grace).await;
            record.fail(RunFailure::Interrupted);
        }
    }

    // Readers finish at EOF once the process group is gone.
    for reader in readers {
        let _ = reader.await;
    }

    let captured = match Arc::try_unwrap(output) {
        Ok(mutex) => mutex.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner()),
        Err(shared) => match shared.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        },
    };
    if captured.truncated() {
        debug!(rule = %rule.name, run_id = record.run_id, "captured output truncated");
    }
    record.set_output(captured);
}

/// Sleeps for the rule's timeout, or never resolves when it has none.
async fn run_timeout(timeout: Option<Duration>) {
    match timeout {
        Some(limit) => tokio::time::sleep(limit).await,
        None => std::future::pending().await,
    }
}

/// Resolves when the shutdown kill switch flips. A dropped sender counts as
/// a kill: if the runtime side is gone, runs must not linger either.
pub(crate) async fn wait_for_kill(kill_rx: &mut watch::Receiver<bool>) {
    let _ = kill_rx.wait_for(|killed| *killed).await;
}

fn spawn_capture<R>(
    stream: R,
    output: Arc<Mutex<OutputBuffer>>,
    rule: String,
    label: &'static str,
) -> tokio::task::JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(rule = %rule, "{label}: {line}");
            match output.lock() {
                Ok(mut guard) => guard.push_line(&line),
                Err(poisoned) => poisoned.into_inner().push_line(&line),
            }
        }
    })
}

/// Forward a stream to the debug log without capturing it (hook output).
pub(crate) fn spawn_debug_drain<R>(stream: R, rule: String, label: &'static str)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(rule = %rule, "{label}: {line}");
        }
    });
}

async fn delete_trigger_file(record: &RunRecord, rule: &Rule) {
    let Some(path) = record.trigger.path.as_deref() else {
        return;
    };
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            info!(
                rule = %rule.name,
                run_id = record.run_id,
                path = %path.display(),
                "triggering file deleted"
            );
        }
        Err(err) => {
            warn!(
                rule = %rule.name,
                run_id = record.run_id,
                path = %path.display(),
                error = %err,
                "could not delete triggering file"
            );
        }
    }
}

async fn report(record: RunRecord, runtime_tx: &mpsc::Sender<RuntimeEvent>) {
    let run_id = record.run_id;
    let event = RuntimeEvent::RunFinished {
        record: Box::new(record),
    };
    if runtime_tx.send(event).await.is_err() {
        warn!(run_id, "runtime gone, dropping completion report");
    }
}
