// src/engine/runtime.rs

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::engine::record::{RunRecord, RunState, Trigger};
use crate::engine::scheduler::PendingSet;
use crate::errors::Result;
use crate::exec::ExecutorBackend;
use crate::rules::{CaptureSet, RuleId, RuleSet};
use crate::watch::{relative_str, RawEvent};

/// Events sent into the runtime from the watcher, the cron scheduler, the
/// executor, or external signals.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// A normalized filesystem event from the watcher.
    PathChanged(RawEvent),

    /// A scheduled rule fired, with the firing time already turned into
    /// captures.
    CronFired { rule: RuleId, captures: CaptureSet },

    /// A run reached a terminal state; the record comes home.
    RunFinished { record: Box<RunRecord> },

    /// File watching is irrecoverably broken.
    WatchFailed { error: String },

    /// Ctrl-C (or equivalent); drain and exit.
    ShutdownRequested,
}

/// Counters reported when the runtime exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub succeeded: u64,
    pub failed: u64,
    pub timed_out: u64,
}

impl RunStats {
    pub fn total(&self) -> u64 {
        self.succeeded + self.failed + self.timed_out
    }

    fn record(&mut self, state: RunState) {
        match state {
            RunState::Succeeded => self.succeeded += 1,
            RunState::TimedOut => self.timed_out += 1,
            _ => self.failed += 1,
        }
    }
}

/// Knobs the runtime takes from `[general]`.
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    /// Debounce window applied to every trigger.
    pub coalesce_window: Duration,

    /// How long shutdown waits for in-flight runs before force-killing them.
    pub drain_timeout: Duration,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            coalesce_window: Duration::from_millis(200),
            drain_timeout: Duration::from_secs(10),
        }
    }
}

/// The supervisor: one event loop over everything that can happen.
///
/// It consumes `RuntimeEvent`s from the watcher, the cron ticker, the
/// executor and the Ctrl-C task, matches changed paths against the rule
/// set, debounces triggers and enforces per-rule exclusivity through
/// [`PendingSet`], and dispatches due triggers to the executor backend
/// while accounting for completions. The only timers involved are the
/// debounce deadlines of the pending set.
pub struct Runtime<E: ExecutorBackend> {
    rules: Arc<RuleSet>,
    watch_root: PathBuf,
    pending: PendingSet,
    options: RuntimeOptions,
    events_rx: mpsc::Receiver<RuntimeEvent>,
    executor: E,
    stats: RunStats,
    in_flight: usize,
    next_run_id: u64,
}

impl<E: ExecutorBackend> Runtime<E> {
    pub fn new(
        rules: Arc<RuleSet>,
        watch_root: PathBuf,
        options: RuntimeOptions,
        events_rx: mpsc::Receiver<RuntimeEvent>,
        executor: E,
    ) -> Self {
        let exclusive = rules.iter().map(|rule| !rule.concurrent).collect();
        let pending = PendingSet::new(options.coalesce_window, exclusive);

        Self {
            rules,
            watch_root,
            pending,
            options,
            events_rx,
            executor,
            stats: RunStats::default(),
            in_flight: 0,
            next_run_id: 1,
        }
    }

    /// Main event loop. Returns the run counters on clean shutdown.
    pub async fn run(mut self) -> Result<RunStats> {
        info!("watchrun runtime started");

        loop {
            self.dispatch_ready().await?;

            let deadline = self.pending.next_deadline();
            let event = tokio::select! {
                maybe = self.events_rx.recv() => match maybe {
                    Some(event) => event,
                    None => {
                        // Every producer is gone; nothing can trigger again.
                        info!("event channel closed, stopping runtime");
                        return self.shutdown().await;
                    }
                },
                _ = wait_until(deadline) => continue,
            };

            debug!(?event, "runtime event");

            match event {
                RuntimeEvent::PathChanged(raw) => self.handle_path_changed(raw),
                RuntimeEvent::CronFired { rule, captures } => {
                    self.handle_cron_fired(rule, captures)
                }
                RuntimeEvent::RunFinished { record } => self.handle_run_finished(*record),
                RuntimeEvent::WatchFailed { error } => {
                    error!(error = %error, "file watching failed");
                    return Err(anyhow!("file watching failed: {error}").into());
                }
                RuntimeEvent::ShutdownRequested => {
                    info!("shutdown requested");
                    return self.shutdown().await;
                }
            }
        }
    }

    /// Match a changed path against the rule set and queue the triggers.
    fn handle_path_changed(&mut self, raw: RawEvent) {
        let rules = Arc::clone(&self.rules);

        let Some(rel) = relative_str(&self.watch_root, &raw.path) else {
            warn!(
                path = %raw.path.display(),
                root = %self.watch_root.display(),
                "event path is outside the watch root, ignoring"
            );
            return;
        };

        for (rule_id, captures) in rules.match_event(&rel) {
            info!(
                rule = %self.rule_name(rule_id),
                path = %rel,
                kind = ?raw.kind,
                "rule matched, trigger queued"
            );
            self.pending.insert(Trigger {
                rule: rule_id,
                path: Some(raw.path.clone()),
                captures,
                at: raw.at,
                seq: raw.seq,
            });
        }
    }

    fn handle_cron_fired(&mut self, rule: RuleId, captures: CaptureSet) {
        info!(rule = %self.rule_name(rule), "schedule fired, trigger queued");
        self.pending.insert(Trigger {
            rule,
            path: None,
            captures,
            at: Instant::now(),
            seq: 0,
        });
    }

    /// Hand every due, unblocked trigger to the executor.
    async fn dispatch_ready(&mut self) -> Result<()> {
        for trigger in self.pending.take_ready(Instant::now()) {
            let run_id = self.next_run_id;
            self.next_run_id += 1;

            debug!(
                rule = %self.rule_name(trigger.rule),
                run_id,
                "dispatching run to executor"
            );

            let record = RunRecord::new(run_id, trigger);
            self.in_flight += 1;

            if let Err(err) = self.executor.dispatch(record).await {
                error!(error = %err, "failed to send run to executor");
                // If the executor channel is closed, there's not much we can
                // do. Bubble up the error so higher layers can decide.
                return Err(err);
            }
        }
        Ok(())
    }

    fn handle_run_finished(&mut self, record: RunRecord) {
        self.in_flight = self.in_flight.saturating_sub(1);
        self.pending.release(record.trigger.rule);
        self.stats.record(record.state());

        let rule = self.rule_name(record.trigger.rule).to_string();
        match record.state() {
            RunState::Succeeded => {
                info!(rule = %rule, run_id = record.run_id, "run succeeded");
            }
            RunState::TimedOut => {
                warn!(rule = %rule, run_id = record.run_id, "run timed out");
            }
            RunState::Failed => {
                warn!(
                    rule = %rule,
                    run_id = record.run_id,
                    failure = ?record.failure(),
                    "run failed"
                );
            }
            state => {
                warn!(
                    rule = %rule,
                    run_id = record.run_id,
                    ?state,
                    "run finished in a non-terminal state"
                );
            }
        }
    }

    /// Drain-then-kill shutdown:
    ///
    /// 1. Pending (not yet dispatched) triggers are discarded.
    /// 2. In-flight runs get `drain_timeout` to finish naturally.
    /// 3. Whatever is still running is force-killed through the backend; the
    ///    killed runs still report back as interrupted, within a second
    ///    bounded wait.
    async fn shutdown(mut self) -> Result<RunStats> {
        let discarded = self.pending.clear();
        if discarded > 0 {
            info!(discarded, "discarded pending triggers");
        }

        if self.in_flight > 0 {
            info!(
                in_flight = self.in_flight,
                "waiting for in-flight runs to finish"
            );
            let deadline = Instant::now() + self.options.drain_timeout;
            self.drain_until(deadline).await;
        }

        if self.in_flight > 0 {
            warn!(
                in_flight = self.in_flight,
                "drain timeout expired, force-killing remaining runs"
            );
            self.executor.terminate_all();

            let deadline = Instant::now() + self.options.drain_timeout;
            self.drain_until(deadline).await;

            if self.in_flight > 0 {
                warn!(in_flight = self.in_flight, "giving up on unreported runs");
            }
        }

        info!(
            succeeded = self.stats.succeeded,
            failed = self.stats.failed,
            timed_out = self.stats.timed_out,
            "watchrun runtime exiting"
        );
        Ok(self.stats)
    }

    async fn drain_until(&mut self, deadline: Instant) {
        while self.in_flight > 0 {
            match tokio::time::timeout_at(deadline, self.events_rx.recv()).await {
                Ok(Some(RuntimeEvent::RunFinished { record })) => {
                    self.handle_run_finished(*record)
                }
                Ok(Some(other)) => debug!(?other, "ignoring event during shutdown"),
                Ok(None) => break,
                Err(_) => break,
            }
        }
    }

    fn rule_name(&self, rule: RuleId) -> &str {
        self.rules.get(rule).map(|r| r.name.as_str()).unwrap_or("?")
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
