// src/engine/record.rs

//! Run records: the single source of truth for one rule execution.
//!
//! A [`RunRecord`] is created when a trigger is dispatched, owned by exactly
//! one executor task while it runs, and handed back to the runtime inside
//! `RuntimeEvent::RunFinished`. State only moves forward; once a record is
//! terminal, later transitions are dropped.

use std::path::PathBuf;

use tokio::time::Instant;

use crate::rules::{CaptureSet, RuleId};

/// A single matched occurrence of a rule: which rule fired, for what path
/// (if any), with which captures.
#[derive(Debug, Clone)]
pub struct Trigger {
    pub rule: RuleId,

    /// Absolute path of the triggering file; `None` for scheduled rules.
    pub path: Option<PathBuf>,

    pub captures: CaptureSet,

    /// Timestamp of the (latest coalesced) event.
    pub at: Instant,

    /// Watcher arrival stamp; 0 for cron triggers.
    pub seq: u64,
}

/// Lifecycle state of a run.
///
/// Monotonic: `Pending` → `Running` → one of the terminal states. A failure
/// before the process ever starts (backup, template) jumps straight from
/// `Pending` to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Pending,
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Succeeded | RunState::Failed | RunState::TimedOut
        )
    }
}

/// Why a run failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunFailure {
    /// The process exited with a non-zero code (-1 when killed by a signal).
    Exit(i32),
    /// The process could not be spawned or awaited.
    Spawn(String),
    /// A template did not render. Load-time validation makes this
    /// unreachable in practice.
    Template(String),
    /// The pre-run backup copy failed; the process was never started.
    Backup(String),
    /// The run was force-killed during shutdown.
    Interrupted,
}

/// Which hook a finished run calls for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    Success,
    Fail,
}

/// How a hook invocation went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookOutcome {
    Exited(i32),
    SpawnFailed(String),
    RenderFailed(String),
    Interrupted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookReport {
    pub kind: HookKind,
    pub outcome: HookOutcome,
}

/// Bounded capture of a run's interleaved stdout/stderr.
///
/// Lines past the byte limit are dropped and the buffer is marked truncated;
/// the run itself is never failed for being chatty.
#[derive(Clone, Default)]
pub struct OutputBuffer {
    bytes: Vec<u8>,
    limit: usize,
    truncated: bool,
}

impl OutputBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            bytes: Vec::new(),
            limit,
            truncated: false,
        }
    }

    /// Append one line (plus newline), respecting the byte limit.
    pub fn push_line(&mut self, line: &str) {
        if self.truncated {
            return;
        }

        let available = self.limit.saturating_sub(self.bytes.len());
        let needed = line.len() + 1;

        if needed <= available {
            self.bytes.extend_from_slice(line.as_bytes());
            self.bytes.push(b'\n');
        } else {
            self.bytes.extend_from_slice(&line.as_bytes()[..available.min(line.len())]);
            self.truncated = true;
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }

    pub fn truncated(&self) -> bool {
        self.truncated
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

// Keep `debug!(?record)` readable: the captured bytes are summarized, not
// dumped.
impl std::fmt::Debug for OutputBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputBuffer")
            .field("len", &self.bytes.len())
            .field("truncated", &self.truncated)
            .finish()
    }
}

/// Record of one run of a rule, from dispatch to terminal state.
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub run_id: u64,
    pub trigger: Trigger,
    state: RunState,
    failure: Option<RunFailure>,
    started_at: Option<Instant>,
    finished_at: Option<Instant>,
    output: OutputBuffer,
    hook: Option<HookReport>,
}

impl RunRecord {
    pub fn new(run_id: u64, trigger: Trigger) -> Self {
        Self {
            run_id,
            trigger,
            state: RunState::Pending,
            failure: None,
            started_at: None,
            finished_at: None,
            output: OutputBuffer::default(),
            hook: None,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn failure(&self) -> Option<&RunFailure> {
        self.failure.as_ref()
    }

    pub fn started_at(&self) -> Option<Instant> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<Instant> {
        self.finished_at
    }

    pub fn output(&self) -> &OutputBuffer {
        &self.output
    }

    pub fn hook(&self) -> Option<&HookReport> {
        self.hook.as_ref()
    }

    pub fn is_success(&self) -> bool {
        self.state == RunState::Succeeded
    }

    /// Exit code, for the states that have one (`Succeeded` is 0).
    pub fn exit_code(&self) -> Option<i32> {
        match (&self.state, &self.failure) {
            (RunState::Succeeded, _) => Some(0),
            (RunState::Failed, Some(RunFailure::Exit(code))) => Some(*code),
            _ => None,
        }
    }

    /// Mark the process as started: `Pending` → `Running`.
    pub fn begin(&mut self) {
        if self.state != RunState::Pending {
            return;
        }
        self.state = RunState::Running;
        self.started_at = Some(Instant::now());
    }

    pub fn succeed(&mut self) {
        self.finish(RunState::Succeeded, None);
    }

    pub fn fail(&mut self, failure: RunFailure) {
        self.finish(RunState::Failed, Some(failure));
    }

    pub fn time_out(&mut self) {
        self.finish(RunState::TimedOut, None);
    }

    fn finish(&mut self, state: RunState, failure: Option<RunFailure>) {
        // Terminal states are final; late transitions are dropped.
        if self.state.is_terminal() {
            return;
        }
        self.state = state;
        self.failure = failure;
        self.finished_at = Some(Instant::now());
    }

    pub fn set_output(&mut self, output: OutputBuffer) {
        self.output = output;
    }

    pub fn set_hook(&mut self, report: HookReport) {
        self.hook = Some(report);
    }

    /// Which hook this record's outcome calls for:
    ///
    /// - `Succeeded` → the success hook,
    /// - `Failed` / `TimedOut` → the fail hook,
    /// - interrupted-by-shutdown runs get no hook at all.
    pub fn hook_kind(&self) -> Option<HookKind> {
        match (&self.state, &self.failure) {
            (RunState::Succeeded, _) => Some(HookKind::Success),
            (RunState::Failed, Some(RunFailure::Interrupted)) => None,
            (RunState::Failed, _) => Some(HookKind::Fail),
            (RunState::TimedOut, _) => Some(HookKind::Fail),
            _ => None,
        }
    }
}
