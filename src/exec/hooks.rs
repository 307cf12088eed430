// src/exec/hooks.rs

//! Success / fail hook execution.
//!
//! Hooks are shell commands rendered from the same captures as the main
//! process. They run after the run reached a terminal state, have no
//! timeout of their own, and their output is logged at debug level rather
//! than captured. A hook failure never re-triggers the other hook.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::engine::{HookKind, HookOutcome, HookReport, RunRecord};
use crate::rules::Rule;

use super::command::{build_shell_command, terminate_tree};
use super::runner::{spawn_debug_drain, wait_for_kill};

/// Run the hook matching the record's terminal state, if the rule has one.
/// The outcome is folded into the record.
pub(crate) async fn dispatch_hook(
    record: &mut RunRecord,
    rule: &Rule,
    kill_rx: &mut watch::Receiver<bool>,
    kill_grace: Duration,
) {
    let Some(kind) = record.hook_kind() else {
        return;
    };
    let template = match kind {
        HookKind::Success => rule.success.as_ref(),
        HookKind::Fail => rule.fail.as_ref(),
    };
    let Some(template) = template else {
        return;
    };

    let cmdline = match template.render(&record.trigger.captures, record.trigger.path.as_deref()) {
        Ok(cmdline) => cmdline,
        Err(detail) => {
            warn!(rule = %rule.name, ?kind, error = %detail, "hook template did not render");
            record.set_hook(HookReport {
                kind,
                outcome: HookOutcome::RenderFailed(detail),
            });
            return;
        }
    };

    info!(rule = %rule.name, ?kind, cmd = %cmdline, "running hook");

    let mut child = match build_shell_command(&cmdline).spawn() {
        Ok(child) => child,
        Err(err) => {
            warn!(rule = %rule.name, ?kind, error = %err, "hook failed to spawn");
            record.set_hook(HookReport {
                kind,
                outcome: HookOutcome::SpawnFailed(err.to_string()),
            });
            return;
        }
    };

    if let Some(stdout) = child.stdout.take() {
        spawn_debug_drain(stdout, rule.name.clone(), "hook stdout");
    }
    if let Some(stderr) = child.stderr.take() {
        spawn_debug_drain(stderr, rule.name.clone(), "hook stderr");
    }

    let outcome = tokio::select! {
        status = child.wait() => match status {
            Ok(status) => HookOutcome::Exited(status.code().unwrap_or(-1)),
            Err(err) => HookOutcome::SpawnFailed(format!("waiting for hook: {err}")),
        },
        _ = wait_for_kill(kill_rx) => {
            warn!(rule = %rule.name, ?kind, "hook interrupted by shutdown");
            terminate_tree(&mut child, kill_grace).await;
            HookOutcome::Interrupted
        }
    };

    match &outcome {
        HookOutcome::Exited(0) => debug!(rule = %rule.name, ?kind, "hook finished"),
        HookOutcome::Exited(code) => {
            warn!(rule = %rule.name, ?kind, exit_code = code, "hook exited non-zero");
        }
        _ => {}
    }

    record.set_hook(HookReport { kind, outcome });
}
