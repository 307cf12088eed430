// src/exec/command.rs

//! Platform-level process plumbing: building shell commands and tearing
//! down process trees.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::warn;

/// Build a shell command appropriate for the platform.
///
/// On Unix the child becomes leader of a fresh process group, so a timeout
/// or shutdown can take out the whole tree (`sh -c "..."` plus anything it
/// spawned) with one signal to the group.
pub(crate) fn build_shell_command(cmdline: &str) -> Command {
    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(cmdline);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(cmdline);
        c
    };

    cmd.stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    cmd.process_group(0);

    cmd
}

/// Escalating process-tree termination: SIGTERM to the group, a grace
/// period, then SIGKILL to whatever survived. Waits until the direct child
/// is reaped; grandchildren are collected by init once the group is gone.
///
/// `child` must have been spawned by [`build_shell_command`], so its pid is
/// also the process-group id.
#[cfg(unix)]
pub(crate) async fn terminate_tree(child: &mut Child, grace: Duration) {
    use nix::sys::signal::Signal;

    let Some(pid) = child.id() else {
        // Already reaped; nothing to signal.
        return;
    };

    signal_group(pid, Signal::SIGTERM);

    if tokio::time::timeout(grace, child.wait()).await.is_err() {
        warn!(pid, "process group survived SIGTERM, sending SIGKILL");
        signal_group(pid, Signal::SIGKILL);
        let _ = child.wait().await;
    }
}

/// Without process groups we can only kill the direct child; `sh -c` sharing
/// its fate with the command is the common case.
#[cfg(not(unix))]
pub(crate) async fn terminate_tree(child: &mut Child, grace: Duration) {
    let _ = grace;
    if let Err(err) = child.kill().await {
        warn!(error = %err, "failed to kill process");
    }
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: nix::sys::signal::Signal) {
    use nix::errno::Errno;
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    match killpg(Pid::from_raw(pid as i32), signal) {
        Ok(()) => {}
        // The whole group already exited between the check and the signal.
        Err(Errno::ESRCH) => {}
        Err(err) => {
            warn!(pid, signal = %signal, error = %err, "failed to signal process group");
        }
    }
}
