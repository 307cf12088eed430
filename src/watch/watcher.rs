// src/watch/watcher.rs

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::engine::RuntimeEvent;
use crate::errors::{Result, WatchrunError};
use crate::watch::events::{normalize, ChangeKind, RawEvent};

/// Capacity of the channel between the notify callback and the ingest loop.
/// When it fills up (event storm faster than the engine drains), the callback
/// warns once per overflow and blocks, applying backpressure to notify
/// instead of dropping events.
const EVENT_QUEUE_CAPACITY: usize = 1024;

/// Initial delay before retrying a lost or not-yet-existing watch directory.
const REARM_INITIAL: Duration = Duration::from_millis(250);

/// Upper bound for the re-arm backoff.
const REARM_MAX: Duration = Duration::from_secs(30);

/// Consecutive re-arm rounds with *nothing* watched after which the watcher
/// gives up and reports a fatal `WatchFailed` to the runtime.
const REARM_FAILURE_LIMIT: u32 = 10;

/// Keep-alive for the watcher.
///
/// Dropping it aborts the ingest loop (which owns the underlying
/// `RecommendedWatcher`) and thereby stops file watching.
pub struct WatcherHandle {
    task: JoinHandle<()>,
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl std::fmt::Debug for WatcherHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherHandle").finish()
    }
}

/// One watched directory and whether its OS watch is currently armed.
struct WatchDir {
    path: PathBuf,
    armed: bool,
}

/// Spawn the filesystem watcher and its ingest loop.
///
/// - `root` is the watch root; it must exist.
/// - `prefixes` are the literal directory prefixes of the event patterns,
///   relative to `root`. With `recursive = true` they are ignored and the
///   whole tree under `root` is watched instead.
/// - Normalized events are sent as `RuntimeEvent::PathChanged` with absolute
///   paths and an arrival sequence number.
///
/// Directories that vanish (or don't exist yet) are re-armed with a backed-off
/// retry; only when every watch is lost and retries keep failing does the
/// watcher report `RuntimeEvent::WatchFailed`.
pub fn spawn_watcher(
    root: impl Into<PathBuf>,
    prefixes: Vec<PathBuf>,
    recursive: bool,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
) -> Result<WatcherHandle> {
    let root = root.into();
    // Canonicalize once so relativization has a stable base.
    let root = root.canonicalize().unwrap_or_else(|_| root.clone());

    if !root.is_dir() {
        return Err(WatchrunError::ConfigError(format!(
            "watch root {:?} is not a directory",
            root
        )));
    }

    let (mode, mut dirs) = if recursive {
        (
            RecursiveMode::Recursive,
            vec![WatchDir {
                path: root.clone(),
                armed: false,
            }],
        )
    } else {
        let dirs = prefixes
            .iter()
            .map(|prefix| WatchDir {
                path: if prefix.as_os_str().is_empty() {
                    root.clone()
                } else {
                    root.join(prefix)
                },
                armed: false,
            })
            .collect();
        (RecursiveMode::NonRecursive, dirs)
    };

    // Bridge out of notify's callback thread into the tokio side.
    let (event_tx, event_rx) = mpsc::channel::<notify::Result<Event>>(EVENT_QUEUE_CAPACITY);

    // The callback runs on notify's own thread, synchronously per event.
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match event_tx.try_send(res) {
            Ok(()) => {}
            Err(TrySendError::Full(res)) => {
                // No tracing on this thread; stderr is the best we have.
                eprintln!("watchrun: event queue full, slowing down the file watcher");
                let _ = event_tx.blocking_send(res);
            }
            Err(TrySendError::Closed(_)) => {}
        },
        Config::default(),
    )
    .map_err(|e| WatchrunError::Other(e.into()))?;

    for dir in dirs.iter_mut() {
        match watcher.watch(&dir.path, mode) {
            Ok(()) => {
                dir.armed = true;
                info!(dir = %dir.path.display(), ?mode, "file watch armed");
            }
            Err(err) if recursive => {
                // Recursive mode has a single watch; without it nothing works.
                return Err(WatchrunError::Other(err.into()));
            }
            Err(err) => {
                warn!(
                    dir = %dir.path.display(),
                    error = %err,
                    "could not arm file watch yet; will retry"
                );
            }
        }
    }

    let task = tokio::spawn(ingest_loop(watcher, event_rx, dirs, mode, runtime_tx));

    Ok(WatcherHandle { task })
}

/// Consume notify events, normalize them, and forward them to the runtime.
///
/// This loop owns the `RecommendedWatcher`; it also re-arms watches for
/// directories that disappear and reappear.
async fn ingest_loop(
    mut watcher: RecommendedWatcher,
    mut event_rx: mpsc::Receiver<notify::Result<Event>>,
    mut dirs: Vec<WatchDir>,
    mode: RecursiveMode,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
) {
    let mut seq: u64 = 0;
    let mut backoff = REARM_INITIAL;
    let mut dead_rounds: u32 = 0;

    // The retry deadline must survive select iterations: a sleep built inside
    // the loop restarts on every incoming event, and steady traffic on the
    // still-armed directories would then postpone re-arming forever. The
    // deadline is set when a directory is disarmed and advanced only here and
    // in the retry arm below.
    let retry = tokio::time::sleep_until(Instant::now() + REARM_INITIAL);
    tokio::pin!(retry);

    loop {
        let any_pending = dirs.iter().any(|d| !d.armed);

        tokio::select! {
            maybe = event_rx.recv() => {
                let Some(res) = maybe else {
                    debug!("watch event channel closed, ingest loop ending");
                    return;
                };

                match res {
                    Ok(event) => {
                        debug!(?event, "raw filesystem event");
                        if !forward_event(&event, &mut dirs, &mut watcher, &mut seq, &runtime_tx).await {
                            return;
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "file watch error");
                        disarm_missing(&mut dirs, &mut watcher);
                    }
                }

                // First disarm since the pending set was empty: start a fresh
                // retry schedule. Later events leave the deadline alone.
                if !any_pending && dirs.iter().any(|d| !d.armed) {
                    backoff = REARM_INITIAL;
                    retry.as_mut().reset(Instant::now() + backoff);
                }
            }
            () = &mut retry, if any_pending => {
                let rearmed_any = rearm_pending(&mut dirs, &mut watcher, mode);

                if rearmed_any {
                    backoff = REARM_INITIAL;
                } else {
                    backoff = (backoff * 2).min(REARM_MAX);
                }

                if dirs.iter().any(|d| d.armed) {
                    dead_rounds = 0;
                } else {
                    dead_rounds += 1;
                    if dead_rounds >= REARM_FAILURE_LIMIT {
                        error!("no watchable directories left after repeated retries");
                        let _ = runtime_tx
                            .send(RuntimeEvent::WatchFailed {
                                error: "all watched directories are gone".to_string(),
                            })
                            .await;
                        return;
                    }
                }

                retry.as_mut().reset(Instant::now() + backoff);
            }
        }
    }
}

/// Forward one notify event to the runtime. Returns false when the runtime
/// channel is closed and the loop should end.
async fn forward_event(
    event: &Event,
    dirs: &mut [WatchDir],
    watcher: &mut RecommendedWatcher,
    seq: &mut u64,
    runtime_tx: &mpsc::Sender<RuntimeEvent>,
) -> bool {
    for (path, kind) in normalize(event) {
        if kind == ChangeKind::Deleted {
            // A watched directory going away silently kills its OS watch.
            if let Some(dir) = dirs.iter_mut().find(|d| d.armed && d.path == path) {
                warn!(
                    dir = %dir.path.display(),
                    "watched directory removed; will re-arm when it reappears"
                );
                let _ = watcher.unwatch(&dir.path);
                dir.armed = false;
            }
        }

        if !kind.fires_rules() {
            continue;
        }

        *seq += 1;
        let raw = RawEvent {
            path,
            kind,
            at: Instant::now(),
            seq: *seq,
        };

        if runtime_tx
            .send(RuntimeEvent::PathChanged(raw))
            .await
            .is_err()
        {
            debug!("runtime channel closed, ingest loop ending");
            return false;
        }
    }

    true
}

/// After a notify-level error, drop watches whose directory no longer exists
/// so the re-arm timer picks them up.
fn disarm_missing(dirs: &mut [WatchDir], watcher: &mut RecommendedWatcher) {
    for dir in dirs.iter_mut() {
        if dir.armed && !dir.path.is_dir() {
            warn!(
                dir = %dir.path.display(),
                "watched directory missing after watch error; will re-arm"
            );
            let _ = watcher.unwatch(&dir.path);
            dir.armed = false;
        }
    }
}

/// Try to arm every pending directory that exists again. Returns true if at
/// least one watch came back.
fn rearm_pending(dirs: &mut [WatchDir], watcher: &mut RecommendedWatcher, mode: RecursiveMode) -> bool {
    let mut rearmed_any = false;

    for dir in dirs.iter_mut() {
        if dir.armed || !dir.path.is_dir() {
            continue;
        }
        match watcher.watch(&dir.path, mode) {
            Ok(()) => {
                dir.armed = true;
                rearmed_any = true;
                info!(dir = %dir.path.display(), "file watch re-armed");
            }
            Err(err) => {
                debug!(dir = %dir.path.display(), error = %err, "re-arm attempt failed");
            }
        }
    }

    rearmed_any
}

/// Path as a forward-slash string relative to `root`; `None` when the path
/// lies outside `root`. Rule patterns match against this form.
pub fn relative_str(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let s = rel.to_string_lossy().replace('\\', "/");
    Some(s)
}
