// src/watch/events.rs

use std::path::PathBuf;

use notify::event::{AccessKind, AccessMode, EventKind, ModifyKind, RenameMode};
use tokio::time::Instant;

/// Kind of filesystem change, normalized from notify's platform-specific
/// event taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
    Moved,
}

impl ChangeKind {
    /// Deletions never fire rules; they only matter for watch upkeep.
    pub fn fires_rules(&self) -> bool {
        !matches!(self, ChangeKind::Deleted)
    }
}

/// A single normalized filesystem event as emitted by the watcher.
///
/// Paths are absolute. The watcher does not deduplicate or interpret these;
/// coalescing happens later, in the engine's pending set.
#[derive(Debug, Clone)]
pub struct RawEvent {
    pub path: PathBuf,
    pub kind: ChangeKind,

    /// When the ingest loop saw the event.
    pub at: Instant,

    /// Arrival stamp, strictly increasing per watcher.
    pub seq: u64,
}

/// Map a notify event to zero or more `(path, kind)` pairs.
///
/// Most events carry one path; a rename observed as a single event carries
/// the old path (gone) and the new one (moved here).
pub fn normalize(event: &notify::Event) -> Vec<(PathBuf, ChangeKind)> {
    if let EventKind::Modify(ModifyKind::Name(RenameMode::Both)) = event.kind {
        if event.paths.len() == 2 {
            return vec![
                (event.paths[0].clone(), ChangeKind::Deleted),
                (event.paths[1].clone(), ChangeKind::Moved),
            ];
        }
    }

    let kind = match event.kind {
        EventKind::Create(_) => ChangeKind::Created,
        EventKind::Remove(_) => ChangeKind::Deleted,
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => ChangeKind::Deleted,
        EventKind::Modify(ModifyKind::Name(_)) => ChangeKind::Moved,
        EventKind::Modify(_) => ChangeKind::Modified,
        // Close-after-write is the strongest "content is complete" signal on
        // Linux; all other access events are reads and never interesting.
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => ChangeKind::Modified,
        EventKind::Access(_) => return Vec::new(),
        EventKind::Any | EventKind::Other => ChangeKind::Modified,
    };

    event.paths.iter().cloned().map(|p| (p, kind)).collect()
}
