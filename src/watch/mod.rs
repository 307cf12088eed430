// src/watch/mod.rs

//! Filesystem watching: arms `notify` watchers over the configured roots,
//! folds the platform-specific event stream into [`RawEvent`]s, and keeps
//! watches alive when directories disappear and come back.
//!
//! Rules, debouncing and execution are out of scope here; the output is a
//! plain stream of path changes.

pub mod events;
pub mod watcher;

pub use events::{normalize, ChangeKind, RawEvent};
pub use watcher::{relative_str, spawn_watcher, WatcherHandle};
