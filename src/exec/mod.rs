// src/exec/mod.rs

//! Running rule commands.
//!
//! [`runner`] owns the executor loop: one tokio task per run, parallelism
//! capped by a semaphore, output capture and timeout enforcement. The
//! finished [`RunRecord`](crate::engine::RunRecord) travels back to the
//! runtime inside a `RuntimeEvent`. [`backend`] is the seam between the
//! runtime and the executor; tests swap in a fake implementation.
//! [`backup`] copies the triggering file aside before the process starts,
//! `command` builds platform shell commands and tears down process groups,
//! and `hooks` runs the success / fail follow-ups.

pub mod backend;
pub mod backup;
mod command;
mod hooks;
pub mod runner;

pub use backend::{ExecutorBackend, RealExecutorBackend};
pub use runner::ExecutorSettings;
