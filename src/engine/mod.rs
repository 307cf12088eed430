// src/engine/mod.rs

//! Orchestration engine: run records, the pending set that debounces and
//! serializes triggers, and the event loop reacting to path changes, cron
//! fires, run completions and shutdown.
//!
//! [`scheduler`] holds the pure debounce/exclusivity state machine;
//! [`runtime`] is its async shell.

pub mod record;
pub mod runtime;
pub mod scheduler;

pub use record::{
    HookKind, HookOutcome, HookReport, OutputBuffer, RunFailure, RunRecord, RunState, Trigger,
};
pub use runtime::{RunStats, Runtime, RuntimeEvent, RuntimeOptions};
pub use scheduler::{PendingSet, TriggerKey};
