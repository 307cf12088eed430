// src/exec/backend.rs

//! Seam between the runtime and the executor.
//!
//! The runtime is generic over an [`ExecutorBackend`] rather than holding
//! the executor's channel ends directly, so integration tests can stand in
//! a backend that completes runs without spawning processes.
//! [`RealExecutorBackend`] is the production implementation over
//! [`spawn_executor`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::engine::{RunRecord, RuntimeEvent};
use crate::errors::{Error, Result};
use crate::rules::RuleSet;

use super::runner::{ExecutorSettings, spawn_executor};

/// How the runtime hands runs to whatever executes them.
pub trait ExecutorBackend: Send {
    /// Queue one run for execution. The record comes back to the runtime
    /// inside `RuntimeEvent::RunFinished`, whatever the outcome.
    fn dispatch(
        &mut self,
        record: RunRecord,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Force-terminate every run still in flight. Used by shutdown once the
    /// drain deadline passed; affected runs still report `RunFinished`.
    fn terminate_all(&mut self);
}

/// Production backend: spawns the executor loop on construction, forwards
/// runs over its mpsc channel, and flips the kill switch every run task
/// watches when `terminate_all` is called.
pub struct RealExecutorBackend {
    tx: mpsc::Sender<RunRecord>,
    kill: watch::Sender<bool>,
}

impl RealExecutorBackend {
    pub fn new(
        rules: Arc<RuleSet>,
        settings: ExecutorSettings,
        runtime_tx: mpsc::Sender<RuntimeEvent>,
    ) -> Self {
        let (tx, kill) = spawn_executor(rules, settings, runtime_tx);
        Self { tx, kill }
    }
}

impl ExecutorBackend for RealExecutorBackend {
    fn dispatch(
        &mut self,
        record: RunRecord,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        // Clone so the future doesn't borrow self across await points.
        let tx = self.tx.clone();

        Box::pin(async move {
            tx.send(record).await.map_err(Error::from)?;
            Ok(())
        })
    }

    fn terminate_all(&mut self) {
        let _ = self.kill.send_replace(true);
    }
}
