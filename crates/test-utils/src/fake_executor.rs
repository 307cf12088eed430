use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use watchrun::engine::{RunRecord, RuntimeEvent};
use watchrun::errors::Result;
use watchrun::exec::ExecutorBackend;
use watchrun::rules::RuleId;

/// Executor backend that never spawns a process: every dispatched record
/// succeeds instantly, and its rule id lands in a shared log the test can
/// poll.
pub struct FakeExecutor {
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    executed: Arc<Mutex<Vec<RuleId>>>,
}

impl FakeExecutor {
    /// Returns the backend plus the handle tests watch for dispatches.
    pub fn new(runtime_tx: mpsc::Sender<RuntimeEvent>) -> (Self, Arc<Mutex<Vec<RuleId>>>) {
        let executed = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&executed);
        (
            Self {
                runtime_tx,
                executed,
            },
            log,
        )
    }
}

impl ExecutorBackend for FakeExecutor {
    fn dispatch(
        &mut self,
        mut record: RunRecord,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.runtime_tx.clone();
        let executed = Arc::clone(&self.executed);

        Box::pin(async move {
            executed.lock().unwrap().push(record.trigger.rule);

            record.begin();
            record.succeed();
            tx.send(RuntimeEvent::RunFinished {
                record: Box::new(record),
            })
            .await
            .map_err(anyhow::Error::from)?;
            Ok(())
        })
    }

    fn terminate_all(&mut self) {}
}
