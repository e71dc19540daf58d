use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use pulseboard_core_types::{CellId, ExecutionId, NotebookId};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::ExecutionApi;
use crate::error::RunnerError;
use crate::model::{CellResult, Execution, ExecutionReport, RunnerConfig};

struct ExecutionSlot {
    state: RwLock<Execution>,
    updates: watch::Sender<Execution>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ExecutionSlot {
    fn new(execution: Execution) -> Self {
        let (updates, _) = watch::channel(execution.clone());
        Self {
            state: RwLock::new(execution),
            updates,
            cancel: CancellationToken::new(),
            worker: Mutex::new(None),
        }
    }

    fn snapshot(&self) -> Execution {
        self.state.read().clone()
    }

    /// Merges one poll report. Returns whether polling should stop.
    fn apply(&self, report: ExecutionReport) -> bool {
        let (terminal, snapshot) = {
            let mut state = self.state.write();
            if state.cancelled {
                return true;
            }
            state.polls += 1;
            let terminal = state.merge(report);
            (terminal, state.clone())
        };
        self.updates.send_replace(snapshot);
        terminal
    }

    /// Stops polling and freezes the last-known results.
    fn cancel(&self) -> bool {
        let snapshot = {
            let mut state = self.state.write();
            if state.is_settled() {
                return false;
            }
            state.cancelled = true;
            state.clone()
        };
        self.cancel.cancel();
        self.updates.send_replace(snapshot);
        true
    }

    fn shutdown(&self) {
        self.cancel();
        self.cancel.cancel();
        if let Some(worker) = self.worker.lock().take() {
            worker.abort();
        }
    }
}

/// Caller-side handle on one execution.
pub struct ExecutionHandle {
    pub id: ExecutionId,
    pub notebook_id: NotebookId,
    updates: watch::Receiver<Execution>,
}

impl ExecutionHandle {
    pub fn snapshot(&self) -> Execution {
        self.updates.borrow().clone()
    }

    /// Receiver that observes every merged update, in poll order.
    pub fn updates(&self) -> watch::Receiver<Execution> {
        self.updates.clone()
    }

    /// Resolves once the execution is terminal or cancelled, or once the
    /// coordinator has dropped it, returning the last-known state.
    pub async fn wait(&mut self) -> Execution {
        loop {
            {
                let current = self.updates.borrow_and_update();
                if current.is_settled() {
                    return current.clone();
                }
            }
            if self.updates.changed().await.is_err() {
                return self.updates.borrow().clone();
            }
        }
    }
}

/// Submits notebook runs and polls them to completion.
///
/// At most one execution is active per notebook: a new submission retires the
/// previous one. Each running execution is driven by a single poll task, so
/// reports are merged strictly in the order the polls complete.
pub struct ExecutionCoordinator<A>
where
    A: ExecutionApi + 'static,
{
    api: Arc<A>,
    config: RunnerConfig,
    executions: DashMap<ExecutionId, Arc<ExecutionSlot>>,
    active: DashMap<NotebookId, ExecutionId>,
}

impl<A> ExecutionCoordinator<A>
where
    A: ExecutionApi + 'static,
{
    pub fn new(api: Arc<A>, config: RunnerConfig) -> Self {
        Self {
            api,
            config,
            executions: DashMap::new(),
            active: DashMap::new(),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.config.poll_interval
    }

    /// Calls the remote execute operation exactly once. Failures surface
    /// immediately and are never retried.
    pub async fn submit(&self, notebook_id: &NotebookId) -> Result<ExecutionHandle, RunnerError> {
        let report = self
            .api
            .execute_notebook(notebook_id)
            .await
            .map_err(RunnerError::Submit)?;

        let execution = Execution::from_report(notebook_id.clone(), report);
        let id = execution.id.clone();
        let settled = execution.is_terminal();
        let slot = Arc::new(ExecutionSlot::new(execution));
        let handle = ExecutionHandle {
            id: id.clone(),
            notebook_id: notebook_id.clone(),
            updates: slot.updates.subscribe(),
        };

        if settled {
            info!(
                target: "notebook-runner",
                execution = %id,
                notebook = %notebook_id,
                status = %slot.snapshot().status,
                "execution finished on submit; no polling"
            );
        } else {
            info!(
                target: "notebook-runner",
                execution = %id,
                notebook = %notebook_id,
                interval_ms = self.config.poll_interval.as_millis() as u64,
                "execution submitted; polling"
            );
            let worker = tokio::spawn(poll_loop(
                Arc::clone(&self.api),
                Arc::clone(&slot),
                id.clone(),
                self.config.poll_interval,
            ));
            *slot.worker.lock() = Some(worker);
        }

        self.executions.insert(id.clone(), slot);
        // Swapping the active entry in one step leaves exactly one survivor
        // when submissions for the same notebook race.
        if let Some(previous) = self.active.insert(notebook_id.clone(), id.clone()) {
            if previous != id {
                self.retire(&previous);
            }
        }
        Ok(handle)
    }

    /// Stops scheduling polls for `execution_id`. A poll already in flight is
    /// allowed to finish, but its report is discarded.
    pub fn cancel(&self, execution_id: &ExecutionId) -> Result<bool, RunnerError> {
        let slot = self
            .executions
            .get(execution_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| RunnerError::UnknownExecution(execution_id.clone()))?;
        let cancelled = slot.cancel();
        if cancelled {
            info!(target: "notebook-runner", execution = %execution_id, "execution cancelled");
        }
        Ok(cancelled)
    }

    pub fn execution(&self, execution_id: &ExecutionId) -> Option<Execution> {
        self.executions
            .get(execution_id)
            .map(|slot| slot.value().snapshot())
    }

    pub fn active_for(&self, notebook_id: &NotebookId) -> Option<Execution> {
        let id = self.active.get(notebook_id)?.value().clone();
        self.execution(&id)
    }

    pub fn cell_result(&self, execution_id: &ExecutionId, cell_id: &CellId) -> Option<CellResult> {
        let slot = self.executions.get(execution_id)?;
        let state = slot.value().state.read();
        state.result(cell_id).cloned()
    }

    /// Output of `cell_id` in the notebook's current execution, if any.
    pub fn cell_output(&self, notebook_id: &NotebookId, cell_id: &CellId) -> Option<CellResult> {
        let id = self.active.get(notebook_id)?.value().clone();
        self.cell_result(&id, cell_id)
    }

    pub fn len(&self) -> usize {
        self.executions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executions.is_empty()
    }

    /// Cancels every execution and forgets them all.
    pub fn dispose(&self) {
        for entry in self.executions.iter() {
            entry.value().shutdown();
        }
        self.executions.clear();
        self.active.clear();
        debug!(target: "notebook-runner", "coordinator disposed");
    }

    fn retire(&self, execution_id: &ExecutionId) {
        if let Some((_, slot)) = self.executions.remove(execution_id) {
            slot.shutdown();
            debug!(target: "notebook-runner", execution = %execution_id, "previous execution retired");
        }
    }
}

impl<A> Drop for ExecutionCoordinator<A>
where
    A: ExecutionApi + 'static,
{
    fn drop(&mut self) {
        for entry in self.executions.iter() {
            entry.value().shutdown();
        }
    }
}

async fn poll_loop<A>(api: Arc<A>, slot: Arc<ExecutionSlot>, id: ExecutionId, interval: Duration)
where
    A: ExecutionApi + 'static,
{
    loop {
        tokio::select! {
            _ = slot.cancel.cancelled() => return,
            _ = sleep(interval) => {}
        }

        let outcome = api.get_execution(&id).await;
        if slot.cancel.is_cancelled() {
            debug!(target: "notebook-runner", execution = %id, "discarding poll result after cancel");
            return;
        }

        match outcome {
            Ok(report) => {
                if slot.apply(report) {
                    let snapshot = slot.snapshot();
                    info!(
                        target: "notebook-runner",
                        execution = %id,
                        status = %snapshot.status,
                        cells = snapshot.results.len(),
                        polls = snapshot.polls,
                        "execution reached terminal status"
                    );
                    return;
                }
            }
            Err(err) => {
                warn!(
                    target: "notebook-runner",
                    execution = %id,
                    error = %err,
                    transient = err.is_transient(),
                    "execution poll failed; retrying next tick"
                );
            }
        }
    }
}
