//! External drivers: a [`TaskRunner`] stepping a task until it finishes, and
//! [`recover_tasks`] rebuilding tasks from a [`ContextStore`] after a restart.

use crate::{
    context::TaskId,
    error::TaskError,
    state::TaskState,
    store::ContextStore,
    task::{BaseTradingTask, TaskConfig, TaskLogic},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Configuration for a [`TaskRunner`].
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize)]
pub struct RunnerConfig {
    /// Delete the stored context once the task reaches a terminal state.
    pub remove_on_terminal: bool,
}

/// How a [`TaskRunner::run`] call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome<P> {
    /// Task reached a terminal state.
    Finished(TaskState<P>),
    /// Shutdown was signalled. The context is persisted and the task may be resumed.
    Interrupted,
}

/// Drives a [`BaseTradingTask`] one step at a time, persisting its context whenever it changes.
#[derive(Debug)]
pub struct TaskRunner<Store: ?Sized> {
    store: Arc<Store>,
    config: RunnerConfig,
}

impl<Store> TaskRunner<Store>
where
    Store: ContextStore + ?Sized,
{
    pub fn new(store: Arc<Store>, config: RunnerConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Step `task` until it finishes or `shutdown` is set to `true`.
    ///
    /// Shutdown does not cancel the task. A [`TaskError::Cancelled`] from a step, or a store
    /// failure, is returned to the caller.
    pub async fn run<Logic>(
        &self,
        task: &mut BaseTradingTask<Logic>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<RunOutcome<Logic::Phase>, TaskError>
    where
        Logic: TaskLogic,
    {
        info!(task_id = %task.task_id(), state = %task.state(), "TaskRunner started");

        loop {
            if *shutdown.borrow() {
                self.persist(task).await?;
                info!(task_id = %task.task_id(), state = %task.state(), "TaskRunner interrupted");
                return Ok(RunOutcome::Interrupted);
            }

            let step = task.execute_once().await?;
            self.persist(task).await?;

            if !step.should_continue {
                let state = *step.context.state();
                if self.config.remove_on_terminal {
                    self.store.remove(task.task_id()).await?;
                }
                info!(task_id = %task.task_id(), %state, "TaskRunner finished");
                return Ok(RunOutcome::Finished(state));
            }

            debug!(
                task_id = %task.task_id(),
                state = %step.context.state(),
                delay_ms = step.next_delay.as_millis() as u64,
                "TaskRunner sleeping"
            );

            tokio::select! {
                _ = tokio::time::sleep(step.next_delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        // Sender dropped: no shutdown can arrive, finish the delay
                        tokio::time::sleep(step.next_delay).await;
                    }
                }
            }
        }
    }

    async fn persist<Logic>(&self, task: &mut BaseTradingTask<Logic>) -> Result<(), TaskError>
    where
        Logic: TaskLogic,
    {
        if !task.context().is_dirty() {
            return Ok(());
        }
        let task_id = task.task_id().clone();
        let payload = task.save_context()?;
        self.store.save(&task_id, payload).await
    }
}

/// Tasks rebuilt by [`recover_tasks`].
#[derive(Debug)]
pub struct Recovery<Logic>
where
    Logic: TaskLogic,
{
    pub tasks: Vec<BaseTradingTask<Logic>>,
    /// Tasks whose payload failed to restore and were moved out of the recoverable set.
    pub quarantined: Vec<TaskId>,
}

/// Restore every stored context for which `factory` provides task logic.
///
/// `factory` returns `None` for task ids belonging to other task kinds, which are left alone.
/// Payloads that fail to restore are quarantined rather than silently resumed.
pub async fn recover_tasks<Store, Logic, Factory>(
    store: &Store,
    mut factory: Factory,
    config: TaskConfig,
) -> Result<Recovery<Logic>, TaskError>
where
    Store: ContextStore + ?Sized,
    Logic: TaskLogic,
    Factory: FnMut(&TaskId) -> Option<Logic>,
{
    let mut recovery = Recovery {
        tasks: Vec::new(),
        quarantined: Vec::new(),
    };

    for task_id in store.list().await? {
        let Some(logic) = factory(&task_id) else {
            continue;
        };
        let Some(payload) = store.load(&task_id).await? else {
            warn!(%task_id, "Listed task context disappeared before recovery");
            continue;
        };

        match BaseTradingTask::restore_context(logic, &payload, config) {
            Ok(task) => recovery.tasks.push(task),
            Err(restore_error) => {
                error!(%task_id, error = %restore_error, "Failed to restore task, quarantining");
                store.quarantine(&task_id).await?;
                recovery.quarantined.push(task_id);
            }
        }
    }

    info!(
        recovered = recovery.tasks.len(),
        quarantined = recovery.quarantined.len(),
        "Task recovery complete"
    );
    Ok(recovery)
}
