//! Generic state machine driver for long-running trading tasks.
//!
//! A task kind implements [`TaskLogic`]; [`BaseTradingTask`] owns the [`TaskContext`],
//! dispatches to the handler bound to the current state, and exposes a single
//! [`BaseTradingTask::execute_once`] step so an external driver owning the event loop can
//! schedule many tasks cooperatively.

use crate::{
    context::{CONTEXT_VERSION, ContextPatch, TaskContext, TaskFailure, TaskId},
    error::TaskError,
    state::{TaskPhase, TaskState},
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{fmt::Debug, time::Duration};
use tracing::{error, info, warn};

/// Handlers for one task kind.
///
/// Dispatch is a `match` on [`Self::Phase`] inside [`TaskLogic::on_phase`], so the set of
/// states a task kind can be in is closed and checked at compile time.
#[async_trait]
pub trait TaskLogic: Send {
    type Phase: TaskPhase;

    /// Task kind name, used for generated [`TaskId`]s and to guard restores.
    fn name(&self) -> &str;

    /// Handler for [`TaskState::Idle`].
    async fn on_start(&mut self, scope: &mut TaskScope<'_, Self::Phase>) -> Result<(), TaskError>;

    /// Handler for [`TaskState::Active`].
    async fn on_phase(
        &mut self,
        phase: Self::Phase,
        scope: &mut TaskScope<'_, Self::Phase>,
    ) -> Result<(), TaskError>;

    /// Rebuild derived (non persisted) fields after a context has been restored.
    ///
    /// On error the logic must be left as it was, since the restore is abandoned.
    fn rebuild(&mut self, _context: &TaskContext<Self::Phase>) -> Result<(), TaskError> {
        Ok(())
    }
}

/// Handle through which a state handler evolves the task's context.
///
/// A handler may evolve or transition any number of times within one step.
#[derive(Debug)]
pub struct TaskScope<'a, P> {
    context: &'a mut TaskContext<P>,
    delay: Option<Duration>,
}

impl<'a, P> TaskScope<'a, P>
where
    P: TaskPhase,
{
    fn new(context: &'a mut TaskContext<P>) -> Self {
        Self {
            context,
            delay: None,
        }
    }

    pub fn context(&self) -> &TaskContext<P> {
        self.context
    }

    pub fn evolve(&mut self, patch: ContextPatch<P>) {
        *self.context = self.context.evolve(patch);
    }

    pub fn transition(&mut self, state: TaskState<P>) {
        *self.context = transition(self.context, state);
    }

    /// Transition to [`TaskState::Active`] with the provided phase.
    pub fn advance(&mut self, phase: P) {
        self.transition(TaskState::Active(phase));
    }

    pub fn complete(&mut self) {
        self.transition(TaskState::Completed);
    }

    /// Pause the task, remembering the current state so it can be resumed.
    pub fn pause(&mut self) {
        let current = *self.context.state();
        self.evolve(ContextPatch::new().resume_state(Some(current)));
        self.transition(TaskState::Paused);
    }

    /// Override the delay suggested to the driver before the next step.
    pub fn set_delay(&mut self, delay: Duration) {
        self.delay = Some(delay);
    }
}

/// Rewrite the state of a context and log the transition.
///
/// The transition graph is not validated; invalid transitions are the caller's concern.
fn transition<P>(context: &TaskContext<P>, state: TaskState<P>) -> TaskContext<P>
where
    P: TaskPhase,
{
    info!(
        task_id = %context.task_id(),
        from = %context.state(),
        to = %state,
        "Task state transition"
    );
    context.evolve(ContextPatch::new().state(state))
}

/// Delays suggested to the driver between steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct TaskConfig {
    /// Delay after a step in a runnable state
    pub step_delay_ms: u64,
    /// Delay between checks while paused
    pub paused_delay_ms: u64,
    /// Delay between checks while in error, awaiting intervention
    pub error_delay_ms: u64,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            step_delay_ms: 1_000,
            paused_delay_ms: 5_000,
            error_delay_ms: 30_000,
        }
    }
}

impl TaskConfig {
    pub fn step_delay(&self) -> Duration {
        Duration::from_millis(self.step_delay_ms)
    }

    pub fn paused_delay(&self) -> Duration {
        Duration::from_millis(self.paused_delay_ms)
    }

    pub fn error_delay(&self) -> Duration {
        Duration::from_millis(self.error_delay_ms)
    }
}

/// Outcome of a single [`BaseTradingTask::execute_once`] step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepResult<P> {
    pub context: TaskContext<P>,
    /// False once the task reached a terminal state.
    pub should_continue: bool,
    pub next_delay: Duration,
}

/// State machine driver over a [`TaskContext`].
pub struct BaseTradingTask<Logic>
where
    Logic: TaskLogic,
{
    logic: Logic,
    context: TaskContext<Logic::Phase>,
    config: TaskConfig,
}

impl<Logic> Debug for BaseTradingTask<Logic>
where
    Logic: TaskLogic,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BaseTradingTask")
            .field("context", &self.context)
            .field("config", &self.config)
            .finish()
    }
}

impl<Logic> BaseTradingTask<Logic>
where
    Logic: TaskLogic,
{
    /// Construct a new task in [`TaskState::Idle`].
    pub fn new(logic: Logic, task_id: Option<TaskId>, config: TaskConfig) -> Self {
        let context = TaskContext::new(logic.name(), task_id);
        info!(task_id = %context.task_id(), task = logic.name(), "Task created");
        Self {
            logic,
            context,
            config,
        }
    }

    /// Construct a task from a payload produced by [`Self::save_context`].
    pub fn restore_context(
        mut logic: Logic,
        payload: &str,
        config: TaskConfig,
    ) -> Result<Self, TaskError> {
        let context = decode_context(logic.name(), payload)?;
        logic.rebuild(&context)?;
        info!(
            task_id = %context.task_id(),
            state = %context.state(),
            revision = context.revision(),
            "Task restored"
        );
        Ok(Self {
            logic,
            context,
            config,
        })
    }

    pub fn context(&self) -> &TaskContext<Logic::Phase> {
        &self.context
    }

    pub fn task_id(&self) -> &TaskId {
        self.context.task_id()
    }

    pub fn state(&self) -> &TaskState<Logic::Phase> {
        self.context.state()
    }

    pub fn logic(&self) -> &Logic {
        &self.logic
    }

    pub fn config(&self) -> &TaskConfig {
        &self.config
    }

    pub fn evolve(&mut self, patch: ContextPatch<Logic::Phase>) {
        self.context = self.context.evolve(patch);
    }

    pub fn transition(&mut self, state: TaskState<Logic::Phase>) {
        self.context = transition(&self.context, state);
    }

    /// Run the handler bound to the current state once.
    ///
    /// Terminal states invoke no handler and return `should_continue = false`. `Paused` and
    /// `Error` invoke no handler either. A handler failure is captured on the context and
    /// forces [`TaskState::Error`]; a [`TaskError::Cancelled`] is propagated untouched.
    pub async fn execute_once(&mut self) -> Result<StepResult<Logic::Phase>, TaskError> {
        let snapshot = self.context.clone();
        let state = *snapshot.state();

        match state {
            TaskState::Completed | TaskState::Cancelled => {
                return Ok(self.step_result(Duration::ZERO));
            }
            TaskState::Paused => return Ok(self.step_result(self.config.paused_delay())),
            TaskState::Error => return Ok(self.step_result(self.config.error_delay())),
            TaskState::Idle | TaskState::Active(_) => {}
        }

        let mut scope = TaskScope::new(&mut self.context);
        let outcome = match state {
            TaskState::Active(phase) => self.logic.on_phase(phase, &mut scope).await,
            _ => self.logic.on_start(&mut scope).await,
        };
        let delay = scope.delay;

        match outcome {
            Ok(()) => {}
            Err(TaskError::Cancelled) => {
                warn!(task_id = %snapshot.task_id(), state = %state, "Task step cancelled");
                return Err(TaskError::Cancelled);
            }
            Err(handler_error) => {
                error!(
                    task_id = %snapshot.task_id(),
                    state = %state,
                    error = %handler_error,
                    "Task handler failed, moving to error state"
                );
                self.context = self.context.evolve(
                    ContextPatch::new()
                        .error(TaskFailure::new(handler_error.to_string(), state))
                        .state(TaskState::Error),
                );
                return Ok(self.step_result(self.config.error_delay()));
            }
        }

        Ok(self.step_result(delay.unwrap_or_else(|| self.config.step_delay())))
    }

    fn step_result(&self, next_delay: Duration) -> StepResult<Logic::Phase> {
        let should_continue = !self.context.state().is_terminal();
        StepResult {
            context: self.context.clone(),
            should_continue,
            next_delay: if should_continue {
                next_delay
            } else {
                Duration::ZERO
            },
        }
    }

    /// Move the task to [`TaskState::Cancelled`]. No-op if already terminal.
    pub fn cancel(&mut self) {
        if !self.context.state().is_terminal() {
            self.transition(TaskState::Cancelled);
        }
    }

    /// Move a runnable task to [`TaskState::Paused`], remembering where to resume.
    pub fn pause(&mut self) {
        let state = *self.context.state();
        if !state.is_runnable() {
            warn!(task_id = %self.task_id(), %state, "Ignoring pause of non-runnable task");
            return;
        }
        self.evolve(ContextPatch::new().resume_state(Some(state)));
        self.transition(TaskState::Paused);
    }

    /// Return a paused task to the state it was paused in.
    pub fn resume(&mut self) {
        if self.context.state() != &TaskState::Paused {
            warn!(task_id = %self.task_id(), state = %self.state(), "Ignoring resume of task that is not paused");
            return;
        }
        let resume_state = self
            .context
            .resume_state()
            .copied()
            .unwrap_or(TaskState::Idle);
        self.evolve(ContextPatch::new().resume_state(None));
        self.transition(resume_state);
    }

    /// External intervention: clear the captured failure and move out of [`TaskState::Error`].
    pub fn clear_error(&mut self, state: TaskState<Logic::Phase>) {
        if self.context.state() != &TaskState::Error {
            warn!(task_id = %self.task_id(), state = %self.state(), "Ignoring clear_error of task not in error");
            return;
        }
        self.evolve(ContextPatch::new().clear_error());
        self.transition(state);
    }

    /// Serialise the context for persistence and mark it clean.
    pub fn save_context(&mut self) -> Result<String, TaskError> {
        let payload = serde_json::to_string(&self.context)?;
        self.context.mark_persisted();
        Ok(payload)
    }

    /// Replace the context with one restored from `payload`, rebuilding derived fields.
    ///
    /// Malformed payloads, or payloads [`TaskLogic::rebuild`] rejects, return an error and
    /// leave the task untouched, so a recovery supervisor can quarantine the task rather
    /// than silently resume it.
    pub fn restore_from_json(&mut self, payload: &str) -> Result<(), TaskError> {
        let context = decode_context(self.logic.name(), payload)?;
        self.logic.rebuild(&context)?;
        self.context = context;
        Ok(())
    }
}

fn decode_context<P>(task_name: &str, payload: &str) -> Result<TaskContext<P>, TaskError>
where
    P: TaskPhase,
{
    let context = serde_json::from_str::<TaskContext<P>>(payload)
        .map_err(|error| TaskError::Restore(error.to_string()))?;

    if context.version() != CONTEXT_VERSION {
        return Err(TaskError::UnsupportedVersion {
            found: context.version(),
            expected: CONTEXT_VERSION,
        });
    }

    if context.task_name() != task_name {
        return Err(TaskError::Restore(format!(
            "payload belongs to task kind {}, not {task_name}",
            context.task_name()
        )));
    }

    Ok(context.with_task_id())
}
